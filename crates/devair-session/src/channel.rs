//! Real-time channel transport.
//!
//! A connector turns the websocket into an ordered stream of [`ChannelEvent`]s
//! plus an outbound text queue. Dropping the outbound sender closes the socket.

use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One text frame, in arrival order.
    Text(String),
    /// The transport failed. No further events follow.
    Failed(String),
    /// The channel was closed by either side. No further events follow.
    Closed(Option<String>),
}

/// Open channel. Events stop after `Failed` or `Closed`.
#[derive(Debug)]
pub struct ChannelHandle {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<ChannelHandle, TransportError>;
}

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    queue: usize,
}

impl WebSocketConnector {
    pub fn new(queue: usize) -> Self {
        Self {
            queue: queue.max(1),
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CHANNEL_QUEUE)
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<ChannelHandle, TransportError> {
        let (ws, _) = connect_async(url.clone())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        info!(event = "channel_open", url = %url);
        let (out_tx, out_rx) = mpsc::channel(self.queue);
        let (in_tx, in_rx) = mpsc::channel(self.queue);
        tokio::spawn(pump(ws, out_rx, in_tx));
        Ok(ChannelHandle {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

async fn pump(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<ChannelEvent>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(ChannelEvent::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if inbound.send(ChannelEvent::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!(event = "binary_frame_dropped"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    let _ = inbound.send(ChannelEvent::Closed(reason)).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = inbound.send(ChannelEvent::Failed(err.to_string())).await;
                    break;
                }
                None => {
                    let _ = inbound.send(ChannelEvent::Closed(None)).await;
                    break;
                }
            },
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        let _ = inbound.send(ChannelEvent::Failed(err.to_string())).await;
                        break;
                    }
                }
                None => {
                    debug!(event = "channel_local_close");
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }
}
