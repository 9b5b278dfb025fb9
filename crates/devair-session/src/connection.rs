//! Session connection state machine and inbound dispatch.

use crate::channel::{ChannelConnector, ChannelEvent, ChannelHandle};
use crate::config::SessionConfig;
use crate::correlator::BuildCorrelator;
use crate::error::TransportError;
use crate::state::SessionCore;
use devair_core::status::STATUS_CONNECTED;
use devair_core::strip_control_sequences;
use devair_core::wire::{decode_inbound, encode_outbound, InboundMsg, OutboundMsg};
use devair_core::ProjectId;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const LINE_INITIALIZING: &str = ">> Initializing connection...";
pub const LINE_CONNECTED: &str = ">> Connected to Real-time Gateway.";
pub const LINE_WAITING: &str = ">> Waiting for Agent...";
pub const LINE_CONNECTION_ERROR: &str = ">> Connection Error";
pub const LINE_DISCONNECTED: &str = ">> Disconnected";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Identified,
    Error,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Identified => "IDENTIFIED",
            ConnectionState::Error => "ERROR",
            ConnectionState::Closed => "CLOSED",
        }
    }

    /// `Error` and `Closed` end the connection for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Error | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one connection from `Connecting` to a terminal state.
///
/// Channel events are consumed strictly in arrival order by this one task.
/// The build trigger runs as its own task so a slow backend never holds up
/// streamed lines.
pub(crate) struct ConnectionDriver {
    pub(crate) project_id: ProjectId,
    pub(crate) core: Arc<SessionCore>,
    pub(crate) connector: Arc<dyn ChannelConnector>,
    pub(crate) correlator: Arc<BuildCorrelator>,
    pub(crate) config: SessionConfig,
}

impl ConnectionDriver {
    pub(crate) async fn run(self) {
        self.drive().await;
        if self.core.session_token().is_cancelled() {
            self.core.close_local().await;
        }
    }

    async fn drive(&self) {
        let token = self.core.channel_token().clone();
        let opened = tokio::select! {
            _ = token.cancelled() => return,
            opened = self.connector.open(&self.config.ws_url) => opened,
        };
        let ChannelHandle {
            outbound,
            mut inbound,
        } = match opened {
            Ok(handle) => handle,
            Err(err) => {
                warn!(event = "channel_open_failed", url = %self.config.ws_url, error = %err);
                self.core
                    .finish_channel(ConnectionState::Error, LINE_CONNECTION_ERROR)
                    .await;
                return;
            }
        };

        let connected = self
            .core
            .mutate_channel(|m| {
                m.set_connection(ConnectionState::Connected);
                m.append(LINE_CONNECTED);
                m.append(LINE_WAITING);
                m.set_status(STATUS_CONNECTED);
            })
            .await;
        if connected.is_none() {
            return;
        }

        if !self.identify(&outbound).await {
            return;
        }

        let correlator = self.correlator.clone();
        tokio::spawn(async move {
            if let Err(err) = correlator.trigger().await {
                debug!(event = "build_trigger_ended", error = %err);
            }
        });

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = inbound.recv() => match event {
                    Some(ChannelEvent::Text(text)) => self.dispatch(&text).await,
                    Some(ChannelEvent::Failed(reason)) => {
                        warn!(event = "channel_error", error = %reason);
                        self.core
                            .finish_channel(ConnectionState::Error, LINE_CONNECTION_ERROR)
                            .await;
                        break;
                    }
                    Some(ChannelEvent::Closed(reason)) => {
                        info!(event = "channel_closed", reason = reason.as_deref().unwrap_or(""));
                        self.core
                            .finish_channel(ConnectionState::Closed, LINE_DISCONNECTED)
                            .await;
                        break;
                    }
                    None => {
                        info!(event = "channel_closed", reason = "transport ended");
                        self.core
                            .finish_channel(ConnectionState::Closed, LINE_DISCONNECTED)
                            .await;
                        break;
                    }
                },
            }
        }
        // Dropping `outbound` on return makes the transport send its close frame.
    }

    async fn identify(&self, outbound: &mpsc::Sender<String>) -> bool {
        let project_id = &self.project_id;
        let frame = match encode_outbound(
            &OutboundMsg::identify_client(project_id.clone()),
            self.config.max_frame_bytes,
        ) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = "identify_encode_failed", error = %err);
                self.core
                    .finish_channel(ConnectionState::Error, LINE_CONNECTION_ERROR)
                    .await;
                return false;
            }
        };
        if let Err(err) = outbound.send(frame).await {
            let err = TransportError::Send(err.to_string());
            warn!(event = "identify_send_failed", project_id = %project_id, error = %err);
            self.core
                .finish_channel(ConnectionState::Error, LINE_CONNECTION_ERROR)
                .await;
            return false;
        }
        info!(event = "identify_sent", project_id = %project_id);
        self.core
            .mutate_channel(|m| {
                if m.connection() == ConnectionState::Connected {
                    m.set_connection(ConnectionState::Identified);
                }
            })
            .await
            .is_some()
    }

    async fn dispatch(&self, text: &str) {
        match decode_inbound(text, self.config.max_frame_bytes) {
            Ok(InboundMsg::LogChunk(payload)) => {
                let line = strip_control_sequences(&payload.chunk);
                self.core.mutate_channel(|m| m.append(line)).await;
            }
            Ok(InboundMsg::JobUpdate(payload)) => {
                self.core
                    .mutate_channel(|m| {
                        if let (Some(update_job), Some(correlated)) =
                            (payload.job_id(), m.correlated_job())
                        {
                            if update_job != correlated {
                                debug!(
                                    event = "job_update_mismatch",
                                    job_id = %update_job,
                                    correlated = %correlated
                                );
                            }
                        }
                        m.set_status(payload.status.clone());
                        m.append(format!(">> Job Status: {}", payload.status));
                    })
                    .await;
            }
            Ok(InboundMsg::AiStageUpdate(payload)) => {
                debug!(event = "ai_stage", stage = %payload.stage);
                self.core.mutate_channel(|m| m.set_ai_stage(payload)).await;
            }
            Err(err) => {
                warn!(event = "message_invalid", error = %err);
            }
        }
    }
}
