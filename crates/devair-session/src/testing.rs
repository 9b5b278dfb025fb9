//! In-process fakes for the backend and the channel transport.

use crate::backend::BuildBackend;
use crate::channel::{ChannelConnector, ChannelEvent, ChannelHandle};
use crate::error::{BackendError, TransportError};
use async_trait::async_trait;
use devair_core::wire::{AnalysisResult, JobRef, UiActionCommand};
use devair_core::{JobId, ProjectId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use url::Url;

pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub(crate) fn sample_analysis() -> AnalysisResult {
    AnalysisResult {
        confidence: 85,
        analysis: "I detected a build failure in the logs.".to_string(),
        suggestion: "Try running 'npm install' to fix missing dependencies.".to_string(),
    }
}

pub(crate) struct FakeBackend {
    build: Result<JobRef, BackendError>,
    analysis: StdMutex<VecDeque<Result<AnalysisResult, BackendError>>>,
    build_gate: Option<Notify>,
    analysis_gate: Option<Notify>,
    build_calls: AtomicUsize,
    analysis_calls: AtomicUsize,
    analyzed: StdMutex<Vec<String>>,
}

impl FakeBackend {
    fn with_build(build: Result<JobRef, BackendError>) -> Self {
        Self {
            build,
            analysis: StdMutex::new(VecDeque::new()),
            build_gate: None,
            analysis_gate: None,
            build_calls: AtomicUsize::new(0),
            analysis_calls: AtomicUsize::new(0),
            analyzed: StdMutex::new(Vec::new()),
        }
    }

    pub(crate) fn building(job_id: &str) -> Self {
        Self::with_build(Ok(JobRef {
            id: JobId::new(job_id),
            project_id: None,
            kind: Some("BUILD".to_string()),
            status: Some("QUEUED".to_string()),
        }))
    }

    pub(crate) fn build_failing(err: BackendError) -> Self {
        Self::with_build(Err(err))
    }

    /// Hold every build response until `release_build`.
    pub(crate) fn gate_builds(mut self) -> Self {
        self.build_gate = Some(Notify::new());
        self
    }

    /// Hold every analysis response until `release_analysis`.
    pub(crate) fn gate_analysis(mut self) -> Self {
        self.analysis_gate = Some(Notify::new());
        self
    }

    /// Queue analysis responses; once drained, `sample_analysis` is returned.
    pub(crate) fn analysis_responses(self, responses: Vec<Result<AnalysisResult, BackendError>>) -> Self {
        *self.analysis.lock().unwrap() = responses.into();
        self
    }

    pub(crate) fn release_build(&self) {
        if let Some(gate) = &self.build_gate {
            gate.notify_one();
        }
    }

    pub(crate) fn release_analysis(&self) {
        if let Some(gate) = &self.analysis_gate {
            gate.notify_one();
        }
    }

    pub(crate) fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn analysis_calls(&self) -> usize {
        self.analysis_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn analyzed_logs(&self) -> Vec<String> {
        self.analyzed.lock().unwrap().clone()
    }

    pub(crate) async fn wait_for_build_calls(&self, count: usize) {
        wait_until(|| self.build_calls() >= count).await;
    }

    pub(crate) async fn wait_for_analysis_calls(&self, count: usize) {
        wait_until(|| self.analysis_calls() >= count).await;
    }
}

#[async_trait]
impl BuildBackend for FakeBackend {
    async fn trigger_build(&self, _project: &ProjectId) -> Result<JobRef, BackendError> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.build_gate {
            gate.notified().await;
        }
        self.build.clone()
    }

    async fn dispatch_command(
        &self,
        project: &ProjectId,
        _command: &UiActionCommand,
    ) -> Result<JobRef, BackendError> {
        Ok(JobRef {
            id: JobId::new("cmd-1"),
            project_id: Some(project.clone()),
            kind: Some("UI_ACTION".to_string()),
            status: Some("QUEUED".to_string()),
        })
    }

    async fn analyze_logs(&self, logs: String) -> Result<AnalysisResult, BackendError> {
        self.analyzed.lock().unwrap().push(logs);
        self.analysis_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.analysis_gate {
            gate.notified().await;
        }
        let next = self.analysis.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(sample_analysis()))
    }
}

/// Backend side of one scripted channel.
pub(crate) struct RemoteEnd {
    events: mpsc::Sender<ChannelEvent>,
    frames: mpsc::Receiver<String>,
}

impl RemoteEnd {
    pub(crate) async fn send_text(&self, text: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Text(text.into())).await;
    }

    pub(crate) async fn log_chunk(&self, chunk: &str) {
        let frame = serde_json::json!({"type": "LOG_CHUNK", "payload": {"chunk": chunk}});
        self.send_text(frame.to_string()).await;
    }

    pub(crate) async fn job_update(&self, job_id: &str, status: &str) {
        let frame = serde_json::json!({
            "type": "JOB_UPDATE",
            "payload": {"job_id": job_id, "status": status}
        });
        self.send_text(frame.to_string()).await;
    }

    pub(crate) async fn close(&self) {
        let _ = self.events.send(ChannelEvent::Closed(None)).await;
    }

    pub(crate) async fn fail(&self, reason: &str) {
        let _ = self.events.send(ChannelEvent::Failed(reason.to_string())).await;
    }

    /// Next frame the client sent, or `None` once the client closed its side.
    pub(crate) async fn next_frame(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("client frame in time")
    }
}

pub(crate) struct ScriptedConnector {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    failure: Option<TransportError>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (
            Self {
                remotes,
                failure: None,
            },
            rx,
        )
    }

    pub(crate) fn refusing(reason: &str) -> Self {
        let (remotes, _rx) = mpsc::unbounded_channel();
        Self {
            remotes,
            failure: Some(TransportError::Connect(reason.to_string())),
        }
    }
}

#[async_trait]
impl ChannelConnector for ScriptedConnector {
    async fn open(&self, _url: &Url) -> Result<ChannelHandle, TransportError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(1024);
        self.remotes
            .send(RemoteEnd {
                events: in_tx,
                frames: out_rx,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(ChannelHandle {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
