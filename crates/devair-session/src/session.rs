use crate::analysis::AnalysisRequester;
use crate::backend::{BuildBackend, HttpBackend};
use crate::channel::{ChannelConnector, WebSocketConnector};
use crate::config::SessionConfig;
use crate::connection::{ConnectionDriver, ConnectionState};
use crate::correlator::BuildCorrelator;
use crate::error::{BackendError, SessionError};
use crate::state::{SessionCore, SessionEvent, SessionSnapshot};
use devair_core::wire::AnalysisResult;
use devair_core::Project;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Live view of one project's build.
///
/// Opening a session starts connecting right away. Dropping the handle or
/// calling [`LiveBuildSession::close`] tears it down. The channel is closed
/// and the connection recorded as `Closed` unless it had already ended.
/// Pending requests are cancelled and no later callback touches the transcript.
///
/// The event receiver returned on open mirrors every change. Drain it or
/// drop it; a receiver that is kept but never read buffers every line.
pub struct LiveBuildSession {
    project: Project,
    core: Arc<SessionCore>,
    analysis: AnalysisRequester,
    driver: Option<JoinHandle<()>>,
}

impl LiveBuildSession {
    /// Open a session against the HTTP backend and websocket channel in `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        project: Project,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), BackendError> {
        let backend = HttpBackend::new(config.api_url.clone(), config.request_timeout)?;
        let connector = WebSocketConnector::new(config.channel_queue);
        Ok(Self::open(
            project,
            config,
            Arc::new(backend),
            Arc::new(connector),
        ))
    }

    /// Open a session with explicit backend and transport implementations.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        project: Project,
        config: SessionConfig,
        backend: Arc<dyn BuildBackend>,
        connector: Arc<dyn ChannelConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let core = Arc::new(SessionCore::connecting(project.clone(), events_tx));

        info!(
            event = "session_open",
            project_id = %project.id,
            project = project.display_name(),
            ws_url = %config.ws_url
        );

        let correlator = Arc::new(BuildCorrelator::new(
            core.clone(),
            backend.clone(),
            project.id.clone(),
        ));
        let driver = ConnectionDriver {
            project_id: project.id.clone(),
            core: core.clone(),
            connector,
            correlator,
            config,
        };
        let driver = tokio::spawn(driver.run());
        let analysis = AnalysisRequester::new(core.clone(), backend);

        (
            Self {
                project,
                core,
                analysis,
                driver: Some(driver),
            },
            events_rx,
        )
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.core.snapshot(self.analysis.is_in_flight()).await
    }

    pub async fn transcript(&self) -> Vec<String> {
        self.snapshot().await.transcript
    }

    pub async fn status(&self) -> String {
        self.snapshot().await.status
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.snapshot().await.connection
    }

    /// Ask the backend to analyze the current transcript.
    ///
    /// Returns [`SessionError::AnalysisInFlight`] without side effects while
    /// another request is outstanding.
    pub async fn request_analysis(&self) -> Result<AnalysisResult, SessionError> {
        self.analysis.request().await
    }

    pub fn analysis_in_flight(&self) -> bool {
        self.analysis.is_in_flight()
    }

    pub fn is_closed(&self) -> bool {
        self.core.session_token().is_cancelled()
    }

    /// Wait until the connection reaches a terminal state or the session is
    /// torn down.
    pub async fn finished(&mut self) {
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }

    /// Tear the session down. Idempotent.
    pub fn close(&self) {
        if !self.core.session_token().is_cancelled() {
            info!(event = "session_close", project_id = %self.project.id);
            self.core.session_token().cancel();
        }
    }
}

impl Drop for LiveBuildSession {
    fn drop(&mut self) {
        self.core.session_token().cancel();
    }
}
