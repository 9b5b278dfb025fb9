use crate::connection::{ConnectionState, LINE_INITIALIZING};
use devair_core::status::STATUS_CONNECTING;
use devair_core::wire::{AiStagePayload, AnalysisResult};
use devair_core::{JobId, JobStatus, LogTranscript, Project};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Change notifications for presentation layers, emitted in the same order
/// the state was mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Line(String),
    Status(String),
    Connection(ConnectionState),
    JobCorrelated(JobId),
    AiStage(AiStagePayload),
    AnalysisStarted,
    AnalysisReady(AnalysisResult),
    AnalysisFailed(String),
}

/// Point-in-time copy of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub project: Project,
    pub connection: ConnectionState,
    pub status: String,
    pub transcript: Vec<String>,
    pub correlated_job: Option<JobId>,
    pub ai_stage: Option<AiStagePayload>,
    pub analysis: Option<AnalysisResult>,
    pub analysis_in_flight: bool,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    project: Project,
    connection: ConnectionState,
    transcript: LogTranscript,
    status: JobStatus,
    correlated_job: Option<JobId>,
    ai_stage: Option<AiStagePayload>,
    analysis: Option<AnalysisResult>,
}

/// Write access to the state while the lock is held. Every change is
/// mirrored to the event feed.
pub(crate) struct Mutation<'a> {
    state: &'a mut SessionState,
    events: &'a mpsc::UnboundedSender<SessionEvent>,
}

impl Mutation<'_> {
    pub(crate) fn append(&mut self, line: impl Into<String>) {
        let line = line.into();
        self.state.transcript.append(line.clone());
        let _ = self.events.send(SessionEvent::Line(line));
    }

    pub(crate) fn set_status(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.state.status.set(label.clone());
        let _ = self.events.send(SessionEvent::Status(label));
    }

    pub(crate) fn set_connection(&mut self, next: ConnectionState) {
        if self.state.connection == next {
            return;
        }
        self.state.connection = next;
        let _ = self.events.send(SessionEvent::Connection(next));
    }

    pub(crate) fn connection(&self) -> ConnectionState {
        self.state.connection
    }

    pub(crate) fn correlated_job(&self) -> Option<&JobId> {
        self.state.correlated_job.as_ref()
    }

    /// Record the build job for this connection. Set once.
    pub(crate) fn correlate(&mut self, job: JobId) -> bool {
        if self.state.correlated_job.is_some() {
            return false;
        }
        self.state.correlated_job = Some(job.clone());
        let _ = self.events.send(SessionEvent::JobCorrelated(job));
        true
    }

    pub(crate) fn set_ai_stage(&mut self, stage: AiStagePayload) {
        self.state.ai_stage = Some(stage.clone());
        let _ = self.events.send(SessionEvent::AiStage(stage));
    }

    /// Drop the previous result and return the transcript payload.
    pub(crate) fn begin_analysis(&mut self) -> String {
        self.state.analysis = None;
        let _ = self.events.send(SessionEvent::AnalysisStarted);
        self.state.transcript.joined()
    }

    pub(crate) fn finish_analysis(&mut self, result: AnalysisResult) {
        self.state.analysis = Some(result.clone());
        let _ = self.events.send(SessionEvent::AnalysisReady(result));
    }

    pub(crate) fn fail_analysis(&mut self, reason: String) {
        self.state.analysis = None;
        let _ = self.events.send(SessionEvent::AnalysisFailed(reason));
    }
}

/// State shared between the session handle, the connection driver and the
/// request tasks.
///
/// `session` is cancelled on teardown. `channel` is its child and is also
/// cancelled when the connection reaches a terminal state; connection-scoped
/// continuations check it under the lock so nothing lands after that point.
#[derive(Debug)]
pub(crate) struct SessionCore {
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    session: CancellationToken,
    channel: CancellationToken,
}

impl SessionCore {
    pub(crate) fn new(
        project: Project,
        connection: ConnectionState,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let session = CancellationToken::new();
        let channel = session.child_token();
        Self {
            state: Mutex::new(SessionState {
                project,
                connection,
                transcript: LogTranscript::new(),
                status: JobStatus::new(),
                correlated_job: None,
                ai_stage: None,
                analysis: None,
            }),
            events,
            session,
            channel,
        }
    }

    /// Fresh session state for a connection that is about to be opened.
    pub(crate) fn connecting(project: Project, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        let _ = events.send(SessionEvent::Connection(ConnectionState::Connecting));
        let _ = events.send(SessionEvent::Status(STATUS_CONNECTING.to_string()));
        let _ = events.send(SessionEvent::Line(LINE_INITIALIZING.to_string()));
        let mut core = Self::new(project, ConnectionState::Connecting, events);
        core.state.get_mut().transcript.append(LINE_INITIALIZING);
        core
    }

    pub(crate) fn session_token(&self) -> &CancellationToken {
        &self.session
    }

    pub(crate) fn channel_token(&self) -> &CancellationToken {
        &self.channel
    }

    /// Apply a connection-scoped change. Returns `None` once the connection
    /// is finished or the session torn down.
    pub(crate) async fn mutate_channel<R>(&self, f: impl FnOnce(&mut Mutation<'_>) -> R) -> Option<R> {
        let mut state = self.state.lock().await;
        if self.channel.is_cancelled() {
            return None;
        }
        let mut mutation = Mutation {
            state: &mut *state,
            events: &self.events,
        };
        Some(f(&mut mutation))
    }

    /// Apply a session-scoped change. Returns `None` after teardown.
    pub(crate) async fn mutate_session<R>(&self, f: impl FnOnce(&mut Mutation<'_>) -> R) -> Option<R> {
        let mut state = self.state.lock().await;
        if self.session.is_cancelled() {
            return None;
        }
        let mut mutation = Mutation {
            state: &mut *state,
            events: &self.events,
        };
        Some(f(&mut mutation))
    }

    /// Move the connection to a terminal state with its closing line, then
    /// stop all further connection-scoped changes.
    pub(crate) async fn finish_channel(&self, terminal: ConnectionState, line: &str) -> bool {
        let mut state = self.state.lock().await;
        if self.channel.is_cancelled() {
            return false;
        }
        let mut mutation = Mutation {
            state: &mut *state,
            events: &self.events,
        };
        mutation.append(line);
        mutation.set_connection(terminal);
        self.channel.cancel();
        true
    }

    /// Record a local teardown. A connection that has not already ended moves
    /// to `Closed` without a transcript line.
    pub(crate) async fn close_local(&self) {
        let mut state = self.state.lock().await;
        let mut mutation = Mutation {
            state: &mut *state,
            events: &self.events,
        };
        if !mutation.connection().is_terminal() {
            mutation.set_connection(ConnectionState::Closed);
        }
        self.channel.cancel();
    }

    pub(crate) async fn snapshot(&self, analysis_in_flight: bool) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            project: state.project.clone(),
            connection: state.connection,
            status: state.status.current().to_string(),
            transcript: state.transcript.snapshot(),
            correlated_job: state.correlated_job.clone(),
            ai_stage: state.ai_stage.clone(),
            analysis: state.analysis.clone(),
            analysis_in_flight,
        }
    }
}
