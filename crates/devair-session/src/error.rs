use devair_core::ProtocolError;
use thiserror::Error;

/// Failure of a request/response call to the build backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("{message} (status {status})")]
    Status { status: u16, message: String },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Http(format!("timed out: {err}"))
        } else {
            BackendError::Http(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("channel connect failed: {0}")]
    Connect(String),
    #[error("channel send failed: {0}")]
    Send(String),
    #[error("channel closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("build trigger failed: {0}")]
    BuildTrigger(#[source] BackendError),
    #[error("analysis failed: {0}")]
    Analysis(#[source] BackendError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("an analysis request is already in flight")]
    AnalysisInFlight,
    #[error("build already triggered for this connection")]
    BuildAlreadyTriggered,
    #[error("session closed")]
    SessionClosed,
}
