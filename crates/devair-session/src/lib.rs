//! Client side of a live build session: the real-time channel, the build
//! trigger, job status tracking and single-flight log analysis.

pub mod analysis;
pub mod backend;
pub mod channel;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod session;
mod state;

#[cfg(test)]
mod testing;

pub use analysis::AnalysisRequester;
pub use backend::{BuildBackend, HttpBackend};
pub use channel::{ChannelConnector, ChannelEvent, ChannelHandle, WebSocketConnector};
pub use config::SessionConfig;
pub use connection::ConnectionState;
pub use correlator::BuildCorrelator;
pub use error::{BackendError, SessionError, TransportError};
pub use session::LiveBuildSession;
pub use state::{SessionEvent, SessionSnapshot};
