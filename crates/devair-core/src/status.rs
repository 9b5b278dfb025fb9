use serde::{Deserialize, Serialize};
use std::fmt;

pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_CONNECTED: &str = "Connected";
pub const STATUS_BUILD_STARTED: &str = "Build Started";
pub const STATUS_ERROR: &str = "Error";

/// Current job status label. Last write wins; no history is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    current: String,
    updates: u64,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            current: STATUS_CONNECTING.to_string(),
            updates: 0,
        }
    }
}

impl JobStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, label: impl Into<String>) {
        self.current = label.into();
        self.updates += 1;
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Number of writes since the session started.
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.current)
    }
}
