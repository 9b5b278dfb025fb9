use crate::backend::BuildBackend;
use crate::error::SessionError;
use crate::state::SessionCore;
use devair_core::status::{STATUS_BUILD_STARTED, STATUS_ERROR};
use devair_core::{JobId, ProjectId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Issues the build request for a connection and ties the returned job to it.
///
/// Fires at most once. The response is applied only while the connection is
/// still live; a reply that lands after close or teardown is discarded.
pub struct BuildCorrelator {
    core: Arc<SessionCore>,
    backend: Arc<dyn BuildBackend>,
    project_id: ProjectId,
    fired: AtomicBool,
}

impl BuildCorrelator {
    pub(crate) fn new(
        core: Arc<SessionCore>,
        backend: Arc<dyn BuildBackend>,
        project_id: ProjectId,
    ) -> Self {
        Self {
            core,
            backend,
            project_id,
            fired: AtomicBool::new(false),
        }
    }

    pub async fn trigger(&self) -> Result<JobId, SessionError> {
        if self.fired.swap(true, Ordering::AcqRel) {
            return Err(SessionError::BuildAlreadyTriggered);
        }
        let token = self.core.channel_token().clone();
        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(SessionError::SessionClosed),
            outcome = self.backend.trigger_build(&self.project_id) => outcome,
        };

        match outcome {
            Ok(job) => {
                info!(event = "build_triggered", project_id = %self.project_id, job_id = %job.id);
                let job_id = job.id;
                let applied = self
                    .core
                    .mutate_channel(|m| {
                        m.correlate(job_id.clone());
                        m.set_status(STATUS_BUILD_STARTED);
                        m.append(format!(">> Build Job Created: {job_id}"));
                    })
                    .await;
                match applied {
                    Some(()) => Ok(job_id),
                    None => Err(SessionError::SessionClosed),
                }
            }
            Err(err) => {
                warn!(event = "build_trigger_failed", project_id = %self.project_id, error = %err);
                self.core
                    .mutate_channel(|m| {
                        m.set_status(STATUS_ERROR);
                        m.append(format!(">> Failed to trigger build: {err}"));
                    })
                    .await;
                Err(SessionError::BuildTrigger(err))
            }
        }
    }
}
