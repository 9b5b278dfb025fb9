use crate::backend::BuildBackend;
use crate::error::SessionError;
use crate::state::SessionCore;
use devair_core::wire::AnalysisResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Single-flight log analysis for one session.
///
/// At most one request is outstanding. The in-flight flag is released on
/// success, on failure and when the request future is dropped.
pub struct AnalysisRequester {
    core: Arc<SessionCore>,
    backend: Arc<dyn BuildBackend>,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AnalysisRequester {
    pub(crate) fn new(core: Arc<SessionCore>, backend: Arc<dyn BuildBackend>) -> Self {
        Self {
            core,
            backend,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn request(&self) -> Result<AnalysisResult, SessionError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(event = "analysis_rejected");
            return Err(SessionError::AnalysisInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let logs = self
            .core
            .mutate_session(|m| m.begin_analysis())
            .await
            .ok_or(SessionError::SessionClosed)?;
        info!(event = "analysis_requested", bytes = logs.len());

        let token = self.core.session_token().clone();
        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(SessionError::SessionClosed),
            outcome = self.backend.analyze_logs(logs) => outcome,
        };

        match outcome {
            Ok(result) => {
                info!(event = "analysis_ready", confidence = result.confidence);
                self.core
                    .mutate_session(|m| m.finish_analysis(result.clone()))
                    .await
                    .ok_or(SessionError::SessionClosed)?;
                Ok(result)
            }
            Err(err) => {
                warn!(event = "analysis_failed", error = %err);
                let reason = err.to_string();
                self.core.mutate_session(|m| m.fail_analysis(reason)).await;
                Err(SessionError::Analysis(err))
            }
        }
    }
}
