//! Request/response calls to the build backend.

use crate::error::BackendError;
use async_trait::async_trait;
use devair_core::wire::{AnalysisRequest, AnalysisResult, ErrorBody, JobRef, UiActionCommand};
use devair_core::ProjectId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Start a build job for `project`.
    async fn trigger_build(&self, project: &ProjectId) -> Result<JobRef, BackendError>;

    /// Queue a remote UI command for the project's agent.
    async fn dispatch_command(
        &self,
        project: &ProjectId,
        command: &UiActionCommand,
    ) -> Result<JobRef, BackendError>;

    /// Submit a transcript for analysis.
    async fn analyze_logs(&self, logs: String) -> Result<AnalysisResult, BackendError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    api_url: Url,
}

impl HttpBackend {
    pub fn new(api_url: Url, timeout: Duration) -> Result<Self, BackendError> {
        if api_url.cannot_be_a_base() {
            return Err(BackendError::Endpoint(api_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("devair/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, api_url })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Endpoint(self.api_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<B, R>(&self, url: Url, body: Option<&B>) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        debug!(event = "backend_request", url = %url);
        let mut request = self.http.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }
        serde_json::from_str(&text).map_err(|err| BackendError::Decode(err.to_string()))
    }
}

#[async_trait]
impl BuildBackend for HttpBackend {
    async fn trigger_build(&self, project: &ProjectId) -> Result<JobRef, BackendError> {
        let url = self.endpoint(&["api", "projects", project.as_str(), "build"])?;
        let job: JobRef = self.post::<(), _>(url, None).await?;
        // A job without an id cannot be correlated with later updates.
        if job.id.as_str().trim().is_empty() {
            return Err(BackendError::Decode("job id is empty".to_string()));
        }
        Ok(job)
    }

    async fn dispatch_command(
        &self,
        project: &ProjectId,
        command: &UiActionCommand,
    ) -> Result<JobRef, BackendError> {
        let url = self.endpoint(&["api", "projects", project.as_str(), "ai-command"])?;
        self.post(url, Some(command)).await
    }

    async fn analyze_logs(&self, logs: String) -> Result<AnalysisResult, BackendError> {
        let url = self.endpoint(&["api", "ai", "analyze"])?;
        self.post(url, Some(&AnalysisRequest { logs })).await
    }
}

fn status_error(status: u16, body: &str) -> BackendError {
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.error.trim().is_empty() => parsed.error,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => format!("HTTP {status}"),
    };
    BackendError::Status { status, message }
}
