use devair_core::wire::DEFAULT_MAX_FRAME_BYTES;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CHANNEL_QUEUE: usize = 256;

/// Endpoints and limits for one live build session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_url: Url,
    pub ws_url: Url,
    pub request_timeout: Duration,
    pub max_frame_bytes: usize,
    pub channel_queue: usize,
}

impl SessionConfig {
    /// Config for a backend at `api_url`, with the channel at `/ws` on the same host.
    pub fn for_api(api_url: Url) -> Result<Self, url::ParseError> {
        let ws_url = derive_ws_url(&api_url)?;
        Ok(Self {
            api_url,
            ws_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            channel_queue: DEFAULT_CHANNEL_QUEUE,
        })
    }

    pub fn with_ws_url(mut self, ws_url: Url) -> Self {
        self.ws_url = ws_url;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let api_url = Url::parse(DEFAULT_API_URL).expect("valid default url");
        Self::for_api(api_url).expect("valid default ws url")
    }
}

/// Map `http(s)://host[:port]/...` to `ws(s)://host[:port]/ws`.
pub fn derive_ws_url(api_url: &Url) -> Result<Url, url::ParseError> {
    let scheme = match api_url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let host = api_url.host_str().unwrap_or("localhost");
    let authority = match api_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Url::parse(&format!("{scheme}://{authority}/ws"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_local_backend() {
        let config = SessionConfig::default();
        assert_eq!(config.api_url.as_str(), "http://localhost:8080/");
        assert_eq!(config.ws_url.as_str(), "ws://localhost:8080/ws");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn ws_url_follows_api_scheme() {
        let secure = Url::parse("https://builds.example.com/api").unwrap();
        assert_eq!(
            derive_ws_url(&secure).unwrap().as_str(),
            "wss://builds.example.com/ws"
        );
        let plain = Url::parse("http://127.0.0.1:9000").unwrap();
        assert_eq!(derive_ws_url(&plain).unwrap().as_str(), "ws://127.0.0.1:9000/ws");
    }
}
