use anyhow::{Context, Result};
use clap::Args;
use devair_session::config::{derive_ws_url, DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT};
use devair_session::SessionConfig;
use std::env;
use std::time::Duration;
use url::Url;

/// Settings shared by every subcommand. Empty flags fall back to `DEVAIR_*`
/// environment variables, then to built-in defaults.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Backend base URL (DEVAIR_API_URL)
    #[arg(long, global = true, default_value = "")]
    pub api_url: String,
    /// Real-time gateway URL (DEVAIR_WS_URL); defaults to <api-url>/ws
    #[arg(long, global = true, default_value = "")]
    pub ws_url: String,
    /// Per-request timeout in seconds (DEVAIR_REQUEST_TIMEOUT)
    #[arg(long, global = true, default_value_t = 0)]
    pub request_timeout: u64,
    /// Directory for the append-only log file (DEVAIR_LOG_DIR)
    #[arg(long, global = true, default_value = "")]
    pub log_dir: String,
    /// Mirror log records to stderr (DEVAIR_LOG_STDERR)
    #[arg(long, global = true, default_value_t = false)]
    pub log_stderr: bool,
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub session: SessionConfig,
    pub log_dir: String,
    pub log_stderr: bool,
    pub debug: bool,
}

pub fn load_config(args: &GlobalArgs) -> Result<RuntimeConfig> {
    let api_url = resolve_api_url(&args.api_url)?;
    let ws_url = resolve_ws_url(&args.ws_url, &api_url)?;
    let session = SessionConfig::for_api(api_url)
        .context("invalid backend URL")?
        .with_ws_url(ws_url)
        .with_request_timeout(resolve_request_timeout(args.request_timeout));
    Ok(RuntimeConfig {
        session,
        log_dir: resolve_log_dir(&args.log_dir),
        log_stderr: args.log_stderr || env_true("DEVAIR_LOG_STDERR"),
        debug: args.debug || env_true("DEVAIR_DEBUG"),
    })
}

fn flag_or_env(flag: &str, key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn resolve_api_url(flag: &str) -> Result<Url> {
    let raw = flag_or_env(flag, "DEVAIR_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let url = Url::parse(&raw).with_context(|| format!("invalid api url: {raw}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => anyhow::bail!("api url must be http or https, got {other}"),
    }
}

fn resolve_ws_url(flag: &str, api_url: &Url) -> Result<Url> {
    match flag_or_env(flag, "DEVAIR_WS_URL") {
        Some(raw) => {
            let url = Url::parse(&raw).with_context(|| format!("invalid ws url: {raw}"))?;
            match url.scheme() {
                "ws" | "wss" => Ok(url),
                other => anyhow::bail!("ws url must be ws or wss, got {other}"),
            }
        }
        None => derive_ws_url(api_url).context("cannot derive ws url from api url"),
    }
}

fn resolve_request_timeout(flag: u64) -> Duration {
    if flag > 0 {
        return Duration::from_secs(flag);
    }
    env::var("DEVAIR_REQUEST_TIMEOUT")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
}

fn resolve_log_dir(flag: &str) -> String {
    flag_or_env(flag, "DEVAIR_LOG_DIR").unwrap_or_else(|| ".devair/logs".to_string())
}

fn env_true(key: &str) -> bool {
    match env::var(key) {
        Ok(value) => parse_bool(&value).unwrap_or(false),
        Err(_) => false,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
