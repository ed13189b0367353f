//! Client configuration.
//!
//! Every value resolves in the same order: build-time env, runtime env
//! (including a `.env` file), then the built-in default.

use std::time::Duration;

use garde::Validate;
use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::error::{ChatError, Result};

const DEFAULT_SERVER_URL: &str = "ws://localhost:9001";
const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1/";
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
const DEFAULT_RECONNECT_CAP_MS: u64 = 30_000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

fn validate_ws_scheme(value: &str, _ctx: &()) -> garde::Result {
    if value.starts_with("ws://") || value.starts_with("wss://") {
        Ok(())
    } else {
        Err(garde::Error::new("messaging endpoint must use ws:// or wss://"))
    }
}

fn validate_http_scheme(value: &str, _ctx: &()) -> garde::Result {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(garde::Error::new("API endpoint must use http:// or https://"))
    }
}

/// Reconnect timing for a dropped messaging connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// `None` retries until teardown
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            cap: Duration::from_millis(DEFAULT_RECONNECT_CAP_MS),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base, self.cap)
    }
}

#[derive(Debug, Clone, Validate)]
#[garde(context(()))]
pub struct ClientConfig {
    /// WebSocket endpoint of the messaging server
    #[garde(url, custom(validate_ws_scheme))]
    pub server_url: String,
    /// Base URL of the REST API; conversation paths are joined onto it
    #[garde(url, custom(validate_http_scheme))]
    pub api_url: String,
    #[garde(range(min = 1, max = 100))]
    pub page_size: u32,
    #[garde(skip)]
    pub reconnect: ReconnectPolicy,
    #[garde(skip)]
    pub handshake_timeout: Duration,
    #[garde(skip)]
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_url = option_env!("PARLEY_SERVER_URL")
            .map(String::from)
            .or_else(|| lookup("PARLEY_SERVER_URL"))
            .unwrap_or(defaults.server_url);
        let api_url = option_env!("PARLEY_API_URL")
            .map(String::from)
            .or_else(|| lookup("PARLEY_API_URL"))
            .unwrap_or(defaults.api_url);

        let page_size = parse_var(&lookup, "PARLEY_PAGE_SIZE")?.unwrap_or(defaults.page_size);
        let base_ms = parse_var(&lookup, "PARLEY_RECONNECT_BASE_MS")?
            .unwrap_or(DEFAULT_RECONNECT_BASE_MS);
        let cap_ms =
            parse_var(&lookup, "PARLEY_RECONNECT_CAP_MS")?.unwrap_or(DEFAULT_RECONNECT_CAP_MS);
        let max_attempts = parse_var(&lookup, "PARLEY_RECONNECT_MAX_ATTEMPTS")?;
        let handshake_ms = parse_var(&lookup, "PARLEY_HANDSHAKE_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS);
        let request_ms = parse_var(&lookup, "PARLEY_REQUEST_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

        let config = Self {
            server_url,
            api_url,
            page_size,
            reconnect: ReconnectPolicy {
                base: Duration::from_millis(base_ms),
                cap: Duration::from_millis(cap_ms),
                max_attempts,
            },
            handshake_timeout: Duration::from_millis(handshake_ms),
            request_timeout: Duration::from_millis(request_ms),
        };
        config.check()?;

        info!(
            server_url = %config.server_url,
            api_url = %config.api_url,
            page_size = config.page_size,
            "Client configuration loaded"
        );
        Ok(config)
    }

    /// Validate field formats and cross-field constraints.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| ChatError::Config(e.to_string()))?;

        if self.reconnect.base.is_zero() {
            return Err(ChatError::Config(
                "reconnect base delay must be positive".to_string(),
            ));
        }
        if self.reconnect.cap < self.reconnect.base {
            return Err(ChatError::Config(format!(
                "reconnect cap ({:?}) is below base ({:?})",
                self.reconnect.cap, self.reconnect.base
            )));
        }
        if self.handshake_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ChatError::Config("timeouts must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ChatError::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}
