//! Hub client configuration.

use std::time::Duration;

use meridian_shared::HubError;
use url::Url;

use crate::hub::ReconnectConfig;

/// Hub endpoint used when `MERIDIAN_HUB_URL` is not set.
pub const DEFAULT_HUB_URL: &str = "wss://localhost:5001/worldhub";

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub endpoint (`ws`, `wss`, `http` or `https`).
    pub url: Url,
    pub reconnect: ReconnectConfig,
    /// Upper bound for negotiate + upgrade + protocol handshake.
    pub handshake_timeout: Duration,
    /// How long an invocation waits for the hub's completion.
    pub invocation_timeout: Duration,
    /// How long `stop()` waits for the socket to close gracefully.
    pub close_timeout: Duration,
    pub keep_alive_interval: Duration,
    /// Silence from the hub longer than this counts as a lost link.
    pub server_timeout: Duration,
    /// Connect the socket directly without `POST /negotiate`.
    pub skip_negotiation: bool,
}

impl HubConfig {
    pub fn new(url: &str) -> Result<Self, HubError> {
        let url = Url::parse(url).map_err(|e| HubError::Config(format!("hub url `{}`: {}", url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(HubError::Config(format!(
                "hub url scheme `{}` is not supported",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            reconnect: ReconnectConfig::default(),
            handshake_timeout: Duration::from_secs(15),
            invocation_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            skip_negotiation: false,
        })
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Read configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MERIDIAN_HUB_URL`: hub endpoint (default: `wss://localhost:5001/worldhub`)
    /// - `MERIDIAN_RECONNECT_MAX_ATTEMPTS`: attempts per reconnect episode (default: 5)
    /// - `MERIDIAN_RECONNECT_INITIAL_MS`: first backoff delay (default: 1000)
    /// - `MERIDIAN_RECONNECT_MAX_MS`: backoff cap (default: 30000)
    /// - `MERIDIAN_HANDSHAKE_TIMEOUT_MS`: handshake bound (default: 15000)
    /// - `MERIDIAN_INVOCATION_TIMEOUT_MS`: invocation bound (default: 30000)
    /// - `MERIDIAN_SKIP_NEGOTIATION`: "true" | "1" to connect directly (default: false)
    pub fn from_env() -> Result<Self, HubError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HubConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HubError> {
        let url = lookup("MERIDIAN_HUB_URL").unwrap_or_else(|| DEFAULT_HUB_URL.to_string());
        let mut config = Self::new(&url)?;

        if let Some(attempts) = parse_number(&lookup, "MERIDIAN_RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts = u32::try_from(attempts).map_err(|_| {
                HubError::Config("MERIDIAN_RECONNECT_MAX_ATTEMPTS is out of range".to_string())
            })?;
        }
        if let Some(ms) = parse_number(&lookup, "MERIDIAN_RECONNECT_INITIAL_MS")? {
            config.reconnect.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "MERIDIAN_RECONNECT_MAX_MS")? {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "MERIDIAN_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "MERIDIAN_INVOCATION_TIMEOUT_MS")? {
            config.invocation_timeout = Duration::from_millis(ms);
        }
        if let Some(flag) = lookup("MERIDIAN_SKIP_NEGOTIATION") {
            config.skip_negotiation = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if config.reconnect.max_delay < config.reconnect.initial_delay {
            return Err(HubError::Config(
                "MERIDIAN_RECONNECT_MAX_MS is smaller than MERIDIAN_RECONNECT_INITIAL_MS".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, HubError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| HubError::Config(format!("{} must be a non-negative integer, got `{}`", key, raw))),
    }
}
