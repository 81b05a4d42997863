//! Process configuration from the environment.

use std::{net::SocketAddr, time::Duration};

use live_relay_gemini::DEFAULT_API_VERSION;
use thiserror::Error;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-live-001";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Server settings.
#[derive(Clone)]
pub struct ServerConfig {
    pub api_key: String,
    pub addr: SocketAddr,
    pub model: String,
    pub api_version: String,
    pub tool_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("model", &self.model)
            .field("api_version", &self.api_version)
            .field("tool_timeout", &self.tool_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load `.env` (if present) and read the process environment.
    ///
    /// # Errors
    /// Returns error if `GOOGLE_API_KEY` is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to load .env: {e}");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns error if `GOOGLE_API_KEY` is missing or a value is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("GOOGLE_API_KEY").ok_or(ConfigError::Missing("GOOGLE_API_KEY"))?;

        let addr_raw = get("LIVE_RELAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "LIVE_RELAY_ADDR",
            value: addr_raw.clone(),
        })?;

        Ok(Self {
            api_key,
            addr,
            model: get("LIVE_RELAY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_version: get("LIVE_RELAY_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            tool_timeout: seconds(
                get("LIVE_RELAY_TOOL_TIMEOUT_SECS"),
                "LIVE_RELAY_TOOL_TIMEOUT_SECS",
            )?,
            write_timeout: seconds(
                get("LIVE_RELAY_WRITE_TIMEOUT_SECS"),
                "LIVE_RELAY_WRITE_TIMEOUT_SECS",
            )?,
        })
    }
}

fn seconds(raw: Option<String>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid { key, value })
    })
    .transpose()
}
