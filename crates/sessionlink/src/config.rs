//! Client configuration.
//!
//! Loaded from an optional TOML file with `SESSIONLINK__SECTION__KEY`
//! environment overrides layered on top.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use sessionlink_protocol::{DEFAULT_NAMESPACE, SESSION_LINK_PATH, SOCKET_PATH, engine_io_query};
use thiserror::Error;

use crate::transition::ReentryPolicy;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SESSIONLINK";

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Largest accepted timeout, in seconds.
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Largest accepted delay, in milliseconds.
const MAX_DELAY_MS: u64 = MAX_TIMEOUT_SECS * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid base url {url:?}: expected http:// or https://")]
    InvalidBaseUrl { url: String },

    #[error("{key} = {value} is out of range (max {max})")]
    OutOfRange {
        key: &'static str,
        value: u64,
        max: u64,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub link: LinkConfig,
    pub transition: TransitionConfig,
    pub logging: LoggingConfig,
}

/// Where the application server lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Origin of the application server, e.g. `http://localhost:3000`.
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Realtime transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub path: String,
    pub namespace: String,
    /// Base delay for exponential reconnect backoff (milliseconds).
    pub reconnect_base_ms: u64,
    /// Upper bound for the reconnect delay (milliseconds).
    pub reconnect_max_ms: u64,
    /// Consecutive failed attempts before giving up; 0 retries forever.
    pub max_reconnect_attempts: u32,
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path: SOCKET_PATH.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
            max_reconnect_attempts: 0,
            connect_timeout_secs: 10,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Session link handshake settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub path: String,
    pub timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            path: SESSION_LINK_PATH.to_string(),
            timeout_secs: 10,
        }
    }
}

impl LinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Page transition settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Delay between showing the pending indicator and navigating.
    pub default_delay_ms: u64,
    pub reentry: ReentryPolicy,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 200,
            reentry: ReentryPolicy::default(),
        }
    }
}

impl TransitionConfig {
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        let built = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: ClientConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let built = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        let config: ClientConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Render the default configuration as TOML.
    pub fn default_toml() -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&ClientConfig::default())?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let url = self.server.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl {
                url: url.to_string(),
            });
        }

        check_range(
            "transport.connect_timeout_secs",
            self.transport.connect_timeout_secs,
            MAX_TIMEOUT_SECS,
        )?;
        check_range("link.timeout_secs", self.link.timeout_secs, MAX_TIMEOUT_SECS)?;
        check_range(
            "transport.reconnect_base_ms",
            self.transport.reconnect_base_ms,
            MAX_DELAY_MS,
        )?;
        check_range(
            "transport.reconnect_max_ms",
            self.transport.reconnect_max_ms,
            MAX_DELAY_MS,
        )?;
        check_range(
            "transition.default_delay_ms",
            self.transition.default_delay_ms,
            MAX_DELAY_MS,
        )?;
        Ok(())
    }

    fn base_url(&self) -> &str {
        self.server.base_url.trim_end_matches('/')
    }

    /// Websocket URL of the realtime endpoint, including the Engine.IO query.
    pub fn websocket_url(&self) -> String {
        let base = self.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        let path = self.transport.path.trim_end_matches('/');
        format!("{ws_base}{path}/?{}", engine_io_query())
    }

    /// URL of the session link call.
    pub fn link_url(&self) -> String {
        format!("{}{}", self.base_url(), self.link.path)
    }
}

fn check_range(key: &'static str, value: u64, max: u64) -> ConfigResult<()> {
    if value > max {
        return Err(ConfigError::OutOfRange { key, value, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_endpoints() {
        let config = ClientConfig::default();
        assert_eq!(
            config.websocket_url(),
            "ws://localhost:3000/api/socket/io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            config.link_url(),
            "http://localhost:3000/api/socket/session/link"
        );
        assert_eq!(config.transition.default_delay(), Duration::from_millis(200));
        assert_eq!(config.transition.reentry, ReentryPolicy::Replace);
    }

    #[test]
    fn secure_origin_uses_wss() {
        let mut config = ClientConfig::default();
        config.server.base_url = "https://app.example.com/".to_string();
        assert_eq!(
            config.websocket_url(),
            "wss://app.example.com/api/socket/io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            config.link_url(),
            "https://app.example.com/api/socket/session/link"
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            [server]
            base_url = "http://127.0.0.1:8080"

            [transition]
            default_delay_ms = 300
            reentry = "ignore"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.transition.default_delay_ms, 300);
        assert_eq!(config.transition.reentry, ReentryPolicy::Ignore);
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(config.link.path, SESSION_LINK_PATH);
    }

    #[test]
    fn rejects_non_http_origin() {
        let err = ClientConfig::from_toml("[server]\nbase_url = \"ftp://host\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn rejects_oversized_timeouts() {
        let err = ClientConfig::from_toml("[transport]\nconnect_timeout_secs = 9223372036854775807\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                key: "transport.connect_timeout_secs",
                ..
            }
        ));

        let err = ClientConfig::from_toml("[transport]\nreconnect_base_ms = 999999999999\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                key: "transport.reconnect_base_ms",
                ..
            }
        ));
    }

    #[test]
    fn default_toml_round_trips() {
        let text = ClientConfig::default_toml().unwrap();
        assert_eq!(ClientConfig::from_toml(&text).unwrap(), ClientConfig::default());
    }
}
