//! Server configuration.
//!
//! Everything the core would otherwise hard-code (listen address, backlog,
//! heartbeat interval, retry budgets, credential limits) comes from a
//! [`ServerConfig`], loaded from TOML. Every section has defaults, so a
//! partial file, or no file at all, is fine.
//!
//! ```toml
//! [network]
//! port = 4000
//!
//! [handshake]
//! game_name = "Orcs and Ogres"
//! username_attempts = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use mudgate_heartbeat::HeartbeatConfig;
use mudgate_session::{CredentialLimits, DEFAULT_SEND_TIMEOUT, REGISTRY_NAME, RegistryConfig};
use mudgate_transport::ConnectionConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkSettings,
    pub heartbeat: HeartbeatSettings,
    pub connection: ConnectionSettings,
    pub handshake: HandshakeSettings,
    pub accounts: AccountSettings,
    pub logging: LoggingSettings,
}

/// Where and how to listen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub bind_address: String,
    pub port: u16,
    /// Pending-connection queue length passed to `listen`.
    pub backlog: u32,
    /// Consecutive accept errors after which the listener gives up.
    pub max_consecutive_accept_failures: u32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9998,
            backlog: 10,
            max_consecutive_accept_failures: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_ms: u64,
    /// Fraction of the interval a sweep may use before a warning is logged.
    pub budget_warn_threshold: f64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            budget_warn_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub terminal_width: usize,
    pub read_buffer_size: usize,
    /// A player who does not take a broadcast within this long is dropped.
    pub send_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            terminal_width: defaults.terminal_width,
            read_buffer_size: defaults.read_buffer_size,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Login prompts and retry budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeSettings {
    /// Shown in the greeting.
    pub game_name: String,
    pub username_attempts: u32,
    /// Attempts to choose a password for a new account.
    pub new_password_attempts: u32,
    /// Attempts to enter the password of an existing account.
    pub password_attempts: u32,
    /// Seconds to wait for each answer; 0 waits forever.
    pub prompt_timeout_secs: u64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            game_name: "ORC".to_string(),
            username_attempts: 5,
            new_password_attempts: 3,
            password_attempts: 5,
            prompt_timeout_secs: 120,
        }
    }
}

impl HandshakeSettings {
    pub fn prompt_timeout(&self) -> Option<Duration> {
        (self.prompt_timeout_secs > 0).then(|| Duration::from_secs(self.prompt_timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    pub username_max_len: usize,
    pub password_min_len: usize,
    pub password_max_len: usize,
    /// Comma or newline separated list of forbidden name fragments.
    pub banned_names_file: Option<PathBuf>,
    /// Directory for account files; accounts are kept in memory if unset.
    pub storage_dir: Option<PathBuf>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        let limits = CredentialLimits::default();
        Self {
            username_max_len: limits.username_max_len,
            password_min_len: limits.password_min_len,
            password_max_len: limits.password_max_len,
            banned_names_file: None,
            storage_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` expression). `RUST_LOG` takes precedence.
    pub level: String,
    /// Optional log file, written in addition to stdout.
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.network.bind_address.trim().is_empty() {
            return invalid("network.bind_address must not be empty");
        }
        if self.network.backlog == 0 {
            return invalid("network.backlog must be at least 1");
        }
        if self.heartbeat.interval_ms == 0 {
            return invalid("heartbeat.interval_ms must be at least 1");
        }
        if !(self.heartbeat.budget_warn_threshold > 0.0) {
            return invalid("heartbeat.budget_warn_threshold must be positive");
        }
        if self.connection.terminal_width == 0 {
            return invalid("connection.terminal_width must be at least 1");
        }
        if self.connection.read_buffer_size == 0 {
            return invalid("connection.read_buffer_size must be at least 1");
        }
        if self.connection.send_timeout_ms == 0 {
            return invalid("connection.send_timeout_ms must be at least 1");
        }
        let handshake = &self.handshake;
        if handshake.username_attempts == 0
            || handshake.new_password_attempts == 0
            || handshake.password_attempts == 0
        {
            return invalid("handshake attempt budgets must be at least 1");
        }
        if self.accounts.username_max_len == 0 {
            return invalid("accounts.username_max_len must be at least 1");
        }
        if self.accounts.password_min_len > self.accounts.password_max_len {
            return invalid("accounts.password_min_len exceeds accounts.password_max_len");
        }
        Ok(())
    }

    /// `address:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.port)
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            budget_warn_threshold: self.heartbeat.budget_warn_threshold,
            ..HeartbeatConfig::with_interval_ms(self.heartbeat.interval_ms)
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            terminal_width: self.connection.terminal_width,
            read_buffer_size: self.connection.read_buffer_size,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            name: REGISTRY_NAME.to_string(),
            send_timeout: Duration::from_millis(self.connection.send_timeout_ms),
        }
    }

    pub fn credential_limits(&self) -> CredentialLimits {
        CredentialLimits {
            username_max_len: self.accounts.username_max_len,
            password_min_len: self.accounts.password_min_len,
            password_max_len: self.accounts.password_max_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:9998");
        assert_eq!(config.network.backlog, 10);
        assert_eq!(config.heartbeat.interval_ms, 500);
        assert_eq!(config.connection.terminal_width, 80);
        assert_eq!(config.registry_config().send_timeout, Duration::from_secs(5));
        assert_eq!(config.handshake.username_attempts, 5);
        assert_eq!(config.handshake.new_password_attempts, 3);
        assert_eq!(config.handshake.password_attempts, 5);
        assert_eq!(config.accounts.username_max_len, 14);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = ServerConfig::parse(
            r#"
            [network]
            port = 4000

            [handshake]
            username_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.network.port, 4000);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.handshake.username_attempts, 2);
        assert_eq!(config.handshake.password_attempts, 5);
    }

    #[test]
    fn test_prompt_timeout_zero_disables() {
        let mut settings = HandshakeSettings::default();
        assert_eq!(settings.prompt_timeout(), Some(Duration::from_secs(120)));
        settings.prompt_timeout_secs = 0;
        assert_eq!(settings.prompt_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_unusable_limits() {
        let mut config = ServerConfig::default();
        config.handshake.password_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServerConfig::default();
        config.heartbeat.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.accounts.password_min_len = 30;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.connection.terminal_width = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.connection.send_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_value_type_is_parse_error() {
        assert!(ServerConfig::parse("[network]\nport = \"high\"").is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[tokio::test]
    async fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[network\n").unwrap();

        let err = ServerConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
