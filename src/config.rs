//! Client configuration.
//!
//! Generalizes the reference repo's `config.rs`, which loaded a single
//! `username`/`token` pair out of `./tuisen.toml` with the `toml` crate.
//! Here the same `toml` + `serde` pairing loads every option named in the
//! spec's external-interfaces section, with an equivalent all-defaults
//! struct-literal path for embedders who configure programmatically.

use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Twitch IRC login identity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Identity {
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
}

impl Identity {
    /// An anonymous `justinfan<digits>` identity.
    pub fn anonymous() -> Self {
        Identity::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    /// Normalized (lowercase) username, or a fresh `justinfan<digits>` nick.
    pub fn nick(&self) -> String {
        match &self.username {
            Some(username) => username.to_lowercase(),
            None => format!("justinfan{}", rand::random::<u32>() % 100_000),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(password) = &self.password {
            if !password.starts_with("oauth:") {
                return Err(Error::Configuration(
                    "identity.password must begin with \"oauth:\"".into(),
                ));
            }
        }
        Ok(())
    }
}

/// TCP/TLS connection tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub server: String,
    pub port: u16,
    pub secure: bool,
    pub reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub reconnect_decay: f64,
    pub max_reconnect_interval_ms: u64,
    pub max_reconnect_attempts: Option<u32>,
    pub timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            server: "irc.chat.twitch.tv".to_string(),
            port: 6697,
            secure: true,
            reconnect: true,
            reconnect_interval_ms: 1200,
            reconnect_decay: 1.5,
            max_reconnect_interval_ms: 30_000,
            max_reconnect_attempts: None,
            timeout_ms: 9999,
        }
    }
}

/// Log levels honored by `tracing_subscriber::EnvFilter` directives the
/// embedding application builds; the library itself only emits events
/// (see SPEC_FULL.md §10.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Fatal => tracing::Level::ERROR,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub messages_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            messages_level: LogLevel::Info,
        }
    }
}

/// Rate-limit floors for the three outbound queues (§4.5), in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub join_interval_ms: u64,
    pub message_interval_ms: u64,
    pub command_interval_ms: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        RateLimits {
            join_interval_ms: 2000,
            message_interval_ms: 1500,
            command_interval_ms: 150,
        }
    }
}

impl RateLimits {
    pub fn join_interval(&self) -> Duration {
        Duration::from_millis(self.join_interval_ms)
    }

    pub fn message_interval(&self) -> Duration {
        Duration::from_millis(self.message_interval_ms)
    }

    pub fn command_interval(&self) -> Duration {
        Duration::from_millis(self.command_interval_ms)
    }
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

/// Top-level client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub identity: Identity,
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
    pub rate_limits: RateLimits,
    pub channels: Vec<String>,
    pub command_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            identity: Identity::default(),
            connection: ConnectionConfig::default(),
            logging: LoggingConfig::default(),
            rate_limits: RateLimits::default(),
            channels: Vec::new(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// A config that connects anonymously to no channels, with Twitch defaults.
    pub fn new() -> Self {
        ClientConfig::default()
    }

    /// Load configuration from a TOML file, the way the reference `config.rs`
    /// loads `tuisen.toml`.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::Configuration(format!("config file not found: {}", path.display()))
            }
            _ => Error::Configuration(format!("failed to read {}: {e}", path.display())),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: ClientConfig =
            toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))?;
        if config.command_timeout_ms == 0 {
            config.command_timeout_ms = default_command_timeout_ms();
        }
        config.channels = config.channels.iter().map(|c| normalize_channel(c)).collect();
        config.identity.validate()?;
        Ok(config)
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.channels = channels
            .into_iter()
            .map(|c| normalize_channel(&c.into()))
            .collect();
        self
    }

    pub fn with_connection(mut self, edit: impl FnOnce(&mut ConnectionConfig)) -> Self {
        edit(&mut self.connection);
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.connection.reconnect_interval_ms)
    }

    pub fn max_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.connection.max_reconnect_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.timeout_ms)
    }
}

/// Canonicalize a channel name: lowercase, exactly one leading `#` (§3).
pub fn normalize_channel(channel: &str) -> String {
    let trimmed = channel.trim_start_matches('#');
    format!("#{}", trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_channel_names() {
        assert_eq!(normalize_channel("Forsen"), "#forsen");
        assert_eq!(normalize_channel("#Forsen"), "#forsen");
    }

    #[test]
    fn default_config_is_anonymous() {
        let config = ClientConfig::new();
        assert!(config.identity.is_anonymous());
        assert_eq!(config.connection.server, "irc.chat.twitch.tv");
        assert_eq!(config.connection.port, 6697);
        assert_eq!(config.command_timeout_ms, 10_000);
    }

    #[test]
    fn rejects_password_without_oauth_prefix() {
        let identity = Identity {
            username: Some("bot".into()),
            password: Some("notanoauthtoken".into()),
            client_id: None,
        };
        assert!(identity.validate().is_err());
    }

    #[test]
    fn parses_toml_config() {
        let text = r##"
            channels = ["Forsen", "#xqc"]
            command_timeout_ms = 5000

            [identity]
            username = "mybot"
            password = "oauth:abc123"

            [connection]
            secure = false
            port = 6667
        "##;
        let config = ClientConfig::from_toml_str(text).unwrap();
        assert_eq!(config.channels, vec!["#forsen", "#xqc"]);
        assert_eq!(config.command_timeout_ms, 5000);
        assert_eq!(config.identity.username.as_deref(), Some("mybot"));
        assert!(!config.connection.secure);
        assert_eq!(config.connection.port, 6667);
    }
}
