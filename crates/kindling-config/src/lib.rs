//! Shared configuration for the Kindling daemon.
//!
//! Values are layered by `ortho_config`: built-in defaults, then a TOML file
//! (`--config-path` or `KINDLING_CONFIG_PATH`), then `KINDLING_*` environment
//! variables, then command-line flags.

mod defaults;
mod logging;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, DEFAULT_LOG_FILTER, DEFAULT_POOL_SIZE,
    default_allow_direct_lookup, default_listen_host_string, default_listen_port,
    default_log_filter, default_log_filter_string, default_log_format, default_pool_size,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "KINDLING")]
pub struct Config {
    /// Address the acceptor binds to.
    #[serde(default = "default_listen_host_string")]
    pub listen_host: String,
    /// Port the acceptor binds to.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Number of session worker threads.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Whether a command may name an entry point by its identity.
    #[serde(default = "default_allow_direct_lookup")]
    pub allow_direct_lookup: bool,
    /// Identity of the entry point run when a command resolves to nothing.
    #[serde(default)]
    pub default_entry_point: Option<String>,
    /// Read timeout in milliseconds while awaiting the request header.
    /// Zero disables the timeout.
    #[serde(default)]
    pub header_timeout_ms: u64,
    /// Tracing filter expression.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            pool_size: DEFAULT_POOL_SIZE,
            allow_direct_lookup: default_allow_direct_lookup(),
            default_entry_point: None,
            header_timeout_ms: 0,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Host the acceptor binds to.
    #[must_use]
    pub fn listen_host(&self) -> &str {
        &self.listen_host
    }

    /// Port the acceptor binds to.
    #[must_use]
    pub const fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// `host:port` form of the bind address.
    #[must_use]
    pub fn listen_address(&self) -> String {
        if self.listen_host.contains(':') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }

    /// Number of session worker threads.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Whether commands may name entry points by identity.
    #[must_use]
    pub const fn allow_direct_lookup(&self) -> bool {
        self.allow_direct_lookup
    }

    /// Identity of the fallback entry point, if any.
    #[must_use]
    pub fn default_entry_point(&self) -> Option<&str> {
        self.default_entry_point.as_deref()
    }

    /// Header read timeout, or `None` when disabled.
    #[must_use]
    pub const fn header_timeout(&self) -> Option<Duration> {
        if self.header_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.header_timeout_ms))
        }
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Checks values the loader cannot check by type alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a zero pool size or an empty bind host.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.listen_host.trim().is_empty() {
            return Err(ConfigError::EmptyListenHost);
        }
        Ok(())
    }
}

/// Values rejected by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The pool must have at least one worker.
    #[error("pool_size must be at least 1")]
    ZeroPoolSize,
    /// The bind host is blank.
    #[error("listen_host must not be empty")]
    EmptyListenHost,
}

impl ConfigError {
    /// Configuration key the error refers to.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::ZeroPoolSize => "pool_size",
            Self::EmptyListenHost => "listen_host",
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.listen_address(), "127.0.0.1:2113");
        assert_eq!(config.pool_size(), 10);
        assert!(config.allow_direct_lookup());
        assert_eq!(config.default_entry_point(), None);
        assert_eq!(config.header_timeout(), None);
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[rstest]
    #[case(Config { pool_size: 0, ..Config::default() }, ConfigError::ZeroPoolSize)]
    #[case(
        Config { listen_host: "  ".into(), ..Config::default() },
        ConfigError::EmptyListenHost
    )]
    fn validation_rejects_unusable_values(#[case] config: Config, #[case] expected: ConfigError) {
        assert_eq!(config.validate(), Err(expected));
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let config = Config {
            listen_host: "::1".into(),
            ..Config::default()
        };
        assert_eq!(config.listen_address(), "[::1]:2113");
    }

    #[test]
    fn header_timeout_is_in_milliseconds() {
        let config = Config {
            header_timeout_ms: 1500,
            ..Config::default()
        };
        assert_eq!(config.header_timeout(), Some(Duration::from_millis(1500)));
    }
}
