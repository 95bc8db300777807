//! Layered configuration for the node lifecycle manager.
//!
//! Values are merged from defaults, an optional configuration file,
//! `WARDEN_*` environment variables and command-line flags, in increasing
//! order of precedence.

mod defaults;
mod logging;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_API_PORT, DEFAULT_LOG_FILTER, default_api_port, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration shared by the CLI and the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "WARDEN")]
pub struct Config {
    /// `tracing` filter expression applied to diagnostic output.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for diagnostic logs.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Loopback port on which the node serves its control API.
    #[serde(default = "default_api_port")]
    #[ortho_config(default = DEFAULT_API_PORT)]
    pub api_port: u16,
    /// Overrides the user home directory used to lay out node files.
    #[serde(default)]
    pub home_dir: Option<Utf8PathBuf>,
    /// Overrides the location of the shared launcher settings file.
    #[serde(default)]
    pub shared_settings_path: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            api_port: default_api_port(),
            home_dir: None,
            shared_settings_path: None,
        }
    }
}

impl Config {
    /// Filter expression applied to diagnostic output.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for diagnostic logs.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Control API port on the loopback interface.
    #[must_use]
    pub const fn api_port(&self) -> u16 {
        self.api_port
    }

    /// Explicit home directory override, if configured.
    #[must_use]
    pub fn home_dir(&self) -> Option<&Utf8Path> {
        self.home_dir.as_deref()
    }

    /// Explicit shared settings file override, if configured.
    #[must_use]
    pub fn shared_settings_path(&self) -> Option<&Utf8Path> {
        self.shared_settings_path.as_deref()
    }

    /// Base URL of the node's control API.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_standard_node_port() {
        let config = Config::default();
        assert_eq!(config.api_port(), 12391);
        assert_eq!(config.api_base_url(), "http://127.0.0.1:12391");
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert!(config.home_dir().is_none());
    }
}
