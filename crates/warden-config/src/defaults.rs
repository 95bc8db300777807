use crate::logging::LogFormat;

/// Loopback port on which the node serves its control API.
pub const DEFAULT_API_PORT: u16 = 12391;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default control API port.
#[must_use]
pub const fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}
