use std::net::{IpAddr, Ipv4Addr};

/// Default TCP port the daemon listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 2113;

/// Default bind address (loopback).
pub const DEFAULT_LISTEN_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default number of session worker threads.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Owned bind address used by serde.
pub fn default_listen_host_string() -> String {
    DEFAULT_LISTEN_HOST.to_string()
}

/// Default bind port, for serde.
pub const fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

/// Default worker count, for serde.
pub const fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

/// Commands resolve by entry-point identity unless disabled.
pub const fn default_allow_direct_lookup() -> bool {
    true
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
