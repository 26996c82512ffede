//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the configuration
//! structures. These functions are used by serde when deserializing configuration
//! files that don't specify certain optional fields.

/// Per-host per-tick assignment cap.
pub fn default_maxjobs() -> u32 {
    15
}

/// Additive headroom over declared capacity.
pub fn default_capacity_overcommit() -> f64 {
    5.0
}

/// Ready-flag grace period, in seconds.
pub fn default_ready_timeout() -> i64 {
    180
}

/// ASSIGNED -> OPEN window, in seconds.
pub fn default_assign_timeout() -> i64 {
    300
}

/// Soft refusal lifetime, in seconds.
pub fn default_soft_refusal_timeout() -> i64 {
    900
}

/// Heartbeat gap before a host is evicted, in seconds.
pub fn default_host_timeout() -> i64 {
    900
}

/// Minimum seconds between scheduler ticks unless forced.
pub fn default_run_interval() -> i64 {
    60
}

/// Name of the advisory lock row the scheduler loop acquires each tick.
pub fn default_lock_name() -> String {
    "scheduler".to_string()
}

/// Default per-method task weight when a method has no configured weight.
pub fn default_task_weight() -> f64 {
    1.0
}

// Hub server defaults

/// Default listen address for the hub's host API.
pub fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

/// Default rate limiting enabled flag.
pub fn default_rate_limit_enabled() -> bool {
    true
}

/// Default rate limit window, in seconds.
pub fn default_rate_limit_window() -> u32 {
    60
}

/// Default maximum requests per rate limit window.
pub fn default_rate_limit_max_requests() -> usize {
    600
}

/// Default graceful shutdown timeout for the hub, in seconds.
pub fn default_server_graceful_shutdown_timeout() -> u64 {
    30
}

/// Default SQLite busy timeout, in seconds.
pub fn default_database_busy_timeout() -> u64 {
    30
}

// Build host (kojid) defaults

/// Default interval between poll/heartbeat cycles, in seconds.
pub fn default_poll_interval() -> u64 {
    15
}

/// Default HTTP client timeout when talking to the hub, in seconds.
pub fn default_http_client_timeout() -> u64 {
    30
}

/// Default graceful shutdown timeout for the build host daemon, in seconds.
pub fn default_graceful_shutdown_timeout() -> u64 {
    30
}
