//! Configuration types and validation shared by the hub and build hosts
//!
//! This module defines the configuration structures used by both the hub
//! (`kojihub`) and build host (`kojid`) crates, including validation logic
//! and serialization support.

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scheduler tuning parameters, loaded from the hub's `hub.toml`.
///
/// Field names and defaults follow the configuration table: `maxjobs`,
/// `capacity_overcommit`, `ready_timeout`, `assign_timeout`,
/// `soft_refusal_timeout`, `host_timeout`, `run_interval`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Per-host per-tick assignment cap.
    #[serde(default = "default_maxjobs")]
    pub maxjobs: u32,
    /// Additive headroom over declared capacity within which a host may
    /// still receive work.
    #[serde(default = "default_capacity_overcommit")]
    pub capacity_overcommit: f64,
    /// How long a host may remain `ready = true` without a heartbeat
    /// before being treated as not-ready, in seconds.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: i64,
    /// Window in which a host must open an ASSIGNED task, in seconds.
    #[serde(default = "default_assign_timeout")]
    pub assign_timeout: i64,
    /// Lifetime of a soft refusal, in seconds.
    #[serde(default = "default_soft_refusal_timeout")]
    pub soft_refusal_timeout: i64,
    /// Heartbeat gap before a host's active runs are overridden, in seconds.
    #[serde(default = "default_host_timeout")]
    pub host_timeout: i64,
    /// Minimum seconds between scheduler ticks unless forced.
    #[serde(default = "default_run_interval")]
    pub run_interval: i64,
    /// Name of the advisory lock row the scheduler loop acquires each tick.
    #[serde(default = "default_lock_name")]
    pub lock_name: String,
    /// Per-method default task weight, keyed by method name. Methods not
    /// present here use [`default_task_weight`].
    #[serde(default)]
    pub method_weights: HashMap<String, f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maxjobs: default_maxjobs(),
            capacity_overcommit: default_capacity_overcommit(),
            ready_timeout: default_ready_timeout(),
            assign_timeout: default_assign_timeout(),
            soft_refusal_timeout: default_soft_refusal_timeout(),
            host_timeout: default_host_timeout(),
            run_interval: default_run_interval(),
            lock_name: default_lock_name(),
            method_weights: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Look up the configured default weight for a method, falling back to
    /// [`default_task_weight`] when the method is unconfigured.
    pub fn weight_for_method(&self, method: &str) -> f64 {
        self.method_weights
            .get(method)
            .copied()
            .unwrap_or_else(default_task_weight)
    }

    /// Validate the scheduler configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.maxjobs == 0 {
            return Err(
                crate::SchedulerError::Validation("maxjobs must be greater than 0".to_string())
                    .into(),
            );
        }
        if self.capacity_overcommit < 0.0 {
            return Err(crate::SchedulerError::Validation(
                "capacity_overcommit cannot be negative".to_string(),
            )
            .into());
        }
        for (name, field) in [
            ("ready_timeout", self.ready_timeout),
            ("assign_timeout", self.assign_timeout),
            ("soft_refusal_timeout", self.soft_refusal_timeout),
            ("host_timeout", self.host_timeout),
            ("run_interval", self.run_interval),
        ] {
            if field <= 0 {
                return Err(crate::SchedulerError::Validation(format!(
                    "{name} must be greater than 0"
                ))
                .into());
            }
        }
        if self.lock_name.is_empty() {
            return Err(
                crate::SchedulerError::Validation("lock_name cannot be empty".to_string())
                    .into(),
            );
        }
        Ok(())
    }
}

/// Top-level hub configuration loaded from `hub.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubConfig {
    /// Address the host API listens on.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Pre-shared secret key hosts must present.
    #[serde(default)]
    pub api_key: String,
    /// Path to the SQLite database file.
    pub database_path: String,
    /// Scheduler tuning parameters.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Known channel names, keyed by channel id.
    #[serde(default)]
    pub channels: HashMap<i64, String>,
    #[serde(default = "default_rate_limit_enabled")]
    pub rate_limit_enabled: bool,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_seconds: u32,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: usize,
    #[serde(default = "default_server_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_seconds: u64,
    #[serde(default = "default_database_busy_timeout")]
    pub database_busy_timeout_seconds: u64,
}

impl HubConfig {
    /// Validate the hub configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.database_path.is_empty() {
            return Err(
                crate::SchedulerError::Validation("database_path cannot be empty".to_string())
                    .into(),
            );
        }
        if self.api_key.is_empty() {
            return Err(
                crate::SchedulerError::Validation("api_key cannot be empty".to_string()).into(),
            );
        }
        self.listen_address.parse::<std::net::SocketAddr>().map_err(|e| {
            crate::SchedulerError::Validation(format!(
                "invalid listen_address '{}': {e}",
                self.listen_address
            ))
        })?;
        self.scheduler.validate()
    }
}

/// Build host configuration loaded from `host.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Unique host name registered with the hub.
    pub name: String,
    /// Base URL of the hub's host API.
    pub hub_url: String,
    /// Pre-shared secret key for authenticating with the hub.
    #[serde(default)]
    pub api_key: String,
    /// Space-separated arches this host declares, e.g. "x86_64 i686".
    pub arches: String,
    /// Channel ids this host belongs to.
    pub channels: Vec<i64>,
    /// Maximum summed task weight this host will accept.
    pub capacity: f64,
    /// How often to poll the hub for assigned tasks, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// HTTP client timeout when talking to the hub, in seconds.
    #[serde(default = "default_http_client_timeout")]
    pub http_client_timeout_seconds: u64,
    /// Wait time for in-flight tasks during shutdown, in seconds.
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_seconds: u64,
}

impl HostConfig {
    /// Validate the build host configuration.
    pub fn validate(&self) -> crate::Result<()> {
        crate::utils::validate_host_name(&self.name)?;

        crate::utils::validate_url(&self.hub_url)?;
        if self.arches.trim().is_empty() {
            return Err(
                crate::SchedulerError::Validation("arches cannot be empty".to_string()).into(),
            );
        }
        if self.channels.is_empty() {
            return Err(crate::SchedulerError::Validation(
                "a build host must belong to at least one channel".to_string(),
            )
            .into());
        }
        if self.capacity <= 0.0 {
            return Err(
                crate::SchedulerError::Validation("capacity must be greater than 0".to_string())
                    .into(),
            );
        }
        if self.poll_interval_seconds == 0 {
            return Err(crate::SchedulerError::Validation(
                "poll_interval_seconds must be greater than 0".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_defaults_match_spec_table() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.maxjobs, 15);
        assert_eq!(cfg.capacity_overcommit, 5.0);
        assert_eq!(cfg.ready_timeout, 180);
        assert_eq!(cfg.assign_timeout, 300);
        assert_eq!(cfg.soft_refusal_timeout, 900);
        assert_eq!(cfg.host_timeout, 900);
        assert_eq!(cfg.run_interval, 60);
        assert_eq!(cfg.lock_name, "scheduler");
    }

    #[test]
    fn scheduler_config_rejects_zero_maxjobs() {
        let mut cfg = SchedulerConfig::default();
        cfg.maxjobs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn weight_for_method_falls_back_to_default() {
        let mut cfg = SchedulerConfig::default();
        cfg.method_weights.insert("buildArch".to_string(), 2.0);
        assert_eq!(cfg.weight_for_method("buildArch"), 2.0);
        assert_eq!(cfg.weight_for_method("tagBuild"), default_task_weight());
    }

    #[test]
    fn host_config_requires_at_least_one_channel() {
        let cfg = HostConfig {
            name: "builder1".to_string(),
            hub_url: "http://localhost:8080".to_string(),
            api_key: "secret".to_string(),
            arches: "x86_64".to_string(),
            channels: vec![],
            capacity: 4.0,
            poll_interval_seconds: 15,
            http_client_timeout_seconds: 30,
            graceful_shutdown_timeout_seconds: 30,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hub_config_rejects_bad_listen_address() {
        let cfg = HubConfig {
            listen_address: "not-an-address".to_string(),
            api_key: "secret".to_string(),
            database_path: "hub.db".to_string(),
            scheduler: SchedulerConfig::default(),
            channels: HashMap::new(),
            rate_limit_enabled: true,
            rate_limit_window_seconds: 60,
            rate_limit_max_requests: 600,
            graceful_shutdown_timeout_seconds: 30,
            database_busy_timeout_seconds: 30,
        };
        assert!(cfg.validate().is_err());
    }
}
