//! Core data model shared by the hub and build hosts
//!
//! These types mirror the logical schema the hub persists: hosts, tasks,
//! task runs, refusals, host self-reports, and the scheduler event log.
//! Nothing here performs I/O; the hub's `database` module is responsible
//! for reading and writing rows of these shapes.

use serde::{Deserialize, Serialize};

/// The `noarch` token used for architecture-independent tasks and bins.
pub const NOARCH: &str = "noarch";

/// A build host known to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: i64,
    pub name: String,
    /// Space-separated capability tokens, e.g. "x86_64 i686".
    pub arches: String,
    /// Channel ids this host belongs to.
    pub channels: Vec<i64>,
    pub capacity: f64,
    pub task_load: f64,
    pub ready: bool,
    pub enabled: bool,
    pub last_update: i64,
}

impl Host {
    /// The arches this host declares, split on whitespace.
    pub fn arch_list(&self) -> Vec<&str> {
        self.arches.split_whitespace().collect()
    }

    pub fn supports_arch(&self, arch: &str) -> bool {
        arch == NOARCH || self.arch_list().iter().any(|a| *a == arch)
    }

    pub fn in_channel(&self, channel_id: i64) -> bool {
        self.channels.contains(&channel_id)
    }

    /// Bin keys this host is a member of: its channels crossed with its
    /// declared arches, plus the synthetic noarch bin for each channel.
    pub fn bins(&self) -> Vec<String> {
        let mut bins = Vec::new();
        for channel in &self.channels {
            for arch in self.arch_list() {
                bins.push(bin_key(*channel, arch));
            }
            bins.push(bin_key(*channel, NOARCH));
        }
        bins
    }
}

/// Format a bin key from a channel id and arch token.
pub fn bin_key(channel_id: i64, arch: &str) -> String {
    format!("{channel_id}:{arch}")
}

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Free,
    Open,
    Assigned,
    Closed,
    Canceled,
    Failed,
}

impl TaskState {
    /// Only FREE and ASSIGNED tasks are candidates for the scheduler.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Closed | TaskState::Canceled | TaskState::Failed)
    }
}

/// A build task as the scheduler sees it: an opaque unit of work
/// identified by id, method, channel, arch, and weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub method: String,
    pub channel_id: i64,
    /// Architecture token, or [`NOARCH`].
    pub arch: String,
    pub weight: f64,
    pub priority: i32,
    pub state: TaskState,
    pub owner: i64,
    pub parent: Option<i64>,
    pub host_id: Option<i64>,
    pub create_ts: i64,
}

impl Task {
    pub fn bin(&self) -> String {
        bin_key(self.channel_id, &self.arch)
    }
}

/// Lifecycle state of a [`TaskRun`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Assigned,
    Running,
    Done,
    Fail,
    Override,
}

impl RunState {
    /// Active runs are the ones the scheduler must account for when
    /// computing host load and eligibility for new work.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Assigned | RunState::Running)
    }
}

/// A single host-assignment of a task. A task may accumulate many
/// historical runs; at most one is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRun {
    pub id: i64,
    pub task_id: i64,
    pub host_id: i64,
    pub state: RunState,
    pub create_ts: i64,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
}

/// A per-(host, task) refusal record. Soft refusals expire after
/// `soft_refusal_timeout`; hard refusals never expire for that pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refusal {
    pub host_id: i64,
    pub task_id: i64,
    pub soft: bool,
    pub by_host: bool,
    pub msg: String,
    pub ts: i64,
}

impl Refusal {
    /// A refusal is active (still suppresses assignment) if it is hard,
    /// or if it is soft and has not yet expired.
    pub fn is_active(&self, now: i64, soft_refusal_timeout: i64) -> bool {
        !self.soft || now - self.ts < soft_refusal_timeout
    }
}

/// A host's self-reported capabilities, stored as `scheduler_host_data`.
/// Typed rather than free-form JSON so `setHostData` can validate input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostCapabilities {
    pub arches: String,
    pub channels: Vec<i64>,
    pub capacity: f64,
    pub ready: bool,
    pub task_load: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// One row in the append-only scheduler event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogMessage {
    pub id: i64,
    pub ts: i64,
    pub task_id: Option<i64>,
    pub host_id: Option<i64>,
    pub host_name: Option<String>,
    pub msg: String,
}

/// A channel a task/host may belong to. Channels are first-class rows so
/// bin keys and the admin read API can render names, not just ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(arches: &str, channels: Vec<i64>) -> Host {
        Host {
            id: 1,
            name: "builder1".into(),
            arches: arches.into(),
            channels,
            capacity: 4.0,
            task_load: 0.0,
            ready: true,
            enabled: true,
            last_update: 1000,
        }
    }

    #[test]
    fn host_bins_include_noarch_per_channel() {
        let h = host("x86_64 i686", vec![1, 2]);
        let bins = h.bins();
        assert!(bins.contains(&"1:x86_64".to_string()));
        assert!(bins.contains(&"1:i686".to_string()));
        assert!(bins.contains(&"1:noarch".to_string()));
        assert!(bins.contains(&"2:noarch".to_string()));
        assert_eq!(bins.len(), 6);
    }

    #[test]
    fn host_supports_arch_accepts_noarch_universally() {
        let h = host("x86_64", vec![1]);
        assert!(h.supports_arch("x86_64"));
        assert!(h.supports_arch(NOARCH));
        assert!(!h.supports_arch("aarch64"));
    }

    #[test]
    fn task_bin_matches_channel_and_arch() {
        let t = Task {
            id: 1,
            method: "build".into(),
            channel_id: 3,
            arch: "x86_64".into(),
            weight: 1.0,
            priority: 5,
            state: TaskState::Free,
            owner: 1,
            parent: None,
            host_id: None,
            create_ts: 0,
        };
        assert_eq!(t.bin(), "3:x86_64");
    }

    #[test]
    fn soft_refusal_expires_hard_does_not() {
        let soft = Refusal {
            host_id: 1,
            task_id: 1,
            soft: true,
            by_host: true,
            msg: "busy".into(),
            ts: 0,
        };
        assert!(soft.is_active(100, 900));
        assert!(!soft.is_active(1000, 900));

        let hard = Refusal { soft: false, ..soft };
        assert!(hard.is_active(1_000_000, 900));
    }

    #[test]
    fn run_state_active_set() {
        assert!(RunState::Assigned.is_active());
        assert!(RunState::Running.is_active());
        assert!(!RunState::Done.is_active());
        assert!(!RunState::Override.is_active());
    }
}
