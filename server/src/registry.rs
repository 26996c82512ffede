//! Host Registry (component A)
//!
//! Loads all enabled hosts for a tick and indexes them by bin so the
//! scheduler loop can resolve candidate hosts for a task without
//! re-querying the database per task.

use crate::database::SchedulerDatabase;
use anyhow::Result;
use koji_common::config::SchedulerConfig;
use koji_common::model::Host;
use std::collections::HashMap;
use tracing::{debug, info};

/// A snapshot of the enabled host set for one scheduler tick.
pub struct HostRegistry {
    hosts_by_id: HashMap<i64, Host>,
    hosts_by_bin: HashMap<String, Vec<i64>>,
}

impl HostRegistry {
    /// Load all enabled hosts and build the bin index.
    pub fn load(db: &mut SchedulerDatabase) -> Result<Self> {
        let hosts = db.get_all_enabled_hosts()?;

        let mut hosts_by_id = HashMap::new();
        let mut hosts_by_bin: HashMap<String, Vec<i64>> = HashMap::new();

        for host in hosts {
            for bin in host.bins() {
                hosts_by_bin.entry(bin).or_default().push(host.id);
            }
            hosts_by_id.insert(host.id, host);
        }

        Ok(Self {
            hosts_by_id,
            hosts_by_bin,
        })
    }

    pub fn get(&self, host_id: i64) -> Option<&Host> {
        self.hosts_by_id.get(&host_id)
    }

    /// Candidate host ids in the given bin, without eligibility filtering.
    pub fn hosts_in_bin(&self, bin: &str) -> &[i64] {
        self.hosts_by_bin
            .get(bin)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// A host is eligible for new assignments only if ready, enabled, and
    /// heartbeated within `host_timeout`. `enabled` is already guaranteed by
    /// [`Self::load`] only pulling enabled hosts.
    pub fn is_eligible(&self, host_id: i64, now: i64, host_timeout: i64) -> bool {
        match self.hosts_by_id.get(&host_id) {
            Some(host) => host.ready && now - host.last_update <= host_timeout,
            None => false,
        }
    }

    pub fn all_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.hosts_by_id.keys().copied()
    }
}

/// Sweep hosts whose heartbeat has gone stale past `host_timeout`: their
/// active runs are overridden and the underlying tasks returned to FREE,
/// and the host itself is marked not-ready so it stops receiving new work
/// until it heartbeats again.
pub fn check_hosts(
    db: &mut SchedulerDatabase,
    registry: &HostRegistry,
    config: &SchedulerConfig,
    now: i64,
) -> Result<usize> {
    let mut evicted = 0;

    for host_id in registry.all_ids() {
        let host = match registry.get(host_id) {
            Some(h) => h,
            None => continue,
        };
        if !host.ready {
            continue;
        }
        if now - host.last_update <= config.host_timeout {
            continue;
        }

        debug!(host_id, last_update = host.last_update, "host heartbeat stale, evicting");
        db.mark_host_unready(host_id)?;

        let active_runs = db.get_active_runs()?;
        for run in active_runs.into_iter().filter(|r| r.host_id == host_id) {
            db.override_and_free(run.task_id, now)?;
            db.log(
                Some(run.task_id),
                Some(host_id),
                Some(&host.name),
                "host heartbeat timed out; task returned to FREE",
                now,
            )?;
            evicted += 1;
        }
    }

    if evicted > 0 {
        info!(evicted, "evicted stale host assignments");
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use koji_common::model::HostCapabilities;
    use std::collections::HashMap as StdHashMap;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, SchedulerDatabase) {
        let dir = TempDir::new().unwrap();
        let mut db = SchedulerDatabase::new(dir.path(), 5).unwrap();
        db.initialize(&StdHashMap::new()).unwrap();
        (dir, db)
    }

    fn caps(channels: Vec<i64>) -> HostCapabilities {
        HostCapabilities {
            arches: "x86_64".into(),
            channels,
            capacity: 4.0,
            ready: true,
            task_load: 0.0,
            description: None,
        }
    }

    #[test]
    fn registry_indexes_hosts_by_bin() {
        let (_dir, mut db) = test_db();
        db.upsert_host_capabilities("builder1", &caps(vec![1]), 100)
            .unwrap();

        let registry = HostRegistry::load(&mut db).unwrap();
        assert_eq!(registry.hosts_in_bin("1:x86_64").len(), 1);
        assert_eq!(registry.hosts_in_bin("1:noarch").len(), 1);
        assert!(registry.hosts_in_bin("2:x86_64").is_empty());
    }

    #[test]
    fn eligibility_requires_ready_and_fresh_heartbeat() {
        let (_dir, mut db) = test_db();
        let host_id = db
            .upsert_host_capabilities("builder1", &caps(vec![1]), 100)
            .unwrap();

        let registry = HostRegistry::load(&mut db).unwrap();
        assert!(registry.is_eligible(host_id, 200, 900));
        assert!(!registry.is_eligible(host_id, 2000, 900));
    }

    #[test]
    fn check_hosts_evicts_stale_active_run() {
        let (_dir, mut db) = test_db();
        let host_id = db
            .upsert_host_capabilities("builder1", &caps(vec![1]), 100)
            .unwrap();
        let conn = db.get_connection().unwrap();
        let task_id = crate::database::db_tasks::create_task(
            conn, "build", 1, "x86_64", 1.0, 10, 0, None, 100,
        )
        .unwrap();
        db.assign_task(task_id, host_id, false, 100).unwrap();

        let config = SchedulerConfig {
            host_timeout: 500,
            ..Default::default()
        };
        let registry = HostRegistry::load(&mut db).unwrap();
        let evicted = check_hosts(&mut db, &registry, &config, 1000).unwrap();

        assert_eq!(evicted, 1);
        let task = db.get_task(task_id).unwrap().unwrap();
        assert_eq!(task.state, koji_common::model::TaskState::Free);
    }
}
