//! Scheduler Loop (component C)
//!
//! One `tick` is the unit of work: acquire the advisory lock, refresh the
//! host/task/refusal snapshots, reclaim timed-out runs and dead hosts,
//! run the assignment pass, persist `last_run_ts`, release the lock. The
//! loop intentionally does not re-query the database between per-task
//! assignments within a tick; see `do_schedule`.

use crate::assign;
use crate::database::SchedulerDatabase;
use crate::pool;
use crate::refusals;
use crate::registry::HostRegistry;
use anyhow::Result;
use koji_common::config::SchedulerConfig;
use koji_common::model::Task;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Per-tick bookkeeping for a single host: weight added by this tick's
/// in-progress assignments, and how many assignments it has already
/// received this tick (for the `maxjobs` cap).
#[derive(Default, Clone, Copy)]
struct HostTickState {
    pending_weight: f64,
    assignments_this_tick: u32,
}

pub struct Scheduler {
    lock_holder: String,
}

/// Outcome of one `tick()` call.
#[derive(Debug, Default)]
pub struct TickReport {
    pub ran: bool,
    pub assignments_made: usize,
    pub reclaimed_runs: usize,
    pub evicted_hosts: usize,
}

impl Scheduler {
    pub fn new(lock_holder: impl Into<String>) -> Self {
        Self {
            lock_holder: lock_holder.into(),
        }
    }

    /// Run one tick. `force` bypasses the `run_interval` gate.
    pub fn tick(
        &self,
        db: &mut SchedulerDatabase,
        config: &SchedulerConfig,
        now: i64,
        force: bool,
    ) -> Result<TickReport> {
        let lease_seconds = config.run_interval.max(1);
        if !db.try_acquire_lock(&config.lock_name, &self.lock_holder, now, lease_seconds)? {
            debug!(lock_name = %config.lock_name, "advisory lock held elsewhere, skipping tick");
            return Ok(TickReport::default());
        }

        let result = self.tick_locked(db, config, now, force);

        db.release_lock(&config.lock_name, &self.lock_holder)?;

        result
    }

    fn tick_locked(
        &self,
        db: &mut SchedulerDatabase,
        config: &SchedulerConfig,
        now: i64,
        force: bool,
    ) -> Result<TickReport> {
        let last_run = db.last_run_ts(&config.lock_name)?;
        if !force && now - last_run < config.run_interval {
            return Ok(TickReport::default());
        }

        let registry = HostRegistry::load(db)?;
        let reclaimed_runs = pool::check_active_tasks(db, &registry, config, now)?;
        let evicted_hosts = crate::registry::check_hosts(db, &registry, config, now)?;

        let registry = HostRegistry::load(db)?;
        let free_tasks = pool::free_tasks(db)?;
        let assignments_made = do_schedule(db, &registry, config, free_tasks, now)?;

        db.set_last_run_ts(&config.lock_name, now)?;

        info!(
            assignments_made,
            reclaimed_runs, evicted_hosts, "scheduler tick complete"
        );

        Ok(TickReport {
            ran: true,
            assignments_made,
            reclaimed_runs,
            evicted_hosts,
        })
    }
}

/// The assignment pass: walk free tasks in priority order, resolve and
/// rank candidate hosts, and commit the best fit. All ranking happens
/// against one in-memory snapshot adjusted in place as assignments are
/// made, per tick; no intra-tick re-query.
fn do_schedule(
    db: &mut SchedulerDatabase,
    registry: &HostRegistry,
    config: &SchedulerConfig,
    free_tasks: Vec<Task>,
    now: i64,
) -> Result<usize> {
    let mut tick_state: HashMap<i64, HostTickState> = HashMap::new();
    let mut assignments_made = 0;

    for task in free_tasks {
        let bin = task.bin();
        let noarch_bin = koji_common::model::bin_key(task.channel_id, koji_common::model::NOARCH);

        let mut candidates: Vec<i64> = registry
            .hosts_in_bin(&bin)
            .iter()
            .chain(registry.hosts_in_bin(&noarch_bin).iter())
            .copied()
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        let refusers = refusals::active_refusers(db, task.id, now, config.soft_refusal_timeout)?;

        let mut ranked: Vec<(i64, f64, i64)> = Vec::new();
        for host_id in candidates {
            if !registry.is_eligible(host_id, now, config.host_timeout) {
                continue;
            }
            if refusers.contains(&host_id) {
                continue;
            }
            let host = match registry.get(host_id) {
                Some(h) => h,
                None => continue,
            };
            let state = tick_state.entry(host_id).or_default();
            if state.assignments_this_tick >= config.maxjobs {
                continue;
            }
            let projected_load = host.task_load + state.pending_weight + task.weight;
            if projected_load > host.capacity + config.capacity_overcommit {
                continue;
            }
            let ratio = (host.task_load + state.pending_weight) / host.capacity.max(f64::EPSILON);
            ranked.push((host_id, ratio, host.last_update));
        }

        if ranked.is_empty() {
            debug!(task_id = task.id, "no eligible candidate host this tick");
            continue;
        }

        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
        });
        let chosen_host_id = ranked[0].0;

        match assign::assign(db, task.id, chosen_host_id, false, now) {
            Ok(_run_id) => {
                let state = tick_state.entry(chosen_host_id).or_default();
                state.pending_weight += task.weight;
                state.assignments_this_tick += 1;
                assignments_made += 1;
            }
            Err(e) => {
                warn!(task_id = task.id, host_id = chosen_host_id, error = %e, "assignment lost the race this tick");
            }
        }
    }

    Ok(assignments_made)
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

    fn caps() -> HostCapabilities {
        HostCapabilities {
            arches: "x86_64".into(),
            channels: vec![1],
            capacity: 4.0,
            ready: true,
            task_load: 0.0,
            description: None,
        }
    }

    #[test]
    fn tick_assigns_free_task_to_sole_eligible_host() {
        let (_dir, mut db) = test_db();
        let host_id = db.upsert_host_capabilities("builder1", &caps(), 100).unwrap();
        let conn = db.get_connection().unwrap();
        let task_id = crate::database::db_tasks::create_task(
            conn, "build", 1, "x86_64", 1.0, 10, 0, None, 100,
        )
        .unwrap();

        let config = SchedulerConfig::default();
        let scheduler = Scheduler::new("hub-test");
        let report = scheduler.tick(&mut db, &config, 200, true).unwrap();

        assert!(report.ran);
        assert_eq!(report.assignments_made, 1);
        let task = db.get_task(task_id).unwrap().unwrap();
        assert_eq!(task.host_id, Some(host_id));
    }

    #[test]
    fn tick_skips_host_over_capacity() {
        let (_dir, mut db) = test_db();
        let mut overloaded = caps();
        overloaded.capacity = 1.0;
        overloaded.task_load = 1.0;
        db.upsert_host_capabilities("builder1", &overloaded, 100).unwrap();
        let conn = db.get_connection().unwrap();
        crate::database::db_tasks::create_task(conn, "build", 1, "x86_64", 1.0, 10, 0, None, 100)
            .unwrap();

        let config = SchedulerConfig {
            capacity_overcommit: 0.0,
            ..Default::default()
        };
        let scheduler = Scheduler::new("hub-test");
        let report = scheduler.tick(&mut db, &config, 200, true).unwrap();
        assert_eq!(report.assignments_made, 0);
    }

    #[test]
    fn tick_respects_run_interval_unless_forced() {
        let (_dir, mut db) = test_db();
        db.upsert_host_capabilities("builder1", &caps(), 100).unwrap();

        let config = SchedulerConfig::default();
        let scheduler = Scheduler::new("hub-test");
        let first = scheduler.tick(&mut db, &config, 100, false).unwrap();
        assert!(first.ran);

        let second = scheduler.tick(&mut db, &config, 110, false).unwrap();
        assert!(!second.ran);
    }

    #[test]
    fn tick_skips_task_with_active_refusal_on_only_candidate() {
        let (_dir, mut db) = test_db();
        let host_id = db.upsert_host_capabilities("builder1", &caps(), 100).unwrap();
        let conn = db.get_connection().unwrap();
        let task_id = crate::database::db_tasks::create_task(
            conn, "build", 1, "x86_64", 1.0, 10, 0, None, 100,
        )
        .unwrap();
        db.set_refusal(host_id, task_id, false, true, "wrong arch", 100).unwrap();

        let config = SchedulerConfig::default();
        let scheduler = Scheduler::new("hub-test");
        let report = scheduler.tick(&mut db, &config, 200, true).unwrap();
        assert_eq!(report.assignments_made, 0);
    }
}
