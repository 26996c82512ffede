//! Task Pool (component B)
//!
//! Enumerates free and active tasks for a tick, and detects runs that have
//! overstayed their welcome: an ASSIGNED run whose host never opened it
//! within `assign_timeout`, or a RUNNING run whose host has gone silent.

use crate::registry::HostRegistry;
use anyhow::Result;
use koji_common::config::SchedulerConfig;
use koji_common::model::{RunState, Task, TaskRun};
use tracing::debug;

pub fn free_tasks(db: &mut crate::database::SchedulerDatabase) -> Result<Vec<Task>> {
    db.free_tasks()
}

/// Walk all active runs and return tasks to FREE where a timeout has
/// elapsed. Each return is logged with a synthetic soft refusal so the
/// same host doesn't immediately get reassigned the task it just sat on.
pub fn check_active_tasks(
    db: &mut crate::database::SchedulerDatabase,
    registry: &HostRegistry,
    config: &SchedulerConfig,
    now: i64,
) -> Result<usize> {
    let active_runs = db.get_active_runs()?;
    let mut reclaimed = 0;

    for run in active_runs {
        if let Some(reason) = timeout_reason(&run, registry, config, now) {
            debug!(task_id = run.task_id, host_id = run.host_id, reason, "reclaiming timed-out run");

            db.override_and_free(run.task_id, now)?;
            db.set_refusal(
                run.host_id,
                run.task_id,
                true,
                false,
                reason,
                now,
            )?;
            db.log(
                Some(run.task_id),
                Some(run.host_id),
                registry.get(run.host_id).map(|h| h.name.as_str()),
                reason,
                now,
            )?;
            reclaimed += 1;
        }
    }

    Ok(reclaimed)
}

fn timeout_reason<'a>(
    run: &TaskRun,
    registry: &HostRegistry,
    config: &SchedulerConfig,
    now: i64,
) -> Option<&'a str> {
    match run.state {
        RunState::Assigned if now - run.create_ts > config.assign_timeout => {
            Some("assign timeout: host did not open task in time")
        }
        RunState::Running => {
            let host = registry.get(run.host_id)?;
            if now - host.last_update > config.host_timeout {
                Some("host went silent while task was running")
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SchedulerDatabase;
    use koji_common::model::HostCapabilities;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, SchedulerDatabase) {
        let dir = TempDir::new().unwrap();
        let mut db = SchedulerDatabase::new(dir.path(), 5).unwrap();
        db.initialize(&HashMap::new()).unwrap();
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
    fn assign_timeout_reclaims_unopened_task() {
        let (_dir, mut db) = test_db();
        let host_id = db.upsert_host_capabilities("builder1", &caps(), 100).unwrap();
        let conn = db.get_connection().unwrap();
        let task_id = crate::database::db_tasks::create_task(
            conn, "build", 1, "x86_64", 1.0, 10, 0, None, 100,
        )
        .unwrap();
        db.assign_task(task_id, host_id, false, 100).unwrap();

        let config = SchedulerConfig {
            assign_timeout: 100,
            ..Default::default()
        };
        let registry = crate::registry::HostRegistry::load(&mut db).unwrap();
        let reclaimed = check_active_tasks(&mut db, &registry, &config, 1000).unwrap();

        assert_eq!(reclaimed, 1);
        let task = db.get_task(task_id).unwrap().unwrap();
        assert_eq!(task.state, koji_common::model::TaskState::Free);
    }

    #[test]
    fn fresh_assigned_run_is_not_reclaimed() {
        let (_dir, mut db) = test_db();
        let host_id = db.upsert_host_capabilities("builder1", &caps(), 100).unwrap();
        let conn = db.get_connection().unwrap();
        let task_id = crate::database::db_tasks::create_task(
            conn, "build", 1, "x86_64", 1.0, 10, 0, None, 100,
        )
        .unwrap();
        db.assign_task(task_id, host_id, false, 900).unwrap();

        let config = SchedulerConfig::default();
        let registry = crate::registry::HostRegistry::load(&mut db).unwrap();
        let reclaimed = check_active_tasks(&mut db, &registry, &config, 1000).unwrap();
        assert_eq!(reclaimed, 0);
    }
}
