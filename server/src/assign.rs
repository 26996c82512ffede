//! Assignment Engine (component D)
//!
//! `assign` is the only path that ever moves a task from FREE to ASSIGNED.
//! It performs the transactional commit described by the scheduler loop
//! and the administrative `assignTask` RPC alike; `force` (host
//! eligibility) is the caller's concern; by the time a (task, host) pair
//! reaches here, both have already been chosen.

use crate::database::SchedulerDatabase;
use crate::error::ApiError;
use tracing::{debug, info};

/// Attempt to assign `task_id` to `host_id`. When `override_active` is
/// true, any currently active run is overridden first instead of causing
/// the whole attempt to fail. Returns the new run id.
///
/// A lost race: the task was no longer FREE (or ASSIGNED, when
/// overriding) by the time the row lock was acquired, surfaces as
/// [`ApiError::TaskAlreadyAssigned`], which callers treat as non-fatal:
/// logged and skipped, not propagated as a hub failure.
pub fn assign(
    db: &mut SchedulerDatabase,
    task_id: i64,
    host_id: i64,
    override_active: bool,
    now: i64,
) -> Result<i64, ApiError> {
    match db.assign_task(task_id, host_id, override_active, now) {
        Ok(run_id) => {
            let host_name = db
                .get_host_by_id(host_id)
                .ok()
                .flatten()
                .map(|h| h.name);
            db.log(
                Some(task_id),
                Some(host_id),
                host_name.as_deref(),
                "task assigned",
                now,
            )
            .ok();
            info!(task_id, host_id, run_id, "task assigned");
            Ok(run_id)
        }
        Err(e) => {
            debug!(task_id, host_id, error = %e, "assignment lost the race");
            Err(ApiError::TaskAlreadyAssigned(task_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn assign_succeeds_on_free_task() {
        let (_dir, mut db) = test_db();
        let host_id = db.upsert_host_capabilities("builder1", &caps(), 100).unwrap();
        let conn = db.get_connection().unwrap();
        let task_id = crate::database::db_tasks::create_task(
            conn, "build", 1, "x86_64", 1.0, 10, 0, None, 100,
        )
        .unwrap();

        let run_id = assign(&mut db, task_id, host_id, false, 200).unwrap();
        assert!(run_id > 0);
    }

    #[test]
    fn repeat_assign_without_override_reports_already_assigned() {
        let (_dir, mut db) = test_db();
        let host_id = db.upsert_host_capabilities("builder1", &caps(), 100).unwrap();
        let conn = db.get_connection().unwrap();
        let task_id = crate::database::db_tasks::create_task(
            conn, "build", 1, "x86_64", 1.0, 10, 0, None, 100,
        )
        .unwrap();

        assign(&mut db, task_id, host_id, false, 200).unwrap();
        let result = assign(&mut db, task_id, host_id, false, 300);
        assert!(matches!(result, Err(ApiError::TaskAlreadyAssigned(_))));
    }
}
