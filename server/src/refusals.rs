//! Refusal Ledger (component E)
//!
//! Thin policy layer over `database::db_refusals`: resolves which hosts
//! currently carry an *active* refusal for a task, where active means
//! hard, or soft and not yet expired.

use crate::database::SchedulerDatabase;
use anyhow::Result;
use std::collections::HashSet;

/// The set of host ids that currently refuse a given task.
pub fn active_refusers(
    db: &mut SchedulerDatabase,
    task_id: i64,
    now: i64,
    soft_refusal_timeout: i64,
) -> Result<HashSet<i64>> {
    let refusals = db.get_refusals_for_task(task_id)?;
    Ok(refusals
        .into_iter()
        .filter(|r| r.is_active(now, soft_refusal_timeout))
        .map(|r| r.host_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, SchedulerDatabase) {
        let dir = TempDir::new().unwrap();
        let mut db = SchedulerDatabase::new(dir.path(), 5).unwrap();
        db.initialize(&HashMap::new()).unwrap();
        (dir, db)
    }

    #[test]
    fn active_refusers_excludes_expired_soft_refusal() {
        let (_dir, mut db) = test_db();
        db.set_refusal(1, 42, true, true, "busy", 0).unwrap();
        db.set_refusal(2, 42, false, true, "wrong arch", 0).unwrap();

        let refusers = active_refusers(&mut db, 42, 1000, 900).unwrap();
        assert!(!refusers.contains(&1));
        assert!(refusers.contains(&2));
    }
}
