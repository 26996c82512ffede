//! Database operations for task runs
//!
//! A `TaskRun` records one host-assignment of a task. A task may
//! accumulate many runs over its lifetime (retries, overrides) but at
//! most one is ever ASSIGNED or RUNNING at a time; that invariant is
//! enforced by the caller, which holds the row lock on the task while
//! inserting the new run.

use anyhow::{Context, Result};
use koji_common::model::{RunState, TaskRun};
use rusqlite::{params, Connection};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            host_id INTEGER NOT NULL,
            state TEXT NOT NULL,
            create_ts INTEGER NOT NULL,
            start_ts INTEGER,
            end_ts INTEGER
        )
        "#,
        [],
    )
    .context("failed to create task_runs table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs(task_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_runs_host_state ON task_runs(host_id, state)",
        [],
    )?;

    Ok(())
}

/// Record a new assignment. Returns the run id.
pub fn insert_assigned(conn: &Connection, task_id: i64, host_id: i64, now: i64) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO task_runs (task_id, host_id, state, create_ts, start_ts, end_ts)
        VALUES (?1, ?2, 'ASSIGNED', ?3, NULL, NULL)
        "#,
        params![task_id, host_id, now],
    )
    .context("failed to insert task run")?;
    Ok(conn.last_insert_rowid())
}

/// All active (ASSIGNED or RUNNING) runs, used to compute per-host load
/// and per-bin pending weight at the start of a scheduler tick.
pub fn get_active_runs(conn: &Connection) -> Result<Vec<TaskRun>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, task_id, host_id, state, create_ts, start_ts, end_ts
        FROM task_runs WHERE state IN ('ASSIGNED', 'RUNNING')
        "#,
    )?;
    let rows = stmt.query_map([], map_run_row)?;
    let mut runs = Vec::new();
    for row in rows {
        runs.push(row?);
    }
    Ok(runs)
}

/// Every run ever recorded, active or historical (DONE/FAIL/OVERRIDE
/// included), newest first. Used by the admin read API, which needs the
/// full history a task accumulated, not just its current run.
pub fn all_runs(conn: &Connection) -> Result<Vec<TaskRun>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, task_id, host_id, state, create_ts, start_ts, end_ts
        FROM task_runs ORDER BY id DESC
        "#,
    )?;
    let rows = stmt.query_map([], map_run_row)?;
    let mut runs = Vec::new();
    for row in rows {
        runs.push(row?);
    }
    Ok(runs)
}

pub fn get_active_run_for_task(conn: &Connection, task_id: i64) -> Result<Option<TaskRun>> {
    let row = conn.query_row(
        r#"
        SELECT id, task_id, host_id, state, create_ts, start_ts, end_ts
        FROM task_runs WHERE task_id = ?1 AND state IN ('ASSIGNED', 'RUNNING')
        ORDER BY id DESC LIMIT 1
        "#,
        params![task_id],
        map_run_row,
    );
    match row {
        Ok(run) => Ok(Some(run)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn set_state(conn: &Connection, run_id: i64, state: RunState, now: i64) -> Result<()> {
    let state_str = state_to_str(state);
    match state {
        RunState::Running => {
            conn.execute(
                "UPDATE task_runs SET state = ?2, start_ts = ?3 WHERE id = ?1",
                params![run_id, state_str, now],
            )?;
        }
        RunState::Done | RunState::Fail | RunState::Override => {
            conn.execute(
                "UPDATE task_runs SET state = ?2, end_ts = ?3 WHERE id = ?1",
                params![run_id, state_str, now],
            )?;
        }
        RunState::Assigned => {
            conn.execute(
                "UPDATE task_runs SET state = ?2 WHERE id = ?1",
                params![run_id, state_str],
            )?;
        }
    }
    Ok(())
}

/// Mark the currently-active run for a task as OVERRIDE, used when an
/// operator force-reassigns a task out from under its current host.
pub fn override_active_run(conn: &Connection, task_id: i64, now: i64) -> Result<()> {
    conn.execute(
        r#"
        UPDATE task_runs SET state = 'OVERRIDE', end_ts = ?2
        WHERE task_id = ?1 AND state IN ('ASSIGNED', 'RUNNING')
        "#,
        params![task_id, now],
    )?;
    Ok(())
}

fn state_to_str(state: RunState) -> &'static str {
    match state {
        RunState::Assigned => "ASSIGNED",
        RunState::Running => "RUNNING",
        RunState::Done => "DONE",
        RunState::Fail => "FAIL",
        RunState::Override => "OVERRIDE",
    }
}

fn str_to_state(s: &str) -> rusqlite::Result<RunState> {
    match s {
        "ASSIGNED" => Ok(RunState::Assigned),
        "RUNNING" => Ok(RunState::Running),
        "DONE" => Ok(RunState::Done),
        "FAIL" => Ok(RunState::Fail),
        "OVERRIDE" => Ok(RunState::Override),
        other => Err(rusqlite::Error::InvalidColumnType(
            3,
            format!("unknown run state: {other}"),
            rusqlite::types::Type::Text,
        )),
    }
}

fn map_run_row(row: &rusqlite::Row) -> rusqlite::Result<TaskRun> {
    let state_str: String = row.get(3)?;
    Ok(TaskRun {
        id: row.get(0)?,
        task_id: row.get(1)?,
        host_id: row.get(2)?,
        state: str_to_state(&state_str)?,
        create_ts: row.get(4)?,
        start_ts: row.get(5)?,
        end_ts: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn).unwrap();
        conn
    }

    #[test]
    fn insert_assigned_then_active_lookup_finds_it() {
        let conn = memory_conn();
        let run_id = insert_assigned(&conn, 1, 7, 100).unwrap();
        let active = get_active_run_for_task(&conn, 1).unwrap().unwrap();
        assert_eq!(active.id, run_id);
        assert_eq!(active.state, RunState::Assigned);
    }

    #[test]
    fn set_state_running_sets_start_ts() {
        let conn = memory_conn();
        let run_id = insert_assigned(&conn, 1, 7, 100).unwrap();
        set_state(&conn, run_id, RunState::Running, 150).unwrap();
        let active = get_active_run_for_task(&conn, 1).unwrap().unwrap();
        assert_eq!(active.start_ts, Some(150));
    }

    #[test]
    fn set_state_done_removes_from_active() {
        let conn = memory_conn();
        let run_id = insert_assigned(&conn, 1, 7, 100).unwrap();
        set_state(&conn, run_id, RunState::Done, 200).unwrap();
        assert!(get_active_run_for_task(&conn, 1).unwrap().is_none());
    }

    #[test]
    fn override_active_run_clears_active_state() {
        let conn = memory_conn();
        insert_assigned(&conn, 1, 7, 100).unwrap();
        override_active_run(&conn, 1, 300).unwrap();
        assert!(get_active_run_for_task(&conn, 1).unwrap().is_none());
    }

    #[test]
    fn get_active_runs_only_returns_assigned_or_running() {
        let conn = memory_conn();
        let r1 = insert_assigned(&conn, 1, 7, 100).unwrap();
        insert_assigned(&conn, 2, 8, 100).unwrap();
        set_state(&conn, r1, RunState::Done, 200).unwrap();

        let active = get_active_runs(&conn).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_id, 2);
    }

    #[test]
    fn all_runs_includes_terminal_states() {
        let conn = memory_conn();
        let r1 = insert_assigned(&conn, 1, 7, 100).unwrap();
        insert_assigned(&conn, 2, 8, 100).unwrap();
        set_state(&conn, r1, RunState::Done, 200).unwrap();

        let all = all_runs(&conn).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|r| r.task_id == 1 && r.state == RunState::Done));
    }
}
