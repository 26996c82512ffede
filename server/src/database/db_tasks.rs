//! Database operations for the task pool
//!
//! Tasks move through FREE -> ASSIGNED -> (CLOSED | CANCELED | FAILED), with
//! ASSIGNED able to fall back to FREE if its run is overridden. `OPEN` is a
//! transient marker a host passes through between ASSIGNED and actually
//! starting work (see `kojid::runner`); it is tracked here as a `TaskState`
//! but the scheduler itself only ever produces FREE and ASSIGNED rows.

use anyhow::{Context, Result};
use koji_common::model::{Task, TaskState};
use rusqlite::{params, Connection};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            method TEXT NOT NULL,
            channel_id INTEGER NOT NULL,
            arch TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            priority INTEGER NOT NULL DEFAULT 10,
            state TEXT NOT NULL,
            owner INTEGER NOT NULL DEFAULT 0,
            parent INTEGER,
            host_id INTEGER,
            create_ts INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("failed to create tasks table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_free_order ON tasks(state, priority, create_ts, id)",
        [],
    )?;

    Ok(())
}

/// Insert a new task in the FREE state. Returns its id.
pub fn create_task(
    conn: &Connection,
    method: &str,
    channel_id: i64,
    arch: &str,
    weight: f64,
    priority: i32,
    owner: i64,
    parent: Option<i64>,
    now: i64,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO tasks (method, channel_id, arch, weight, priority, state, owner, parent, host_id, create_ts)
        VALUES (?1, ?2, ?3, ?4, ?5, 'FREE', ?6, ?7, NULL, ?8)
        "#,
        params![method, channel_id, arch, weight, priority, owner, parent, now],
    )
    .context("failed to insert task")?;
    Ok(conn.last_insert_rowid())
}

/// All FREE tasks in scheduler order: lowest priority number first, then
/// oldest, then lowest id as a final deterministic tiebreak.
pub fn free_tasks(conn: &Connection) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, method, channel_id, arch, weight, priority, state, owner, parent, host_id, create_ts
        FROM tasks
        WHERE state = 'FREE'
        ORDER BY priority ASC, create_ts ASC, id ASC
        "#,
    )?;
    let rows = stmt.query_map([], map_task_row)?;
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?);
    }
    Ok(tasks)
}

pub fn get_task(conn: &Connection, task_id: i64) -> Result<Option<Task>> {
    let row = conn.query_row(
        r#"
        SELECT id, method, channel_id, arch, weight, priority, state, owner, parent, host_id, create_ts
        FROM tasks WHERE id = ?1
        "#,
        params![task_id],
        map_task_row,
    );
    match row {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Move a FREE task to ASSIGNED and record its host. Called inside the
/// same `BEGIN IMMEDIATE` transaction that inserts the `TaskRun`, so the
/// caller is responsible for re-checking the task is still FREE first.
pub fn assign(conn: &Connection, task_id: i64, host_id: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE tasks SET state = 'ASSIGNED', host_id = ?2 WHERE id = ?1 AND state = 'FREE'",
        params![task_id, host_id],
    )?;
    if changed == 0 {
        anyhow::bail!("task {task_id} was not FREE at assignment time");
    }
    Ok(())
}

/// Return a task to FREE and clear its host, used when a run is
/// overridden or a host drops out from under an active assignment.
pub fn set_free(conn: &Connection, task_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET state = 'FREE', host_id = NULL WHERE id = ?1",
        params![task_id],
    )?;
    Ok(())
}

pub fn set_state(conn: &Connection, task_id: i64, state: TaskState) -> Result<()> {
    let state_str = state_to_str(state);
    conn.execute(
        "UPDATE tasks SET state = ?2 WHERE id = ?1",
        params![task_id, state_str],
    )?;
    Ok(())
}

fn state_to_str(state: TaskState) -> &'static str {
    match state {
        TaskState::Free => "FREE",
        TaskState::Open => "OPEN",
        TaskState::Assigned => "ASSIGNED",
        TaskState::Closed => "CLOSED",
        TaskState::Canceled => "CANCELED",
        TaskState::Failed => "FAILED",
    }
}

fn str_to_state(s: &str) -> rusqlite::Result<TaskState> {
    match s {
        "FREE" => Ok(TaskState::Free),
        "OPEN" => Ok(TaskState::Open),
        "ASSIGNED" => Ok(TaskState::Assigned),
        "CLOSED" => Ok(TaskState::Closed),
        "CANCELED" => Ok(TaskState::Canceled),
        "FAILED" => Ok(TaskState::Failed),
        other => Err(rusqlite::Error::InvalidColumnType(
            6,
            format!("unknown task state: {other}"),
            rusqlite::types::Type::Text,
        )),
    }
}

fn map_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let state_str: String = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        method: row.get(1)?,
        channel_id: row.get(2)?,
        arch: row.get(3)?,
        weight: row.get(4)?,
        priority: row.get(5)?,
        state: str_to_state(&state_str)?,
        owner: row.get(7)?,
        parent: row.get(8)?,
        host_id: row.get(9)?,
        create_ts: row.get(10)?,
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
    fn free_tasks_orders_by_priority_then_age_then_id() {
        let conn = memory_conn();
        create_task(&conn, "build", 1, "x86_64", 1.0, 20, 1, None, 100).unwrap();
        let high_pri = create_task(&conn, "build", 1, "x86_64", 1.0, 5, 1, None, 200).unwrap();
        let old_low_pri = create_task(&conn, "build", 1, "x86_64", 1.0, 20, 1, None, 50).unwrap();

        let tasks = free_tasks(&conn).unwrap();
        assert_eq!(tasks[0].id, high_pri);
        assert_eq!(tasks[1].id, old_low_pri);
    }

    #[test]
    fn assign_fails_if_task_not_free() {
        let conn = memory_conn();
        let id = create_task(&conn, "build", 1, "x86_64", 1.0, 10, 1, None, 0).unwrap();
        assign(&conn, id, 7).unwrap();
        assert!(assign(&conn, id, 8).is_err());
    }

    #[test]
    fn set_free_clears_host() {
        let conn = memory_conn();
        let id = create_task(&conn, "build", 1, "x86_64", 1.0, 10, 1, None, 0).unwrap();
        assign(&conn, id, 7).unwrap();
        set_free(&conn, id).unwrap();
        let task = get_task(&conn, id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Free);
        assert_eq!(task.host_id, None);
    }

    #[test]
    fn free_tasks_excludes_non_free_states() {
        let conn = memory_conn();
        let id = create_task(&conn, "build", 1, "x86_64", 1.0, 10, 1, None, 0).unwrap();
        set_state(&conn, id, TaskState::Closed).unwrap();
        assert!(free_tasks(&conn).unwrap().is_empty());
    }
}
