//! Database operations for the append-only scheduler event log
//!
//! Every assignment, refusal, and state transition worth surfacing to an
//! operator is appended here. The log is read-only from the scheduler's
//! perspective once written; `getLogMessages` exposes it via the admin API.

use anyhow::{Context, Result};
use koji_common::model::LogMessage;
use rusqlite::{params, Connection};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS log_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            task_id INTEGER,
            host_id INTEGER,
            host_name TEXT,
            msg TEXT NOT NULL
        )
        "#,
        [],
    )
    .context("failed to create log_messages table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_log_messages_task ON log_messages(task_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_log_messages_ts ON log_messages(ts)",
        [],
    )?;

    Ok(())
}

pub fn append(
    conn: &Connection,
    task_id: Option<i64>,
    host_id: Option<i64>,
    host_name: Option<&str>,
    msg: &str,
    now: i64,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO log_messages (ts, task_id, host_id, host_name, msg)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![now, task_id, host_id, host_name, msg],
    )
    .context("failed to append log message")?;
    Ok(conn.last_insert_rowid())
}

/// All log rows for a task, oldest first.
pub fn for_task(conn: &Connection, task_id: i64) -> Result<Vec<LogMessage>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, ts, task_id, host_id, host_name, msg FROM log_messages
        WHERE task_id = ?1 ORDER BY id ASC
        "#,
    )?;
    let rows = stmt.query_map(params![task_id], map_log_row)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Most recent `limit` log rows across all tasks, newest first, for the
/// admin tail view.
pub fn recent(conn: &Connection, limit: i64) -> Result<Vec<LogMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, ts, task_id, host_id, host_name, msg FROM log_messages ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], map_log_row)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn map_log_row(row: &rusqlite::Row) -> rusqlite::Result<LogMessage> {
    Ok(LogMessage {
        id: row.get(0)?,
        ts: row.get(1)?,
        task_id: row.get(2)?,
        host_id: row.get(3)?,
        host_name: row.get(4)?,
        msg: row.get(5)?,
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
    fn for_task_returns_oldest_first() {
        let conn = memory_conn();
        append(&conn, Some(1), None, None, "free", 100).unwrap();
        append(&conn, Some(1), Some(7), Some("builder1"), "assigned", 200).unwrap();

        let messages = for_task(&conn, 1).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].msg, "free");
        assert_eq!(messages[1].msg, "assigned");
    }

    #[test]
    fn recent_returns_newest_first_and_respects_limit() {
        let conn = memory_conn();
        for i in 0..5 {
            append(&conn, Some(i), None, None, "event", i * 10).unwrap();
        }
        let messages = recent(&conn, 2).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].task_id, Some(4));
        assert_eq!(messages[1].task_id, Some(3));
    }
}
