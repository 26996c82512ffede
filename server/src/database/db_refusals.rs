//! Database operations for the refusal ledger
//!
//! A refusal records that a host should not be (re-)assigned a given
//! task. Hosts self-report soft refusals (transient capacity issues);
//! the hub records hard refusals on repeated failures. One row per
//! (host_id, task_id) pair; a later refusal overwrites an earlier one.

use anyhow::{Context, Result};
use koji_common::model::Refusal;
use rusqlite::{params, Connection};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS refusals (
            host_id INTEGER NOT NULL,
            task_id INTEGER NOT NULL,
            soft INTEGER NOT NULL,
            by_host INTEGER NOT NULL,
            msg TEXT NOT NULL DEFAULT '',
            ts INTEGER NOT NULL,
            PRIMARY KEY (host_id, task_id)
        )
        "#,
        [],
    )
    .context("failed to create refusals table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_refusals_task ON refusals(task_id)",
        [],
    )?;

    Ok(())
}

pub fn set_refusal(
    conn: &Connection,
    host_id: i64,
    task_id: i64,
    soft: bool,
    by_host: bool,
    msg: &str,
    now: i64,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO refusals (host_id, task_id, soft, by_host, msg, ts)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(host_id, task_id) DO UPDATE SET
            soft = excluded.soft, by_host = excluded.by_host, msg = excluded.msg, ts = excluded.ts
        "#,
        params![host_id, task_id, soft as i32, by_host as i32, msg, now],
    )
    .context("failed to upsert refusal")?;
    Ok(())
}

/// All refusal rows recorded against a task, regardless of expiry; the
/// caller filters by [`Refusal::is_active`] against its configured
/// `soft_refusal_timeout`.
pub fn get_refusals_for_task(conn: &Connection, task_id: i64) -> Result<Vec<Refusal>> {
    let mut stmt = conn.prepare(
        "SELECT host_id, task_id, soft, by_host, msg, ts FROM refusals WHERE task_id = ?1",
    )?;
    let rows = stmt.query_map(params![task_id], map_refusal_row)?;
    let mut refusals = Vec::new();
    for row in rows {
        refusals.push(row?);
    }
    Ok(refusals)
}

/// Drop all refusals recorded against a task, used when a task is
/// reassigned to a fresh priority tier or closed out.
pub fn purge_for_task(conn: &Connection, task_id: i64) -> Result<()> {
    conn.execute("DELETE FROM refusals WHERE task_id = ?1", params![task_id])?;
    Ok(())
}

/// All refusal rows, for the read-only admin `getTaskRefusals` RPC.
pub fn all(conn: &Connection) -> Result<Vec<Refusal>> {
    let mut stmt =
        conn.prepare("SELECT host_id, task_id, soft, by_host, msg, ts FROM refusals")?;
    let rows = stmt.query_map([], map_refusal_row)?;
    let mut refusals = Vec::new();
    for row in rows {
        refusals.push(row?);
    }
    Ok(refusals)
}

fn map_refusal_row(row: &rusqlite::Row) -> rusqlite::Result<Refusal> {
    Ok(Refusal {
        host_id: row.get(0)?,
        task_id: row.get(1)?,
        soft: row.get::<_, i64>(2)? != 0,
        by_host: row.get::<_, i64>(3)? != 0,
        msg: row.get(4)?,
        ts: row.get(5)?,
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
    fn set_refusal_upserts_on_same_pair() {
        let conn = memory_conn();
        set_refusal(&conn, 1, 1, true, true, "busy", 100).unwrap();
        set_refusal(&conn, 1, 1, false, false, "banned", 200).unwrap();

        let refusals = get_refusals_for_task(&conn, 1).unwrap();
        assert_eq!(refusals.len(), 1);
        assert!(!refusals[0].soft);
        assert_eq!(refusals[0].msg, "banned");
    }

    #[test]
    fn purge_for_task_removes_all_its_refusals() {
        let conn = memory_conn();
        set_refusal(&conn, 1, 1, true, true, "busy", 100).unwrap();
        set_refusal(&conn, 2, 1, true, true, "busy", 100).unwrap();
        purge_for_task(&conn, 1).unwrap();
        assert!(get_refusals_for_task(&conn, 1).unwrap().is_empty());
    }
}
