//! Read-back of a host's last self-reported capabilities
//!
//! `db_hosts` owns the normalized, queryable view of a host (arches,
//! capacity, channel memberships); this module stores the raw
//! [`HostCapabilities`] document verbatim so the admin `host_data` RPC can
//! return exactly what the host last reported, including its optional
//! free-text description.

use anyhow::{Context, Result};
use koji_common::model::HostCapabilities;
use rusqlite::{params, Connection};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS host_data (
            host_id INTEGER PRIMARY KEY,
            capabilities_json TEXT NOT NULL
        )
        "#,
        [],
    )
    .context("failed to create host_data table")?;
    Ok(())
}

pub fn set(conn: &Connection, host_id: i64, caps: &HostCapabilities) -> Result<()> {
    let json = serde_json::to_string(caps).context("failed to serialize host capabilities")?;
    conn.execute(
        r#"
        INSERT INTO host_data (host_id, capabilities_json) VALUES (?1, ?2)
        ON CONFLICT(host_id) DO UPDATE SET capabilities_json = excluded.capabilities_json
        "#,
        params![host_id, json],
    )
    .context("failed to upsert host_data")?;
    Ok(())
}

pub fn get(conn: &Connection, host_id: i64) -> Result<Option<HostCapabilities>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT capabilities_json FROM host_data WHERE host_id = ?1",
            params![host_id],
            |row| row.get(0),
        )
        .ok();
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json).with_context(|| {
            format!("corrupt host_data json for host {host_id}")
        })?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn).unwrap();

        let caps = HostCapabilities {
            arches: "x86_64".into(),
            channels: vec![1],
            capacity: 4.0,
            ready: true,
            task_load: 0.0,
            description: Some("builder1.example.com".into()),
        };
        set(&conn, 1, &caps).unwrap();

        let fetched = get(&conn, 1).unwrap().unwrap();
        assert_eq!(fetched, caps);
    }

    #[test]
    fn get_missing_host_returns_none() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn).unwrap();
        assert!(get(&conn, 99).unwrap().is_none());
    }
}
