//! Database operations for the host registry
//!
//! A host row holds identity and capacity; its channel memberships live in
//! a join table so a host can belong to any number of channels.

use anyhow::{Context, Result};
use koji_common::model::{Host, HostCapabilities};
use rusqlite::{params, Connection};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS hosts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            arches TEXT NOT NULL DEFAULT '',
            capacity REAL NOT NULL DEFAULT 2.0,
            task_load REAL NOT NULL DEFAULT 0.0,
            ready INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_update INTEGER NOT NULL DEFAULT 0
        )
        "#,
        [],
    )
    .context("failed to create hosts table")?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS host_channels (
            host_id INTEGER NOT NULL REFERENCES hosts(id),
            channel_id INTEGER NOT NULL,
            PRIMARY KEY (host_id, channel_id)
        )
        "#,
        [],
    )
    .context("failed to create host_channels table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_hosts_enabled ON hosts(enabled)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_hosts_last_update ON hosts(last_update)",
        [],
    )?;

    Ok(())
}

/// Create the host row if it doesn't exist, or update its self-reported
/// capabilities and heartbeat if it does. Returns the host's id.
pub fn upsert_capabilities(
    conn: &Connection,
    host_name: &str,
    caps: &HostCapabilities,
    now: i64,
) -> Result<i64> {
    let updated = conn.execute(
        r#"
        UPDATE hosts
        SET arches = ?2, capacity = ?3, task_load = ?4, ready = ?5, last_update = ?6, enabled = 1
        WHERE name = ?1
        "#,
        params![
            host_name,
            caps.arches,
            caps.capacity,
            caps.task_load,
            caps.ready as i32,
            now,
        ],
    )?;

    let host_id = if updated == 0 {
        conn.execute(
            r#"
            INSERT INTO hosts (name, arches, capacity, task_load, ready, enabled, last_update)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
            "#,
            params![
                host_name,
                caps.arches,
                caps.capacity,
                caps.task_load,
                caps.ready as i32,
                now,
            ],
        )
        .with_context(|| format!("failed to insert new host: {host_name}"))?;
        conn.last_insert_rowid()
    } else {
        conn.query_row(
            "SELECT id FROM hosts WHERE name = ?1",
            params![host_name],
            |row| row.get(0),
        )?
    };

    conn.execute(
        "DELETE FROM host_channels WHERE host_id = ?1",
        params![host_id],
    )?;
    for channel_id in &caps.channels {
        conn.execute(
            "INSERT INTO host_channels (host_id, channel_id) VALUES (?1, ?2)",
            params![host_id, channel_id],
        )?;
    }

    Ok(host_id)
}

/// Update only the heartbeat timestamp, used by `getTasksForHost` so a
/// host appearing via poll is immediately visible as fresh without
/// requiring a full `setHostData` call.
pub fn touch_heartbeat(conn: &Connection, host_id: i64, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE hosts SET last_update = ?2 WHERE id = ?1",
        params![host_id, now],
    )?;
    Ok(())
}

pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Host>> {
    let host_id: Option<i64> = conn
        .query_row("SELECT id FROM hosts WHERE name = ?1", params![name], |row| {
            row.get(0)
        })
        .ok();
    match host_id {
        Some(id) => get_by_id(conn, id),
        None => Ok(None),
    }
}

pub fn get_by_id(conn: &Connection, host_id: i64) -> Result<Option<Host>> {
    let row = conn.query_row(
        "SELECT id, name, arches, capacity, task_load, ready, enabled, last_update FROM hosts WHERE id = ?1",
        params![host_id],
        map_host_row,
    );
    match row {
        Ok(mut host) => {
            host.channels = channels_for(conn, host.id)?;
            Ok(Some(host))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All enabled hosts, with their channel memberships populated. Readiness
/// and staleness are evaluated by the caller (the host registry), not
/// here: a disabled host is excluded, but a stale *enabled* host is
/// still returned so in-flight assignments remain observable.
pub fn get_all_enabled(conn: &Connection) -> Result<Vec<Host>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, arches, capacity, task_load, ready, enabled, last_update FROM hosts WHERE enabled = 1",
    )?;
    let rows = stmt.query_map([], map_host_row)?;

    let mut hosts = Vec::new();
    for row in rows {
        let mut host = row?;
        host.channels = channels_for(conn, host.id)?;
        hosts.push(host);
    }
    Ok(hosts)
}

/// Mark a host not-ready. Used when a host is evicted for going silent.
pub fn mark_unready(conn: &Connection, host_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE hosts SET ready = 0 WHERE id = ?1",
        params![host_id],
    )?;
    Ok(())
}

fn channels_for(conn: &Connection, host_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT channel_id FROM host_channels WHERE host_id = ?1")?;
    let rows = stmt.query_map(params![host_id], |row| row.get(0))?;
    let mut channels = Vec::new();
    for row in rows {
        channels.push(row?);
    }
    Ok(channels)
}

fn map_host_row(row: &rusqlite::Row) -> rusqlite::Result<Host> {
    Ok(Host {
        id: row.get(0)?,
        name: row.get(1)?,
        arches: row.get(2)?,
        channels: Vec::new(),
        capacity: row.get(3)?,
        task_load: row.get(4)?,
        ready: row.get::<_, i64>(5)? != 0,
        enabled: row.get::<_, i64>(6)? != 0,
        last_update: row.get(7)?,
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

    fn caps() -> HostCapabilities {
        HostCapabilities {
            arches: "x86_64".to_string(),
            channels: vec![1, 2],
            capacity: 4.0,
            ready: true,
            task_load: 0.0,
            description: None,
        }
    }

    #[test]
    fn upsert_creates_then_updates_same_host() {
        let conn = memory_conn();
        let id1 = upsert_capabilities(&conn, "builder1", &caps(), 100).unwrap();

        let mut updated = caps();
        updated.task_load = 2.0;
        let id2 = upsert_capabilities(&conn, "builder1", &updated, 200).unwrap();

        assert_eq!(id1, id2);
        let host = get_by_id(&conn, id1).unwrap().unwrap();
        assert_eq!(host.task_load, 2.0);
        assert_eq!(host.last_update, 200);
        assert_eq!(host.channels, vec![1, 2]);
    }

    #[test]
    fn touch_heartbeat_updates_last_update_only() {
        let conn = memory_conn();
        let id = upsert_capabilities(&conn, "builder1", &caps(), 100).unwrap();
        touch_heartbeat(&conn, id, 500).unwrap();
        let host = get_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(host.last_update, 500);
        assert_eq!(host.capacity, 4.0);
    }

    #[test]
    fn get_all_enabled_excludes_disabled_hosts() {
        let conn = memory_conn();
        upsert_capabilities(&conn, "builder1", &caps(), 100).unwrap();
        let id2 = upsert_capabilities(&conn, "builder2", &caps(), 100).unwrap();
        conn.execute("UPDATE hosts SET enabled = 0 WHERE id = ?1", params![id2])
            .unwrap();

        let hosts = get_all_enabled(&conn).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "builder1");
    }
}
