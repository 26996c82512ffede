//! Database operations for build channels
//!
//! Channels are first-class rows so bin keys and the admin read API can
//! render human names, not just ids. The set of known channels is seeded
//! from `hub.toml` at startup and is otherwise read-only from the
//! scheduler's point of view.

use anyhow::{Context, Result};
use koji_common::model::Channel;
use rusqlite::{params, Connection};
use std::collections::HashMap;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        )
        "#,
        [],
    )
    .context("failed to create channels table")?;
    Ok(())
}

/// Upsert the configured channel id -> name map. Idempotent; safe to call
/// on every startup as the configuration evolves.
pub fn seed(conn: &Connection, channels: &HashMap<i64, String>) -> Result<()> {
    for (id, name) in channels {
        conn.execute(
            r#"
            INSERT INTO channels (id, name) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
            params![id, name],
        )
        .with_context(|| format!("failed to seed channel {id}"))?;
    }
    Ok(())
}

/// All known channels, ordered by id. Backs the admin read endpoint that
/// lets an operator resolve the channel ids on a task or host capability
/// row to their configured names.
pub fn all(conn: &Connection) -> Result<Vec<Channel>> {
    let mut stmt = conn.prepare("SELECT id, name FROM channels ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Channel {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    let mut channels = Vec::new();
    for row in rows {
        channels.push(row?);
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_returns_seeded_channels_ordered_by_id() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn).unwrap();

        let mut seeded = HashMap::new();
        seeded.insert(2, "f41".to_string());
        seeded.insert(1, "f40".to_string());
        seed(&conn, &seeded).unwrap();

        let channels = all(&conn).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, 1);
        assert_eq!(channels[0].name, "f40");
        assert_eq!(channels[1].id, 2);
    }
}
