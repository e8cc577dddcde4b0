// SQLite schema: table creation plus a `schema_version` marker so later
// layout changes can tell which version a file was created with.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent; runs on every open.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Tracked accounts, in the order they were added
        CREATE TABLE IF NOT EXISTS tracked_accounts (
            position INTEGER PRIMARY KEY,
            account TEXT NOT NULL UNIQUE
        );

        -- Per-account dedup timestamps (RFC 3339, NULL when never seen)
        CREATE TABLE IF NOT EXISTS dedup_state (
            account TEXT PRIMARY KEY,
            last_post_time TEXT,
            last_story_time TEXT
        );

        -- Long-lived settings kept with the registry (channel name, token)
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Count the number of user-created tables in the database.
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        assert_eq!(table_count(&conn).unwrap(), 4);
    }
}
