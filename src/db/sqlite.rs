// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex so the backend can be
// shared behind `Arc<dyn Database>`. Each save replaces the full table
// contents inside one transaction, matching the snapshot semantics of the
// JSON backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::warn;

use super::models::{parse_timestamp, DedupEntry, DedupSnapshot, RegistryRecord};
use super::traits::Database;
use crate::tracking::account::AccountId;

const CHANNEL_NAME_KEY: &str = "channel_name";
const TOKEN_KEY: &str = "token";

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    path: String,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection. `path` is only used for display.
    pub fn new(conn: Connection, path: &str) -> Self {
        Self {
            conn: Mutex::new(conn),
            path: path.to_string(),
        }
    }
}

fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn parse_stored_time(account: &str, raw: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = raw?;
    let parsed = parse_timestamp(&raw);
    if parsed.is_none() {
        warn!(account = account, value = %raw, "Ignoring unparseable timestamp");
    }
    parsed
}

#[async_trait]
impl Database for SqliteDatabase {
    fn location(&self) -> String {
        self.path.clone()
    }

    async fn load_registry(&self) -> Result<RegistryRecord> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare("SELECT account FROM tracked_accounts ORDER BY position")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut accounts = Vec::with_capacity(names.len());
        for name in names {
            match AccountId::parse(&name) {
                Ok(id) => accounts.push(id),
                Err(e) => warn!(error = %e, "Skipping invalid tracked account"),
            }
        }

        Ok(RegistryRecord {
            accounts,
            channel_name: get_setting(&conn, CHANNEL_NAME_KEY)?,
            token: get_setting(&conn, TOKEN_KEY)?,
        })
    }

    async fn save_registry(&self, record: &RegistryRecord) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM tracked_accounts", [])?;
        for (position, account) in record.accounts.iter().enumerate() {
            tx.execute(
                "INSERT INTO tracked_accounts (position, account) VALUES (?1, ?2)",
                params![position as i64, account.as_str()],
            )?;
        }

        for (key, value) in [
            (CHANNEL_NAME_KEY, &record.channel_name),
            (TOKEN_KEY, &record.token),
        ] {
            match value {
                Some(v) => {
                    tx.execute(
                        "INSERT INTO settings (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = ?2",
                        params![key, v],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
                }
            }
        }

        tx.commit().context("Failed to commit registry")?;
        Ok(())
    }

    async fn load_dedup_state(&self) -> Result<DedupSnapshot> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT account, last_post_time, last_story_time FROM dedup_state")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut state = DedupSnapshot::new();
        for (name, post, story) in rows {
            let Ok(account) = AccountId::parse(&name) else {
                warn!(account = %name, "Skipping dedup row with invalid username");
                continue;
            };
            let entry = DedupEntry {
                last_post_time: parse_stored_time(&name, post),
                last_story_time: parse_stored_time(&name, story),
            };
            state.insert(account, entry);
        }
        Ok(state)
    }

    async fn save_dedup_state(&self, state: &DedupSnapshot) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM dedup_state", [])?;
        for (account, entry) in state {
            tx.execute(
                "INSERT INTO dedup_state (account, last_post_time, last_story_time)
                 VALUES (?1, ?2, ?3)",
                params![
                    account.as_str(),
                    entry.last_post_time.map(|t| t.to_rfc3339()),
                    entry.last_story_time.map(|t| t.to_rfc3339()),
                ],
            )?;
        }

        tx.commit().context("Failed to commit dedup state")?;
        Ok(())
    }
}
