// Database layer: persisted registry and dedup state.
//
// Two interchangeable backends sit behind the `Database` trait. The JSON
// backend is the default and keeps the familiar `config.json` +
// `last_post_times.json` pair. SQLite uses rusqlite with the "bundled"
// feature so there's no system SQLite dependency.

pub mod json;
pub mod models;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use traits::Database;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

/// Open the JSON-file backend. Files are created on first save.
pub fn open_json(registry_path: &Path, state_path: &Path) -> Arc<dyn Database> {
    Arc::new(json::JsonFileDatabase::new(registry_path, state_path))
}

/// Open (or create) the SQLite database and run migrations.
#[cfg(feature = "sqlite")]
pub fn open_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    use anyhow::Context;
    use rusqlite::Connection;

    // Create parent directories if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {}", db_path))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    schema::create_tables(&conn)?;

    Ok(Arc::new(sqlite::SqliteDatabase::new(conn, db_path)))
}

#[cfg(not(feature = "sqlite"))]
pub fn open_sqlite(_db_path: &str) -> Result<Arc<dyn Database>> {
    anyhow::bail!(
        "INSTAWATCH_BACKEND=sqlite but the 'sqlite' feature is not compiled in.\n\
         Rebuild with: cargo build --features sqlite"
    )
}
