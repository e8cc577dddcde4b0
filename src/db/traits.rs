// Database trait: backend-agnostic async interface for persisted state.
//
// Implementors: JsonFileDatabase (two JSON files, the default) and
// SqliteDatabase (wraps rusqlite, behind the `sqlite` feature).
//
// Both the registry and the dedup state are written as whole snapshots.
// Callers serialize writers; backends only need to make a single save atomic.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{DedupSnapshot, RegistryRecord};

#[async_trait]
pub trait Database: Send + Sync {
    /// Human-readable location of the stored data (for `status` and logs).
    fn location(&self) -> String;

    // --- Registry ---

    /// Load the registry record. A missing store yields an empty record.
    async fn load_registry(&self) -> Result<RegistryRecord>;

    /// Replace the stored registry record.
    async fn save_registry(&self, record: &RegistryRecord) -> Result<()>;

    // --- Dedup state ---

    /// Load every account's dedup entry. A missing store yields an empty map.
    async fn load_dedup_state(&self) -> Result<DedupSnapshot>;

    /// Replace the stored dedup state with `state`.
    async fn save_dedup_state(&self, state: &DedupSnapshot) -> Result<()>;
}
