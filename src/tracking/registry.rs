// Account registry: the ordered set of tracked accounts.
//
// Owned by the command layer (add/remove/list) and read by the scheduler
// once per sweep. Every mutation rewrites the full record through the
// backend while holding the write lock, so two concurrent adds can't lose
// each other's changes.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{error, info};

use super::account::AccountId;
use crate::db::models::RegistryRecord;
use crate::db::Database;

pub struct Registry {
    record: RwLock<RegistryRecord>,
    db: Arc<dyn Database>,
}

impl Registry {
    /// Load the registry from the backend.
    ///
    /// Duplicate entries in the stored list are collapsed, keeping the first.
    pub async fn load(db: Arc<dyn Database>) -> Result<Self> {
        let mut record = db.load_registry().await?;
        let mut seen = std::collections::HashSet::new();
        record.accounts.retain(|a| seen.insert(a.clone()));
        info!(accounts = record.accounts.len(), "Loaded account registry");
        Ok(Self::with_record(db, record))
    }

    pub fn with_record(db: Arc<dyn Database>, record: RegistryRecord) -> Self {
        Self {
            record: RwLock::new(record),
            db,
        }
    }

    /// Tracked accounts in insertion order.
    pub async fn accounts(&self) -> Vec<AccountId> {
        self.record.read().await.accounts.clone()
    }

    pub async fn contains(&self, account: &AccountId) -> bool {
        self.record.read().await.accounts.contains(account)
    }

    pub async fn len(&self) -> usize {
        self.record.read().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of the full record (accounts plus settings).
    pub async fn record(&self) -> RegistryRecord {
        self.record.read().await.clone()
    }

    /// Append an account. Returns false if it was already tracked.
    pub async fn add(&self, account: &AccountId) -> bool {
        let mut record = self.record.write().await;
        if record.accounts.contains(account) {
            return false;
        }
        record.accounts.push(account.clone());
        self.save(&record).await;
        true
    }

    /// Remove an account. Returns false if it wasn't tracked.
    pub async fn remove(&self, account: &AccountId) -> bool {
        let mut record = self.record.write().await;
        let before = record.accounts.len();
        record.accounts.retain(|a| a != account);
        if record.accounts.len() == before {
            return false;
        }
        self.save(&record).await;
        true
    }

    /// Rewrite the stored record as it is now.
    pub async fn persist(&self) -> Result<()> {
        let record = self.record.read().await;
        self.db.save_registry(&record).await
    }

    async fn save(&self, record: &RegistryRecord) {
        if let Err(e) = self.db.save_registry(record).await {
            error!(error = %e, "Failed to persist registry, keeping in-memory state");
        }
    }
}
