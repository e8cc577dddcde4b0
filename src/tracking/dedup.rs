// Dedup state store: per-account last-seen post and story timestamps.
//
// Locking discipline:
// - `entries` is a std Mutex held only for in-memory reads/writes, never
//   across an await.
// - Each account has its own tokio Mutex. The scrape engine holds it for the
//   read-diff-write of that account so an on-demand scrape and a sweep can't
//   interleave on the same entry. Different accounts never contend.
// - A scrape takes a `StateTicket` before it starts fetching. `remove` retires
//   the account's lock, which invalidates every outstanding ticket, so a scrape
//   that began before a removal can't write state back or notify afterwards.
//   Retiring also drops the lock from the map.
// - `write_lock` serializes persistence. The snapshot is taken after the lock
//   is acquired, so whichever writer goes last writes the newest state.
//
// Persistence failures are logged and swallowed: in-memory state keeps
// moving and the next successful write reconciles the file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error};

use super::account::AccountId;
use crate::db::models::{DedupEntry, DedupSnapshot};
use crate::db::Database;

/// Proof that the caller holds an account's state lock.
pub type AccountGuard = OwnedMutexGuard<()>;

/// One tracked lifetime of an account's state, taken before a scrape starts.
///
/// Removing the account retires every ticket taken before the removal.
#[derive(Debug, Clone)]
pub struct StateTicket {
    account: AccountId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl StateTicket {
    pub fn account(&self) -> &AccountId {
        &self.account
    }
}

pub struct DedupStore {
    entries: Mutex<DedupSnapshot>,
    account_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    write_lock: tokio::sync::Mutex<()>,
    db: Arc<dyn Database>,
}

impl DedupStore {
    /// Load persisted state from the backend.
    pub async fn load(db: Arc<dyn Database>) -> Result<Self> {
        let entries = db.load_dedup_state().await?;
        debug!(accounts = entries.len(), "Loaded dedup state");
        Ok(Self::with_entries(db, entries))
    }

    /// Build a store around already-loaded entries.
    pub fn with_entries(db: Arc<dyn Database>, entries: DedupSnapshot) -> Self {
        Self {
            entries: Mutex::new(entries),
            account_locks: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
            db,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, DedupSnapshot> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>> {
        self.account_locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ticket for the account's current lifetime.
    pub fn ticket(&self, account: &AccountId) -> StateTicket {
        let lock = Arc::clone(self.locks().entry(account.clone()).or_default());
        StateTicket {
            account: account.clone(),
            lock,
        }
    }

    /// Whether the account hasn't been removed since the ticket was taken.
    pub fn is_live(&self, ticket: &StateTicket) -> bool {
        self.locks()
            .get(&ticket.account)
            .is_some_and(|lock| Arc::ptr_eq(lock, &ticket.lock))
    }

    /// Acquire the account's state lock through a ticket.
    /// `None` once the account was removed after the ticket was taken.
    pub async fn lock_ticket(&self, ticket: &StateTicket) -> Option<AccountGuard> {
        let guard = Arc::clone(&ticket.lock).lock_owned().await;
        self.is_live(ticket).then_some(guard)
    }

    /// Acquire the exclusive state lock for one account.
    pub async fn lock_account(&self, account: &AccountId) -> AccountGuard {
        loop {
            let ticket = self.ticket(account);
            if let Some(guard) = self.lock_ticket(&ticket).await {
                return guard;
            }
        }
    }

    /// Give back a ticket that won't be used, dropping the account's lock when
    /// nobody else holds it. Unlike `retire`, other tickets stay valid.
    pub fn release(&self, ticket: StateTicket) {
        let mut locks = self.locks();
        let unshared = locks.get(&ticket.account).is_some_and(|lock| {
            // One reference in the map, one in this ticket.
            Arc::ptr_eq(lock, &ticket.lock) && Arc::strong_count(lock) == 2
        });
        if unshared {
            locks.remove(&ticket.account);
        }
    }

    /// End the account's current lifetime. Tickets taken so far stop locking.
    pub fn retire(&self, ticket: &StateTicket) {
        let mut locks = self.locks();
        if locks
            .get(&ticket.account)
            .is_some_and(|lock| Arc::ptr_eq(lock, &ticket.lock))
        {
            locks.remove(&ticket.account);
        }
    }

    /// Current entry for an account, if one has been created.
    pub fn get(&self, account: &AccountId) -> Option<DedupEntry> {
        self.entries().get(account).copied()
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> DedupSnapshot {
        self.entries().clone()
    }

    /// Create an empty entry if the account has none yet, then persist.
    pub async fn ensure_entry(&self, _guard: &AccountGuard, account: &AccountId) {
        let created = {
            let mut entries = self.entries();
            if entries.contains_key(account) {
                false
            } else {
                entries.insert(account.clone(), DedupEntry::default());
                true
            }
        };
        if created {
            self.persist_logged().await;
        }
    }

    /// Move `last_post_time` forward to `posted_at` and persist.
    ///
    /// Never moves it backwards: an older timestamp leaves the entry as is.
    pub async fn advance_post_time(
        &self,
        _guard: &AccountGuard,
        account: &AccountId,
        posted_at: DateTime<Utc>,
    ) -> DedupEntry {
        let entry = {
            let mut entries = self.entries();
            let entry = entries.entry(account.clone()).or_default();
            if entry.last_post_time.map_or(true, |last| posted_at > last) {
                entry.last_post_time = Some(posted_at);
            }
            *entry
        };
        self.persist_logged().await;
        entry
    }

    /// Record that a story was reported at `seen_at` and persist.
    pub async fn record_story(
        &self,
        _guard: &AccountGuard,
        account: &AccountId,
        seen_at: DateTime<Utc>,
    ) -> DedupEntry {
        let entry = {
            let mut entries = self.entries();
            let entry = entries.entry(account.clone()).or_default();
            entry.last_story_time = Some(seen_at);
            *entry
        };
        self.persist_logged().await;
        entry
    }

    /// Drop an account's entry and persist. Returns whether one existed.
    ///
    /// Waits for any in-progress write on the account, then retires its
    /// lifetime so scrapes already underway discard their results.
    pub async fn remove(&self, account: &AccountId) -> bool {
        let ticket = self.ticket(account);
        let guard = Arc::clone(&ticket.lock).lock_owned().await;
        let removed = self.entries().remove(account).is_some();
        self.retire(&ticket);
        if removed {
            self.persist_logged().await;
        }
        drop(guard);
        removed
    }

    /// Write the full state to the backend.
    pub async fn persist(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let snapshot = self.snapshot();
        self.db.save_dedup_state(&snapshot).await?;
        debug!(accounts = snapshot.len(), "Persisted dedup state");
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            error!(error = %e, "Failed to persist dedup state, keeping in-memory state");
        }
    }
}
