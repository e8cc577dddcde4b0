// Shared fakes for integration tests: an in-memory fetcher, a recording sink
// and an in-memory backend.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};

use instawatch::clock::ManualClock;
use instawatch::db::models::{DedupSnapshot, RegistryRecord};
use instawatch::db::Database;
use instawatch::instagram::fetcher::{FetchError, Post, Profile, ProfileFetcher};
use instawatch::notify::{DestinationHandle, NotificationSink};
use instawatch::pipeline::ScrapeEngine;
use instawatch::tracking::{AccountId, DedupStore, Registry};

pub fn id(name: &str) -> AccountId {
    AccountId::parse(name).unwrap()
}

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn post(shortcode: &str, secs: i64) -> Post {
    Post::from_shortcode(shortcode, t(secs))
}

#[derive(Default)]
struct FakeAccount {
    posts: Vec<Post>,
    private: bool,
    story: bool,
    /// Errors returned by the next `resolve` calls, in order.
    resolve_failures: VecDeque<FetchError>,
}

/// Profile fetcher backed by in-memory accounts. Unknown accounts are NotFound.
#[derive(Default)]
pub struct FakeFetcher {
    accounts: Mutex<HashMap<AccountId, FakeAccount>>,
    resolve_calls: Mutex<HashMap<AccountId, u32>>,
    story_probes: Mutex<u32>,
    resolve_delay: Mutex<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create (or replace the timeline of) a public account. Posts newest first.
    pub fn set_posts(&self, account: &str, posts: Vec<Post>) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.entry(id(account)).or_default().posts = posts;
    }

    /// Put a new post at the top of the timeline.
    pub fn publish(&self, account: &str, post: Post) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.entry(id(account)).or_default().posts.insert(0, post);
    }

    pub fn set_private(&self, account: &str) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.entry(id(account)).or_default().private = true;
    }

    pub fn set_story(&self, account: &str, present: bool) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.entry(id(account)).or_default().story = present;
    }

    pub fn fail_resolve(&self, account: &str, errors: impl IntoIterator<Item = FetchError>) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts
            .entry(id(account))
            .or_default()
            .resolve_failures
            .extend(errors);
    }

    /// Make every `resolve` take this long, as a slow network would.
    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock().unwrap() = delay;
    }

    pub fn resolve_calls(&self, account: &str) -> u32 {
        *self.resolve_calls.lock().unwrap().get(&id(account)).unwrap_or(&0)
    }

    pub fn story_probes(&self) -> u32 {
        *self.story_probes.lock().unwrap()
    }
}

#[async_trait]
impl ProfileFetcher for FakeFetcher {
    async fn resolve(&self, account: &AccountId) -> Result<Profile, FetchError> {
        *self
            .resolve_calls
            .lock()
            .unwrap()
            .entry(account.clone())
            .or_default() += 1;

        let delay = *self.resolve_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut accounts = self.accounts.lock().unwrap();
        let fake = accounts.get_mut(account).ok_or(FetchError::NotFound)?;
        if let Some(err) = fake.resolve_failures.pop_front() {
            return Err(err);
        }
        if fake.private {
            return Err(FetchError::PrivateOrRestricted);
        }
        Ok(Profile {
            user_id: account.to_string(),
            is_private: false,
            first_page: fake.posts.clone(),
            next_cursor: None,
        })
    }

    fn recent_posts<'a>(
        &'a self,
        profile: &'a Profile,
        limit: usize,
    ) -> BoxStream<'a, Result<Post, FetchError>> {
        stream::iter(profile.first_page.clone().into_iter().take(limit).map(Ok)).boxed()
    }

    async fn story_present(&self, account: &AccountId) -> Result<bool, FetchError> {
        *self.story_probes.lock().unwrap() += 1;
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts.get(account).is_some_and(|a| a.story))
    }
}

/// Sink that records every delivery instead of sending it.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(AccountId, String)>>,
    ensured: Mutex<Vec<AccountId>>,
    removed: Mutex<Vec<AccountId>>,
    fail_sends: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(AccountId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_for(&self, account: &str) -> Vec<String> {
        let key = id(account);
        self.messages()
            .into_iter()
            .filter(|(a, _)| *a == key)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn ensured(&self) -> Vec<AccountId> {
        self.ensured.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<AccountId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn ensure_destination(&self, key: &AccountId) -> Result<DestinationHandle> {
        self.ensured.lock().unwrap().push(key.clone());
        Ok(DestinationHandle {
            key: key.clone(),
            id: format!("thread-{key}"),
        })
    }

    async fn send(&self, destination: &DestinationHandle, text: &str) -> Result<()> {
        if *self.fail_sends.lock().unwrap() {
            anyhow::bail!("sink unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.key.clone(), text.to_string()));
        Ok(())
    }

    async fn remove_destination(&self, key: &AccountId) -> Result<bool> {
        self.removed.lock().unwrap().push(key.clone());
        Ok(true)
    }
}

/// Backend that keeps the last saved registry and state in memory.
#[derive(Default)]
pub struct MemoryDb {
    registry: Mutex<RegistryRecord>,
    state: Mutex<DedupSnapshot>,
}

impl MemoryDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn saved_state(&self) -> DedupSnapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn saved_registry(&self) -> RegistryRecord {
        self.registry.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for MemoryDb {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn load_registry(&self) -> Result<RegistryRecord> {
        Ok(self.saved_registry())
    }

    async fn save_registry(&self, record: &RegistryRecord) -> Result<()> {
        *self.registry.lock().unwrap() = record.clone();
        Ok(())
    }

    async fn load_dedup_state(&self) -> Result<DedupSnapshot> {
        Ok(self.saved_state())
    }

    async fn save_dedup_state(&self, state: &DedupSnapshot) -> Result<()> {
        *self.state.lock().unwrap() = state.clone();
        Ok(())
    }
}

/// A fully wired engine over fakes.
pub struct Harness {
    pub fetcher: Arc<FakeFetcher>,
    pub sink: Arc<RecordingSink>,
    pub db: Arc<MemoryDb>,
    pub clock: Arc<ManualClock>,
    pub dedup: Arc<DedupStore>,
    pub registry: Arc<Registry>,
    pub engine: Arc<ScrapeEngine>,
}

impl Harness {
    pub fn new() -> Self {
        let fetcher = FakeFetcher::new();
        let sink = RecordingSink::new();
        let db = MemoryDb::new();
        let clock = Arc::new(ManualClock::new(t(1_000_000)));
        let dedup = Arc::new(DedupStore::with_entries(db.clone(), DedupSnapshot::new()));
        let registry = Arc::new(Registry::with_record(db.clone(), RegistryRecord::default()));
        let engine = Arc::new(ScrapeEngine::new(
            fetcher.clone(),
            sink.clone(),
            dedup.clone(),
            clock.clone(),
        ));
        Self {
            fetcher,
            sink,
            db,
            clock,
            dedup,
            registry,
            engine,
        }
    }
}
