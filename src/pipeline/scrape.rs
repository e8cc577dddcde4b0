// Scrape engine: one account, start to finish.
//
//   Resolving -> Diffing -> ProbingStory -> Notifying -> Done
//
// Any stage may fail with a fetch error. NotFound and PrivateOrRestricted are
// final; RateLimited and TransientNetwork are handed back so the scheduler
// can retry. Story probe failures are logged and don't fail the scrape,
// because post state may already have moved by then.
//
// Network calls happen outside the per-account lock. The lock covers only
// reading the stored times, diffing and writing them back, so a slow fetch
// (including the rate governor's sleep) never blocks another scrape.
//
// Each scrape holds a state ticket from before its first fetch. If the account
// is removed meanwhile, the ticket no longer locks and the scrape is abandoned:
// nothing is written back and nothing is sent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use super::diff::{diff_posts, DiffPolicy};
use super::story::story_debounced;
use crate::clock::Clock;
use crate::instagram::fetcher::{
    story_url, FailureKind, FetchError, Post, Profile, ProfileFetcher, StoryProbeResult,
    RECENT_POST_LIMIT,
};
use crate::notify::{NotificationEvent, NotificationSink};
use crate::tracking::account::AccountId;
use crate::tracking::dedup::{DedupStore, StateTicket};

/// Pause between consecutive messages to the same destination.
pub const DEFAULT_MESSAGE_DELAY: Duration = Duration::from_secs(2);

/// Which caller is scraping, and therefore how much gets reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMode {
    /// On-demand scrape (after `add`, or `instawatch scrape`): report every new post.
    Forced,
    /// Periodic sweep: report at most the newest post, seed silently.
    Scheduled,
}

impl ScrapeMode {
    pub fn policy(self) -> DiffPolicy {
        match self {
            ScrapeMode::Forced => DiffPolicy::ReportAll,
            ScrapeMode::Scheduled => DiffPolicy::NewestOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStage {
    Resolving,
    Diffing,
    ProbingStory,
    Notifying,
}

impl std::fmt::Display for ScrapeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScrapeStage::Resolving => "resolving",
            ScrapeStage::Diffing => "diffing",
            ScrapeStage::ProbingStory => "probing story",
            ScrapeStage::Notifying => "notifying",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("scrape of {account} failed while {stage}: {source}")]
pub struct ScrapeError {
    pub account: AccountId,
    pub stage: ScrapeStage,
    #[source]
    pub source: FetchError,
}

impl ScrapeError {
    pub fn new(account: &AccountId, stage: ScrapeStage, source: FetchError) -> Self {
        Self {
            account: account.clone(),
            stage,
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.source.kind()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Summary of one completed scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeOutcome {
    pub account: AccountId,
    pub posts_notified: usize,
    pub story_notified: bool,
    /// State was initialized from the newest post without reporting anything.
    pub seeded: bool,
    pub delivered: usize,
    pub delivery_failures: usize,
    /// The account was removed while the scrape ran; its results were dropped.
    pub abandoned: bool,
}

impl ScrapeOutcome {
    fn new(account: AccountId) -> Self {
        Self {
            account,
            posts_notified: 0,
            story_notified: false,
            seeded: false,
            delivered: 0,
            delivery_failures: 0,
            abandoned: false,
        }
    }

    /// Outcome of a scrape dropped because its account is no longer tracked.
    pub fn abandoned(account: AccountId) -> Self {
        Self {
            abandoned: true,
            ..Self::new(account)
        }
    }

    /// Notifications queued by this scrape (posts plus story).
    pub fn notifications(&self) -> usize {
        self.posts_notified + usize::from(self.story_notified)
    }
}

pub struct ScrapeEngine {
    fetcher: Arc<dyn ProfileFetcher>,
    sink: Arc<dyn NotificationSink>,
    dedup: Arc<DedupStore>,
    clock: Arc<dyn Clock>,
    message_delay: Duration,
}

impl ScrapeEngine {
    pub fn new(
        fetcher: Arc<dyn ProfileFetcher>,
        sink: Arc<dyn NotificationSink>,
        dedup: Arc<DedupStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            dedup,
            clock,
            message_delay: DEFAULT_MESSAGE_DELAY,
        }
    }

    pub fn with_message_delay(mut self, delay: Duration) -> Self {
        self.message_delay = delay;
        self
    }

    pub fn dedup(&self) -> &Arc<DedupStore> {
        &self.dedup
    }

    pub fn sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }

    /// Check that an account exists and is publicly visible.
    pub async fn validate(&self, account: &AccountId) -> Result<Profile, ScrapeError> {
        self.fetcher
            .resolve(account)
            .await
            .map_err(|e| ScrapeError::new(account, ScrapeStage::Resolving, e))
    }

    /// Resolve and scrape an account.
    pub async fn scrape(
        &self,
        account: &AccountId,
        mode: ScrapeMode,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let ticket = self.dedup.ticket(account);
        self.scrape_ticket(&ticket, mode).await
    }

    /// Resolve and scrape under a ticket the caller took earlier.
    pub async fn scrape_ticket(
        &self,
        ticket: &StateTicket,
        mode: ScrapeMode,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let profile = self.validate(ticket.account()).await?;
        self.scrape_resolved(ticket, &profile, mode).await
    }

    /// Scrape an account whose profile was already resolved (the add path
    /// resolves first to pick a reply, then reuses the profile here).
    pub async fn scrape_resolved(
        &self,
        ticket: &StateTicket,
        profile: &Profile,
        mode: ScrapeMode,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let account = ticket.account();
        let mut outcome = ScrapeOutcome::new(account.clone());
        let now = self.clock.now();

        if !self.dedup.is_live(ticket) {
            return Ok(abandon(outcome));
        }

        // Diffing: fetch without holding state, then diff under the account lock.
        let posts: Vec<Post> = self
            .fetcher
            .recent_posts(profile, RECENT_POST_LIMIT)
            .take(RECENT_POST_LIMIT)
            .try_collect()
            .await
            .map_err(|e| ScrapeError::new(account, ScrapeStage::Diffing, e))?;

        let mut events = Vec::new();
        let last_story = {
            let Some(guard) = self.dedup.lock_ticket(ticket).await else {
                return Ok(abandon(outcome));
            };
            let stored = self.dedup.get(account).unwrap_or_default();
            let diff = diff_posts(&posts, stored.last_post_time, mode.policy());

            match diff.advance_to {
                Some(t) => {
                    self.dedup.advance_post_time(&guard, account, t).await;
                }
                None => self.dedup.ensure_entry(&guard, account).await,
            }

            outcome.seeded = diff.seeded;
            outcome.posts_notified = diff.to_notify.len();
            events.extend(
                diff.to_notify
                    .iter()
                    .map(|post| post_event(account, post, now)),
            );
            stored.last_story_time
        };

        if outcome.seeded {
            debug!(account = %account, fetched = posts.len(), "Seeded post state");
        }

        // ProbingStory
        if story_debounced(last_story, now) {
            debug!(account = %account, "Story recently reported, skipping probe");
        } else {
            match self.probe_story(account).await {
                Ok(probe) if probe.present => {
                    let Some(guard) = self.dedup.lock_ticket(ticket).await else {
                        return Ok(abandon(outcome));
                    };
                    // A concurrent scrape may have recorded the same story meanwhile.
                    let latest = self.dedup.get(account).and_then(|e| e.last_story_time);
                    if !story_debounced(latest, probe.observed_at) {
                        self.dedup
                            .record_story(&guard, account, probe.observed_at)
                            .await;
                        outcome.story_notified = true;
                        events.push(story_event(account));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        account = %account,
                        error = %ScrapeError::new(account, ScrapeStage::ProbingStory, e),
                        "Story probe failed"
                    );
                }
            }
        }

        // Notifying
        if !events.is_empty() {
            if !self.dedup.is_live(ticket) {
                return Ok(abandon(outcome));
            }
            self.deliver(&events, &mut outcome).await;
        }

        info!(
            account = %account,
            mode = ?mode,
            posts = outcome.posts_notified,
            story = outcome.story_notified,
            seeded = outcome.seeded,
            delivered = outcome.delivered,
            "Scrape complete"
        );
        Ok(outcome)
    }

    async fn probe_story(&self, account: &AccountId) -> Result<StoryProbeResult, FetchError> {
        let present = self.fetcher.story_present(account).await?;
        Ok(StoryProbeResult {
            present,
            observed_at: self.clock.now(),
        })
    }

    /// Send queued events in order, one destination lookup per destination,
    /// pausing between consecutive messages to the same destination.
    async fn deliver(&self, events: &[NotificationEvent], outcome: &mut ScrapeOutcome) {
        let mut start = 0;
        while start < events.len() {
            let key = &events[start].destination;
            let end = events[start..]
                .iter()
                .position(|e| &e.destination != key)
                .map_or(events.len(), |offset| start + offset);
            let batch = &events[start..end];
            start = end;

            let handle = match self.sink.ensure_destination(key).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(
                        account = %key,
                        stage = %ScrapeStage::Notifying,
                        error = %e,
                        dropped = batch.len(),
                        "Couldn't resolve notification destination"
                    );
                    outcome.delivery_failures += batch.len();
                    continue;
                }
            };

            for (i, event) in batch.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(self.message_delay).await;
                }
                match self.sink.send(&handle, &event.text).await {
                    Ok(()) => outcome.delivered += 1,
                    Err(e) => {
                        warn!(account = %key, error = %e, "Notification delivery failed");
                        outcome.delivery_failures += 1;
                    }
                }
            }
        }
    }
}

fn abandon(outcome: ScrapeOutcome) -> ScrapeOutcome {
    info!(account = %outcome.account, "Account removed during scrape, discarding results");
    ScrapeOutcome::abandoned(outcome.account)
}

fn post_event(account: &AccountId, post: &Post, now: DateTime<Utc>) -> NotificationEvent {
    NotificationEvent {
        destination: account.clone(),
        text: format!(
            "New post from `{account}` at {}: {}",
            now.format("%Y-%m-%d %H:%M:%S UTC"),
            post.url
        ),
    }
}

fn story_event(account: &AccountId) -> NotificationEvent {
    NotificationEvent {
        destination: account.clone(),
        text: format!("Story URL for `{account}`: {}", story_url(account)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mode_maps_to_policy() {
        assert_eq!(ScrapeMode::Forced.policy(), DiffPolicy::ReportAll);
        assert_eq!(ScrapeMode::Scheduled.policy(), DiffPolicy::NewestOnly);
    }

    #[test]
    fn test_message_texts() {
        let alice = AccountId::parse("alice").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let post = Post::from_shortcode("Cx1", now);

        let event = post_event(&alice, &post, now);
        assert_eq!(
            event.text,
            "New post from `alice` at 2024-03-01 12:30:00 UTC: https://www.instagram.com/p/Cx1/"
        );
        assert_eq!(
            story_event(&alice).text,
            "Story URL for `alice`: https://instagram.com/stories/alice/"
        );
    }

    #[test]
    fn test_scrape_error_kind() {
        let err = ScrapeError::new(
            &AccountId::parse("alice").unwrap(),
            ScrapeStage::Resolving,
            FetchError::TransientNetwork("reset".into()),
        );
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "scrape of alice failed while resolving: network error: reset"
        );
    }
}
