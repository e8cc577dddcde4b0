// Rate governing for Instagram requests: jittered pacing with backoff.
//
// Instagram throttles anonymous web traffic aggressively and doesn't publish
// its limits. Every request waits a base delay plus 1-5s of random jitter
// (so a sweep doesn't hit the service in lockstep), and the base delay
// doubles each time the service answers with a throttle response, decaying
// again as requests succeed.
//
// The policy is injected into the HTTP client as `Arc<dyn RatePolicy>`, so
// the backoff strategy can be swapped without touching fetch code. State is
// a pair of atomics: nothing is locked while a caller sleeps.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::info;

/// Maximum number of doublings applied to the base delay.
const MAX_PENALTY: u32 = 5;

/// Cap on the backed-off part of the delay (jitter is added on top).
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Default jitter added to every wait.
pub const DEFAULT_JITTER: RangeInclusive<Duration> =
    Duration::from_secs(1)..=Duration::from_secs(5);

/// Strategy consulted before every request to the scraped service.
#[async_trait]
pub trait RatePolicy: Send + Sync {
    /// Suspend the caller long enough to stay under the service's limits.
    async fn wait(&self, base: Duration);

    /// The service signalled throttling (HTTP 429 or similar).
    fn record_throttle(&self);

    /// A request went through normally.
    fn record_success(&self);
}

/// Pick a uniformly random duration in `range` (millisecond resolution).
pub fn random_delay(range: &RangeInclusive<Duration>) -> Duration {
    let lo = range.start().as_millis() as u64;
    let hi = range.end().as_millis() as u64;
    if hi <= lo {
        return *range.start();
    }
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

/// Jittered, adaptively backed-off request pacing.
pub struct RateGovernor {
    jitter: RangeInclusive<Duration>,
    /// How many times the base delay is currently doubled.
    penalty: AtomicU32,
    /// Total waits performed (for status and tests).
    waits: AtomicU32,
}

impl RateGovernor {
    pub fn new(jitter: RangeInclusive<Duration>) -> Self {
        Self {
            jitter,
            penalty: AtomicU32::new(0),
            waits: AtomicU32::new(0),
        }
    }

    /// The backed-off portion of the delay for `base` at the current penalty.
    pub fn backoff_for(&self, base: Duration) -> Duration {
        let penalty = self.penalty.load(Ordering::Relaxed);
        if penalty == 0 {
            return base;
        }
        base.saturating_mul(1u32 << penalty).min(MAX_BACKOFF.max(base))
    }

    pub fn penalty(&self) -> u32 {
        self.penalty.load(Ordering::Relaxed)
    }

    pub fn waits(&self) -> u32 {
        self.waits.load(Ordering::Relaxed)
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER)
    }
}

#[async_trait]
impl RatePolicy for RateGovernor {
    async fn wait(&self, base: Duration) {
        let delay = self.backoff_for(base) + random_delay(&self.jitter);
        self.waits.fetch_add(1, Ordering::Relaxed);

        info!(
            delay_ms = delay.as_millis() as u64,
            penalty = self.penalty(),
            "Rate governor: sleeping {:.1}s before request",
            delay.as_secs_f64()
        );

        tokio::time::sleep(delay).await;
    }

    fn record_throttle(&self) {
        let _ = self
            .penalty
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
                Some((p + 1).min(MAX_PENALTY))
            });
    }

    fn record_success(&self) {
        let _ = self
            .penalty
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
                Some(p.saturating_sub(1))
            });
    }
}
