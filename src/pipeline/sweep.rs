// Scheduled sweeps over every tracked account.
//
// A sweep walks the registry in order and runs a scheduled-mode scrape for
// each account. Retryable failures get up to `max_attempts` tries with a
// random backoff in between. After each account (success or not) the sweep
// pauses for a random pacing delay so requests don't arrive in bursts.
//
// `run` fires a sweep on a fixed interval. Sweeps never overlap: a sweep that
// overruns its interval pushes the next tick back instead of queuing one.
//
// Shutdown is a watch channel. The sweep finishes the account it is on,
// skips the rest, and any pacing or backoff sleep ends early.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::scrape::{ScrapeEngine, ScrapeError, ScrapeMode, ScrapeOutcome};
use crate::instagram::rate_limit::random_delay;
use crate::tracking::dedup::StateTicket;
use crate::tracking::registry::Registry;

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub interval: Duration,
    /// Scrape attempts per account per sweep, first try included.
    pub max_attempts: u32,
    pub retry_backoff: RangeInclusive<Duration>,
    pub pacing: RangeInclusive<Duration>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(10)..=Duration::from_secs(30),
            pacing: Duration::from_secs(10)..=Duration::from_secs(30),
        }
    }
}

/// Totals for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Extra attempts beyond the first, across all accounts.
    pub retries: usize,
    pub notifications: usize,
}

pub struct Scheduler {
    engine: Arc<ScrapeEngine>,
    registry: Arc<Registry>,
    settings: SweepSettings,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<ScrapeEngine>,
        registry: Arc<Registry>,
        settings: SweepSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            registry,
            settings,
            shutdown,
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `delay`, or less if shutdown is signalled.
    /// Returns false when woken by shutdown.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown_signalled(self.shutdown.clone()) => false,
        }
    }

    /// Sweep on the configured interval until shutdown.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.settings.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_signalled(self.shutdown.clone()) => break,
            }
            if self.shutting_down() {
                break;
            }

            let report = self.sweep().await;
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                retries = report.retries,
                notifications = report.notifications,
                "Sweep complete"
            );
        }

        info!("Scheduler stopped");
    }

    /// Run one sweep over the registry as it stands now.
    pub async fn sweep(&self) -> SweepReport {
        let accounts = self.registry.accounts().await;
        let mut report = SweepReport::default();
        debug!(accounts = accounts.len(), "Starting sweep");

        for (i, account) in accounts.iter().enumerate() {
            if self.shutting_down() {
                info!(remaining = accounts.len() - i, "Shutdown requested, ending sweep early");
                break;
            }
            let ticket = self.engine.dedup().ticket(account);
            // Removed since the sweep began.
            if !self.registry.contains(account).await {
                self.engine.dedup().release(ticket);
                continue;
            }

            report.attempted += 1;
            let (result, attempts) = self.scrape_with_retry(&ticket).await;
            report.retries += attempts.saturating_sub(1) as usize;
            match result {
                Ok(outcome) => {
                    report.succeeded += 1;
                    report.notifications += outcome.notifications();
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        account = %account,
                        kind = %e.kind(),
                        attempts = attempts,
                        error = %e,
                        "Scrape failed, moving on"
                    );
                }
            }

            if i + 1 < accounts.len() && !self.pause(random_delay(&self.settings.pacing)).await {
                break;
            }
        }

        report
    }

    /// Scheduled-mode scrape with bounded retries.
    /// Returns the final result and how many attempts were made.
    async fn scrape_with_retry(
        &self,
        ticket: &StateTicket,
    ) -> (Result<ScrapeOutcome, ScrapeError>, u32) {
        let account = ticket.account();
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.engine.scrape_ticket(ticket, ScrapeMode::Scheduled).await {
                Ok(outcome) => return (Ok(outcome), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = random_delay(&self.settings.retry_backoff);
                    warn!(
                        account = %account,
                        kind = %e.kind(),
                        attempt = attempt,
                        backoff_secs = backoff.as_secs(),
                        "Scrape failed, retrying"
                    );
                    if !self.pause(backoff).await {
                        return (Err(e), attempt);
                    }
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender never signals.
async fn shutdown_signalled(mut shutdown: watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SweepSettings::default();
        assert_eq!(settings.interval, Duration::from_secs(300));
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(*settings.pacing.start(), Duration::from_secs(10));
        assert_eq!(*settings.retry_backoff.end(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signalled_wakes_on_flag() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(shutdown_signalled(rx));
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_never_signals() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let res = tokio::time::timeout(Duration::from_secs(60), shutdown_signalled(rx)).await;
        assert!(res.is_err());
    }
}
