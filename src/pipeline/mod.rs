// Polling pipeline: per-account scrapes and the sweeps that schedule them.

pub mod diff;
pub mod scrape;
pub mod story;
pub mod sweep;

pub use scrape::{ScrapeEngine, ScrapeError, ScrapeMode, ScrapeOutcome};
pub use sweep::{Scheduler, SweepReport, SweepSettings};
