// Account management commands: add, remove, list.
//
// Commands arrive either as CLI subcommands or as `!add <name>` style lines
// typed into a running daemon. Both paths go through `Tracker`, which owns
// the registry and answers with a `Reply` meant for the person who asked.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::instagram::fetcher::{FailureKind, Profile};
use crate::pipeline::scrape::{ScrapeEngine, ScrapeError, ScrapeMode, ScrapeOutcome};
use crate::tracking::account::AccountId;
use crate::tracking::registry::Registry;

/// Prefix that marks a line as a command.
pub const COMMAND_PREFIX: char = '!';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Remove(String),
    List,
}

/// Why a line couldn't be turned into a `Command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not prefixed with `!`; not meant for us.
    NotACommand,
    Unknown(String),
    MissingArgument(&'static str),
}

/// Parse one input line such as `!add natgeo`.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let body = line
        .trim()
        .strip_prefix(COMMAND_PREFIX)
        .ok_or(ParseError::NotACommand)?;

    let mut parts = body.split_whitespace();
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::to_string);

    match (name.as_str(), arg) {
        ("add", Some(account)) => Ok(Command::Add(account)),
        ("add", None) => Err(ParseError::MissingArgument("!add <username>")),
        ("remove", Some(account)) => Ok(Command::Remove(account)),
        ("remove", None) => Err(ParseError::MissingArgument("!remove <username>")),
        ("list", _) => Ok(Command::List),
        _ => Err(ParseError::Unknown(name)),
    }
}

/// What the user gets told after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Added(AccountId),
    AlreadyTracked(AccountId),
    NotFound(AccountId),
    Private(AccountId),
    TemporaryError(AccountId),
    InvalidName(String),
    Removed(AccountId),
    NotTracked(AccountId),
    Tracking(Vec<AccountId>),
    InvalidCommand,
    Usage(&'static str),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Added(a) => write!(f, "Added `{a}` to the list!"),
            Reply::AlreadyTracked(a) => write!(f, "`{a}` is already in the list!"),
            Reply::NotFound(a) => write!(f, "Profile `{a}` does not exist!"),
            Reply::Private(a) => write!(f, "Profile `{a}` is private!"),
            Reply::TemporaryError(a) => {
                write!(f, "Temporary error while checking `{a}`, try again later.")
            }
            Reply::InvalidName(raw) => write!(f, "`{raw}` is not a valid username!"),
            Reply::Removed(a) => {
                write!(f, "Removed `{a}` from the list and deleted their thread!")
            }
            Reply::NotTracked(a) => write!(f, "`{a}` is not in the list!"),
            Reply::Tracking(accounts) if accounts.is_empty() => {
                write!(f, "Not tracking any accounts yet.")
            }
            Reply::Tracking(accounts) => {
                let names: Vec<&str> = accounts.iter().map(AccountId::as_str).collect();
                write!(f, "Currently tracking: {}", names.join(", "))
            }
            Reply::InvalidCommand => write!(f, "Invalid command used."),
            Reply::Usage(usage) => write!(f, "Usage: {usage}"),
        }
    }
}

/// A newly added account waiting for its first scrape.
#[derive(Debug, Clone)]
pub struct PendingScrape {
    pub account: AccountId,
    profile: Profile,
}

pub struct Tracker {
    registry: Arc<Registry>,
    engine: Arc<ScrapeEngine>,
}

impl Tracker {
    pub fn new(registry: Arc<Registry>, engine: Arc<ScrapeEngine>) -> Self {
        Self { registry, engine }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Validate and register an account.
    ///
    /// On success the reply should go out first, then the returned
    /// `PendingScrape` is handed to `initial_scrape`.
    pub async fn add(&self, raw: &str) -> (Reply, Option<PendingScrape>) {
        let account = match AccountId::parse(raw) {
            Ok(account) => account,
            Err(_) => return (Reply::InvalidName(raw.trim().to_string()), None),
        };
        info!(account = %account, "Add requested");

        if self.registry.contains(&account).await {
            return (Reply::AlreadyTracked(account), None);
        }

        let profile = match self.engine.validate(&account).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(account = %account, kind = %e.kind(), error = %e, "Add rejected");
                let reply = match e.kind() {
                    FailureKind::NotFound => Reply::NotFound(account),
                    FailureKind::PrivateOrRestricted => Reply::Private(account),
                    _ => Reply::TemporaryError(account),
                };
                return (reply, None);
            }
        };

        // A concurrent add may have won while we were resolving.
        if !self.registry.add(&account).await {
            return (Reply::AlreadyTracked(account), None);
        }

        info!(account = %account, "Now tracking");
        let pending = PendingScrape {
            account: account.clone(),
            profile,
        };
        (Reply::Added(account), Some(pending))
    }

    /// Forced scrape of a just-added account: every recent post is reported.
    /// Single attempt; the next sweep picks up anything this misses.
    pub async fn initial_scrape(&self, pending: PendingScrape) -> Result<ScrapeOutcome, ScrapeError> {
        let dedup = self.engine.dedup();
        let ticket = dedup.ticket(&pending.account);
        // Removed before the first scrape got going.
        if !self.registry.contains(&pending.account).await {
            dedup.release(ticket);
            return Ok(ScrapeOutcome::abandoned(pending.account));
        }
        let result = self
            .engine
            .scrape_resolved(&ticket, &pending.profile, ScrapeMode::Forced)
            .await;
        if let Err(ref e) = result {
            warn!(account = %pending.account, kind = %e.kind(), error = %e, "Initial scrape failed");
        }
        result
    }

    /// Stop tracking an account, forget its state and delete its destination.
    pub async fn remove(&self, raw: &str) -> Reply {
        let account = match AccountId::parse(raw) {
            Ok(account) => account,
            Err(_) => return Reply::InvalidName(raw.trim().to_string()),
        };

        if !self.registry.remove(&account).await {
            return Reply::NotTracked(account);
        }

        self.engine.dedup().remove(&account).await;

        match self.engine.sink().remove_destination(&account).await {
            Ok(true) => info!(account = %account, "Removed notification destination"),
            Ok(false) => {}
            Err(e) => warn!(account = %account, error = %e, "Failed to remove notification destination"),
        }

        info!(account = %account, "Stopped tracking");
        Reply::Removed(account)
    }

    pub async fn list(&self) -> Reply {
        Reply::Tracking(self.registry.accounts().await)
    }

    /// Run a parsed command. Returns the reply plus a follow-up scrape for adds.
    pub async fn execute(&self, command: Command) -> (Reply, Option<PendingScrape>) {
        match command {
            Command::Add(raw) => self.add(&raw).await,
            Command::Remove(raw) => (self.remove(&raw).await, None),
            Command::List => (self.list().await, None),
        }
    }

    /// Parse and run one input line. `None` when the line isn't a command.
    pub async fn handle_line(&self, line: &str) -> Option<(Reply, Option<PendingScrape>)> {
        match parse_command(line) {
            Ok(command) => Some(self.execute(command).await),
            Err(ParseError::NotACommand) => None,
            Err(ParseError::Unknown(_)) => Some((Reply::InvalidCommand, None)),
            Err(ParseError::MissingArgument(usage)) => Some((Reply::Usage(usage), None)),
        }
    }
}

/// First scrapes of just-added accounts, run alongside sweeps.
///
/// The daemon drains them before its final flush; once drained no new ones
/// start.
#[derive(Default)]
pub struct FirstScrapes {
    inner: Mutex<FirstScrapeTasks>,
}

#[derive(Default)]
struct FirstScrapeTasks {
    tasks: JoinSet<()>,
    closed: bool,
}

impl FirstScrapes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `initial_scrape` in the background. `false` after `drain`.
    pub async fn start(&self, tracker: Arc<Tracker>, pending: PendingScrape) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            warn!(account = %pending.account, "Shutting down, skipping first scrape");
            return false;
        }
        while inner.tasks.try_join_next().is_some() {}
        inner.tasks.spawn(async move {
            let _ = tracker.initial_scrape(pending).await;
        });
        true
    }

    /// Stop accepting new scrapes and wait for running ones.
    /// Returns how many were still running.
    pub async fn drain(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        let running = inner.tasks.len();
        if running > 0 {
            info!(running, "Waiting for first scrapes to finish");
        }
        while let Some(joined) = inner.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "First scrape task failed");
            }
        }
        debug!("First scrapes drained");
        running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> AccountId {
        AccountId::parse(name).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("!add natgeo"), Ok(Command::Add("natgeo".into())));
        assert_eq!(parse_command("  !REMOVE @Alice "), Ok(Command::Remove("@Alice".into())));
        assert_eq!(parse_command("!list"), Ok(Command::List));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_command("hello"), Err(ParseError::NotACommand));
        assert_eq!(
            parse_command("!add"),
            Err(ParseError::MissingArgument("!add <username>"))
        );
        assert_eq!(
            parse_command("!follow bob"),
            Err(ParseError::Unknown("follow".into()))
        );
    }

    #[test]
    fn test_reply_texts() {
        assert_eq!(Reply::Added(id("alice")).to_string(), "Added `alice` to the list!");
        assert_eq!(
            Reply::Tracking(vec![id("alice"), id("bob")]).to_string(),
            "Currently tracking: alice, bob"
        );
        assert_eq!(Reply::NotTracked(id("bob")).to_string(), "`bob` is not in the list!");
        assert_eq!(
            Reply::InvalidName("no spaces".into()).to_string(),
            "`no spaces` is not a valid username!"
        );
    }
}
