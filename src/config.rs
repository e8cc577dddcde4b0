use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::db::models::RegistryRecord;
use crate::instagram::client::{InstagramSettings, DEFAULT_APP_ID};
use crate::notify::discord::{DiscordSettings, DEFAULT_API_BASE};

/// Which persistence backend to use.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// `config.json` + `last_post_times.json` (default)
    Json,
    /// Single SQLite database file, needs the `sqlite` feature
    Sqlite,
}

/// Central configuration loaded from environment variables.
///
/// Secrets come from env vars or the stored registry record, never from
/// source. The .env file is loaded automatically at startup via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub state_dir: PathBuf,
    /// JSON registry record (tracked accounts, channel name, token)
    pub registry_path: PathBuf,
    /// JSON dedup state (per-account last post / story times)
    pub state_path: PathBuf,
    /// SQLite database, used when `backend` is Sqlite
    pub db_path: PathBuf,
    /// Time between the starts of two sweeps
    pub scrape_interval: Duration,
    /// Base pause before every Instagram request; the rate governor scales it
    pub fetch_base_delay: Duration,
    pub discord_token: Option<String>,
    pub discord_guild_id: Option<String>,
    pub discord_channel_name: Option<String>,
    pub discord_api_base: String,
    pub instagram_app_id: String,
    /// Optional `sessionid` cookie for the web endpoints. There is no login flow.
    pub instagram_session_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default except the Discord settings, which are only
    /// required by the daemon (see `require_discord`).
    pub fn load() -> Result<Self> {
        let backend = match env::var("INSTAWATCH_BACKEND").as_deref() {
            Ok("sqlite") => Backend::Sqlite,
            Ok("json") | Err(_) => Backend::Json,
            Ok(other) => anyhow::bail!(
                "Unknown INSTAWATCH_BACKEND '{other}'. Use 'json' or 'sqlite'."
            ),
        };

        let state_dir = env::var("INSTAWATCH_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let path_or = |var: &str, file: &str| {
            env::var(var)
                .map(PathBuf::from)
                .unwrap_or_else(|_| state_dir.join(file))
        };

        Ok(Self {
            backend,
            registry_path: path_or("INSTAWATCH_REGISTRY_PATH", "config.json"),
            state_path: path_or("INSTAWATCH_STATE_PATH", "last_post_times.json"),
            db_path: path_or("INSTAWATCH_DB_PATH", "instawatch.db"),
            state_dir,
            scrape_interval: Duration::from_secs(
                env_number("SCRAPE_INTERVAL_MINUTES", 5)?.max(1) * 60,
            ),
            fetch_base_delay: Duration::from_secs(env_number("FETCH_BASE_DELAY_SECS", 2)?),
            discord_token: env_nonempty("DISCORD_TOKEN"),
            discord_guild_id: env_nonempty("DISCORD_GUILD_ID"),
            discord_channel_name: env_nonempty("DISCORD_CHANNEL_NAME"),
            discord_api_base: env::var("DISCORD_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            instagram_app_id: env::var("INSTAGRAM_APP_ID")
                .unwrap_or_else(|_| DEFAULT_APP_ID.to_string()),
            instagram_session_id: env_nonempty("INSTAGRAM_SESSION_ID"),
        })
    }

    /// Fill Discord settings the environment left unset from the stored
    /// registry record (the legacy `config.json` carries TOKEN and
    /// DISCORD_CHANNEL_NAME). Environment values win.
    pub fn merge_record(&mut self, record: &RegistryRecord) {
        if self.discord_token.is_none() {
            self.discord_token = record.token.clone().filter(|t| !t.is_empty());
        }
        if self.discord_channel_name.is_none() {
            self.discord_channel_name = record.channel_name.clone().filter(|c| !c.is_empty());
        }
    }

    /// Check that everything the Discord sink needs is configured.
    /// Call this before starting the daemon without `--dry-run`.
    pub fn require_discord(&self) -> Result<DiscordSettings> {
        let missing = |name: &str| {
            anyhow::anyhow!(
                "{name} not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            )
        };
        Ok(DiscordSettings {
            token: self.discord_token.clone().ok_or_else(|| missing("DISCORD_TOKEN"))?,
            guild_id: self
                .discord_guild_id
                .clone()
                .ok_or_else(|| missing("DISCORD_GUILD_ID"))?,
            channel_name: self
                .discord_channel_name
                .clone()
                .ok_or_else(|| missing("DISCORD_CHANNEL_NAME"))?,
            api_base: self.discord_api_base.clone(),
        })
    }

    pub fn instagram_settings(&self) -> InstagramSettings {
        InstagramSettings {
            app_id: self.instagram_app_id.clone(),
            session_id: self.instagram_session_id.clone(),
            base_delay: self.fetch_base_delay,
            ..InstagramSettings::default()
        }
    }

    /// Where state lives, for display.
    pub fn location(&self) -> String {
        match self.backend {
            Backend::Json => format!(
                "{} + {}",
                self.registry_path.display(),
                self.state_path.display()
            ),
            Backend::Sqlite => self.db_path.display().to_string(),
        }
    }
}

fn env_nonempty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_number(var: &str, default: u64) -> Result<u64> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{var} must be a whole number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
