// Persisted data models: the registry record and per-account dedup entries.
//
// These are separate from the backends so the tracking layer can use them
// without depending on serde_json or rusqlite directly.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::tracking::account::AccountId;

/// Per-account bookkeeping that prevents duplicate notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    /// Timestamp of the newest post already reported (or silently seeded).
    #[serde(default)]
    pub last_post_time: Option<DateTime<Utc>>,
    /// When a story was last reported for this account.
    #[serde(default)]
    pub last_story_time: Option<DateTime<Utc>>,
}

/// Full dedup state, ordered by account so file rewrites are stable.
pub type DedupSnapshot = BTreeMap<AccountId, DedupEntry>;

/// The long-lived tracking configuration: which accounts to watch, plus the
/// Discord channel and bot token when they're kept alongside the list.
///
/// Also reads the older upper-case key layout of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    #[serde(
        default,
        alias = "INSTAGRAM_USERNAMES",
        deserialize_with = "valid_accounts"
    )]
    pub accounts: Vec<AccountId>,
    #[serde(
        default,
        alias = "DISCORD_CHANNEL_NAME",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_name: Option<String>,
    #[serde(default, alias = "TOKEN", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Read a stored account list, skipping names that no longer validate.
fn valid_accounts<'de, D>(deserializer: D) -> Result<Vec<AccountId>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    Ok(names
        .into_iter()
        .filter_map(|name| match AccountId::parse(&name) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(account = %name, error = %e, "Skipping invalid tracked account");
                None
            }
        })
        .collect())
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 as well as the naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` form
/// older state files were written with (those are UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
