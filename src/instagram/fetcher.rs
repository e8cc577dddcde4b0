// Profile fetcher boundary: what the scrape engine needs from Instagram.
//
// The engine only sees this trait, so tests drive it with in-memory fakes and
// the HTTP client lives in `client.rs`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::tracking::account::AccountId;

/// How many recent posts are examined per scrape.
pub const RECENT_POST_LIMIT: usize = 50;

/// A post, reduced to what dedup and notifications need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub url: String,
    pub posted_at: DateTime<Utc>,
}

impl Post {
    pub fn new(url: impl Into<String>, posted_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            posted_at,
        }
    }

    /// Build the canonical permalink from a post shortcode.
    pub fn from_shortcode(shortcode: &str, posted_at: DateTime<Utc>) -> Self {
        Self::new(format!("https://www.instagram.com/p/{shortcode}/"), posted_at)
    }
}

/// A resolved, publicly visible profile.
///
/// Carries the first page of the timeline when the profile endpoint returned
/// one, so listing posts right after resolving doesn't cost another request.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub user_id: String,
    pub is_private: bool,
    pub first_page: Vec<Post>,
    pub next_cursor: Option<String>,
}

/// Result of checking whether an account currently has a story up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoryProbeResult {
    pub present: bool,
    pub observed_at: DateTime<Utc>,
}

/// Failure taxonomy shared by every fetch and by the scheduler's retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotFound,
    PrivateOrRestricted,
    RateLimited,
    TransientNetwork,
    Unknown,
}

impl FailureKind {
    /// Only throttling and network hiccups are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::TransientNetwork)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::NotFound => "NotFound",
            FailureKind::PrivateOrRestricted => "PrivateOrRestricted",
            FailureKind::RateLimited => "RateLimited",
            FailureKind::TransientNetwork => "TransientNetwork",
            FailureKind::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("profile does not exist")]
    NotFound,

    #[error("profile is private or restricted")]
    PrivateOrRestricted,

    #[error("rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("unexpected response: {0}")]
    Unknown(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::NotFound => FailureKind::NotFound,
            FetchError::PrivateOrRestricted => FailureKind::PrivateOrRestricted,
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::TransientNetwork(_) => FailureKind::TransientNetwork,
            FetchError::Unknown(_) => FailureKind::Unknown,
        }
    }
}

/// Source of profile data for tracked accounts.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    /// Look up an account. Private profiles resolve to `PrivateOrRestricted`.
    async fn resolve(&self, account: &AccountId) -> Result<Profile, FetchError>;

    /// Lazily list up to `limit` recent posts, newest first.
    ///
    /// The stream is single-use; pages are fetched as it is polled. An error
    /// item ends the stream.
    fn recent_posts<'a>(
        &'a self,
        profile: &'a Profile,
        limit: usize,
    ) -> BoxStream<'a, Result<Post, FetchError>>;

    /// Whether the account's story URL currently answers with a success status.
    async fn story_present(&self, account: &AccountId) -> Result<bool, FetchError>;
}

/// The well-known story URL for an account.
pub fn story_url(account: &AccountId) -> String {
    format!("https://instagram.com/stories/{account}/")
}
