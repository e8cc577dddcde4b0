// Instagram web client: profile lookup, timeline pages, story probe.
//
// Uses the same unauthenticated endpoints the instagram.com web app calls:
// `web_profile_info` returns the profile plus the first timeline page, and
// the GraphQL timeline query pages further back. No login flow is attempted;
// an optional session cookie can be supplied for accounts that need one.
//
// Every request goes through the injected RatePolicy first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::fetcher::{story_url, FetchError, Post, Profile, ProfileFetcher};
use super::rate_limit::RatePolicy;
use crate::tracking::account::AccountId;

/// App id the instagram.com web client sends; the profile endpoint requires it.
pub const DEFAULT_APP_ID: &str = "936619743392459";

const PROFILE_URL: &str = "https://i.instagram.com/api/v1/users/web_profile_info/";
const GRAPHQL_URL: &str = "https://www.instagram.com/graphql/query/";

/// Persisted query for a user's timeline media.
const TIMELINE_QUERY_HASH: &str = "69cba40317214236af40e7efa697781d";

/// Posts requested per GraphQL page.
const PAGE_SIZE: usize = 12;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Connection settings for the Instagram client.
#[derive(Debug, Clone)]
pub struct InstagramSettings {
    pub app_id: String,
    /// Value of the `sessionid` cookie, if the operator supplied one.
    pub session_id: Option<String>,
    /// Base delay handed to the rate policy before each request.
    pub base_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for InstagramSettings {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            session_id: None,
            base_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct InstagramClient {
    client: reqwest::Client,
    settings: InstagramSettings,
    rate_policy: Arc<dyn RatePolicy>,
}

impl InstagramClient {
    pub fn new(settings: InstagramSettings, rate_policy: Arc<dyn RatePolicy>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-ig-app-id",
            HeaderValue::from_str(&settings.app_id).context("Invalid INSTAGRAM_APP_ID")?,
        );
        if let Some(ref session) = settings.session_id {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&format!("sessionid={session}"))
                    .context("Invalid INSTAGRAM_SESSION_ID")?,
            );
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            settings,
            rate_policy,
        })
    }

    /// Pace, send a GET and classify the status. Returns the successful response.
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, FetchError> {
        self.rate_policy.wait(self.settings.base_delay).await;

        debug!(url = url, "Instagram GET request");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if let Some(err) = classify_status(status) {
            if matches!(err, FetchError::RateLimited { .. }) {
                self.rate_policy.record_throttle();
            }
            warn!(url = url, status = status.as_u16(), "Instagram request failed");
            return Err(err);
        }

        self.rate_policy.record_success();
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        self.get(url, query)
            .await?
            .json::<T>()
            .await
            .map_err(|e| FetchError::Unknown(format!("malformed response from {url}: {e}")))
    }

    /// Fetch one timeline page after `cursor`.
    async fn fetch_page(&self, user_id: &str, cursor: &str) -> Result<TimelinePage, FetchError> {
        let variables = serde_json::json!({
            "id": user_id,
            "first": PAGE_SIZE,
            "after": cursor,
        })
        .to_string();

        let resp: GraphqlResponse = self
            .get_json(
                GRAPHQL_URL,
                &[("query_hash", TIMELINE_QUERY_HASH), ("variables", &variables)],
            )
            .await?;

        let media = resp
            .data
            .and_then(|d| d.user)
            .map(|u| u.edge_owner_to_timeline_media)
            .ok_or_else(|| FetchError::Unknown("timeline response missing user".into()))?;

        Ok(TimelinePage::from(media))
    }
}

/// Map a non-success HTTP status to the fetch taxonomy.
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND => FetchError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            status: status.as_u16(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::PrivateOrRestricted,
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            FetchError::TransientNetwork(format!("HTTP {}", s.as_u16()))
        }
        s => FetchError::Unknown(format!("HTTP {}", s.as_u16())),
    })
}

fn classify_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        FetchError::TransientNetwork(err.to_string())
    } else {
        FetchError::Unknown(err.to_string())
    }
}

#[async_trait]
impl ProfileFetcher for InstagramClient {
    async fn resolve(&self, account: &AccountId) -> Result<Profile, FetchError> {
        let resp: ProfileResponse = self
            .get_json(PROFILE_URL, &[("username", account.as_str())])
            .await?;

        let user = resp.data.and_then(|d| d.user).ok_or(FetchError::NotFound)?;
        if user.is_private {
            return Err(FetchError::PrivateOrRestricted);
        }

        let page = user
            .edge_owner_to_timeline_media
            .map(TimelinePage::from)
            .unwrap_or_default();

        debug!(
            account = %account,
            first_page = page.posts.len(),
            has_more = page.next_cursor.is_some(),
            "Resolved profile"
        );

        Ok(Profile {
            user_id: user.id,
            is_private: false,
            first_page: page.posts,
            next_cursor: page.next_cursor,
        })
    }

    fn recent_posts<'a>(
        &'a self,
        profile: &'a Profile,
        limit: usize,
    ) -> BoxStream<'a, Result<Post, FetchError>> {
        let state = PageCursor {
            buffered: profile.first_page.iter().cloned().collect(),
            cursor: profile.next_cursor.clone(),
            yielded: 0,
            done: false,
        };

        stream::unfold(state, move |mut st| async move {
            if st.done || st.yielded >= limit {
                return None;
            }
            loop {
                if let Some(post) = st.buffered.pop_front() {
                    st.yielded += 1;
                    return Some((Ok(post), st));
                }
                let cursor = st.cursor.take()?;
                match self.fetch_page(&profile.user_id, &cursor).await {
                    Ok(page) if page.posts.is_empty() => return None,
                    Ok(page) => {
                        st.buffered.extend(page.posts);
                        st.cursor = page.next_cursor;
                    }
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
            }
        })
        .boxed()
    }

    async fn story_present(&self, account: &AccountId) -> Result<bool, FetchError> {
        match self.get(&story_url(account), &[]).await {
            Ok(_) => Ok(true),
            Err(FetchError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Pagination state for the lazy post stream.
struct PageCursor {
    buffered: VecDeque<Post>,
    cursor: Option<String>,
    yielded: usize,
    done: bool,
}

#[derive(Debug, Default)]
struct TimelinePage {
    posts: Vec<Post>,
    next_cursor: Option<String>,
}

impl From<TimelineMedia> for TimelinePage {
    fn from(media: TimelineMedia) -> Self {
        let posts = media
            .edges
            .into_iter()
            .filter_map(|edge| {
                let posted_at = DateTime::<Utc>::from_timestamp(edge.node.taken_at_timestamp, 0)?;
                Some(Post::from_shortcode(&edge.node.shortcode, posted_at))
            })
            .collect();
        let next_cursor = media
            .page_info
            .filter(|p| p.has_next_page)
            .and_then(|p| p.end_cursor);
        Self { posts, next_cursor }
    }
}

// -- Serde types for web_profile_info and the timeline query --

#[derive(Deserialize)]
pub(crate) struct ProfileResponse {
    data: Option<ProfileData>,
}

#[derive(Deserialize)]
struct ProfileData {
    user: Option<ProfileUser>,
}

#[derive(Deserialize)]
struct ProfileUser {
    id: String,
    #[serde(default)]
    is_private: bool,
    edge_owner_to_timeline_media: Option<TimelineMedia>,
}

#[derive(Deserialize)]
struct GraphqlResponse {
    data: Option<GraphqlData>,
}

#[derive(Deserialize)]
struct GraphqlData {
    user: Option<GraphqlUser>,
}

#[derive(Deserialize)]
struct GraphqlUser {
    edge_owner_to_timeline_media: TimelineMedia,
}

#[derive(Deserialize)]
struct TimelineMedia {
    #[serde(default)]
    edges: Vec<MediaEdge>,
    page_info: Option<PageInfo>,
}

#[derive(Deserialize)]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize)]
struct MediaEdge {
    node: MediaNode,
}

#[derive(Deserialize)]
struct MediaNode {
    shortcode: String,
    taken_at_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            Some(FetchError::NotFound)
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(FetchError::RateLimited { status: 429 })
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            Some(FetchError::PrivateOrRestricted)
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Some(FetchError::TransientNetwork(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::IM_A_TEAPOT),
            Some(FetchError::Unknown(_))
        ));
    }

    #[test]
    fn test_profile_response_parses_first_page() {
        let json = r#"{
            "data": {"user": {
                "id": "123",
                "is_private": false,
                "edge_owner_to_timeline_media": {
                    "count": 40,
                    "page_info": {"has_next_page": true, "end_cursor": "QVFE"},
                    "edges": [
                        {"node": {"shortcode": "C3", "taken_at_timestamp": 300}},
                        {"node": {"shortcode": "C2", "taken_at_timestamp": 200}}
                    ]
                }
            }},
            "status": "ok"
        }"#;
        let resp: ProfileResponse = serde_json::from_str(json).unwrap();
        let user = resp.data.unwrap().user.unwrap();
        assert_eq!(user.id, "123");
        let page = TimelinePage::from(user.edge_owner_to_timeline_media.unwrap());
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.posts[0].url, "https://www.instagram.com/p/C3/");
        assert_eq!(page.posts[0].posted_at.timestamp(), 300);
        assert_eq!(page.next_cursor.as_deref(), Some("QVFE"));
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let json = r#"{
            "edges": [],
            "page_info": {"has_next_page": false, "end_cursor": "ignored"}
        }"#;
        let media: TimelineMedia = serde_json::from_str(json).unwrap();
        let page = TimelinePage::from(media);
        assert!(page.posts.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_missing_user_is_none() {
        let resp: ProfileResponse = serde_json::from_str(r#"{"data": {"user": null}}"#).unwrap();
        assert!(resp.data.unwrap().user.is_none());
    }
}
