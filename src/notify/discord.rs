// Discord sink: one thread per tracked account under a named text channel.
//
// Talks to the Discord REST API (v10) with a bot token. The parent channel is
// looked up by name within the configured guild the first time it's needed.
// Threads are found among the guild's active threads by name, or created
// (with an announcement in the parent channel). Thread ids are cached.
//
// Failed deliveries are reported to the caller, which logs them; nothing
// here retries.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::traits::{DestinationHandle, NotificationSink};
use crate::output::truncate_chars;
use crate::tracking::account::AccountId;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord rejects message content longer than this.
const MAX_MESSAGE_CHARS: usize = 2000;

/// Channel type ids from the Discord API.
const GUILD_TEXT: u8 = 0;
const PUBLIC_THREAD: u8 = 11;

/// Threads auto-archive after a week of inactivity.
const AUTO_ARCHIVE_MINUTES: u32 = 10080;

#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub token: String,
    pub guild_id: String,
    pub channel_name: String,
    pub api_base: String,
}

pub struct DiscordSink {
    client: reqwest::Client,
    settings: DiscordSettings,
    channel_id: OnceCell<String>,
    /// Thread id per account. The mutex also serializes thread creation so
    /// two concurrent scrapes of one account can't create duplicate threads.
    threads: Mutex<HashMap<AccountId, String>>,
}

impl DiscordSink {
    pub fn new(settings: DiscordSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("instawatch (https://github.com/instawatch, 0.1)")
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            settings,
            channel_id: OnceCell::new(),
            threads: Mutex::new(HashMap::new()),
        })
    }

    async fn request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = format!("{}{}", self.settings.api_base.trim_end_matches('/'), path);
        debug!(method = %method, path = path, "Discord API request");

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", format!("Bot {}", self.settings.token));
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Discord request failed: {method} {path}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Discord {method} {path} returned {status}: {body}");
        }

        // DELETE answers 200 with the deleted channel, or 204 with no body
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return serde_json::from_str("null")
                .with_context(|| format!("Discord {method} {path} returned no content"));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize Discord {path} response"))
    }

    async fn post_message(&self, channel_id: &str, text: &str) -> Result<()> {
        let body = CreateMessage {
            content: truncate_chars(text, MAX_MESSAGE_CHARS - 3),
        };
        let _: serde_json::Value = self
            .request(
                Method::POST,
                &format!("/channels/{channel_id}/messages"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    /// Id of the parent text channel, resolved by name once.
    async fn channel_id(&self) -> Result<&str> {
        let id = self
            .channel_id
            .get_or_try_init(|| async {
                let channels: Vec<Channel> = self
                    .request::<_, ()>(
                        Method::GET,
                        &format!("/guilds/{}/channels", self.settings.guild_id),
                        None,
                    )
                    .await?;
                find_channel(&channels, &self.settings.channel_name)
                    .map(|c| c.id.clone())
                    .with_context(|| {
                        format!(
                            "Couldn't find a text channel named {}",
                            self.settings.channel_name
                        )
                    })
            })
            .await?;
        Ok(id.as_str())
    }

    /// Look for an active thread named `name` under the parent channel.
    async fn find_thread(&self, parent_id: &str, name: &str) -> Result<Option<String>> {
        let active: ActiveThreads = self
            .request::<_, ()>(
                Method::GET,
                &format!("/guilds/{}/threads/active", self.settings.guild_id),
                None,
            )
            .await?;
        Ok(find_thread_in(&active.threads, parent_id, name).map(|t| t.id.clone()))
    }
}

fn find_thread_in<'a>(threads: &'a [Channel], parent_id: &str, name: &str) -> Option<&'a Channel> {
    threads
        .iter()
        .find(|t| t.name.as_deref() == Some(name) && t.parent_id.as_deref() == Some(parent_id))
}

fn find_channel<'a>(channels: &'a [Channel], name: &str) -> Option<&'a Channel> {
    channels
        .iter()
        .find(|c| c.kind == GUILD_TEXT && c.name.as_deref() == Some(name))
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn ensure_destination(&self, key: &AccountId) -> Result<DestinationHandle> {
        let mut threads = self.threads.lock().await;
        if let Some(id) = threads.get(key) {
            return Ok(DestinationHandle {
                key: key.clone(),
                id: id.clone(),
            });
        }

        let parent = self.channel_id().await?.to_string();

        let thread_id = match self.find_thread(&parent, key.as_str()).await? {
            Some(id) => id,
            None => {
                let body = CreateThread {
                    name: key.to_string(),
                    kind: PUBLIC_THREAD,
                    auto_archive_duration: AUTO_ARCHIVE_MINUTES,
                };
                let created: Channel = self
                    .request(
                        Method::POST,
                        &format!("/channels/{parent}/threads"),
                        Some(&body),
                    )
                    .await
                    .with_context(|| format!("Failed to create thread for {key}"))?;
                info!(account = %key, thread_id = %created.id, "Created Discord thread");
                self.post_message(
                    &parent,
                    &format!("Created a new thread for `{key}` to keep track of their posts!"),
                )
                .await?;
                created.id
            }
        };

        threads.insert(key.clone(), thread_id.clone());
        Ok(DestinationHandle {
            key: key.clone(),
            id: thread_id,
        })
    }

    async fn send(&self, destination: &DestinationHandle, text: &str) -> Result<()> {
        self.post_message(&destination.id, text).await
    }

    async fn remove_destination(&self, key: &AccountId) -> Result<bool> {
        let mut threads = self.threads.lock().await;
        let thread_id = match threads.remove(key) {
            Some(id) => Some(id),
            None => {
                let parent = self.channel_id().await?.to_string();
                self.find_thread(&parent, key.as_str()).await?
            }
        };

        let Some(thread_id) = thread_id else {
            return Ok(false);
        };

        let _: Option<serde_json::Value> = self
            .request::<_, ()>(Method::DELETE, &format!("/channels/{thread_id}"), None)
            .await?;
        info!(account = %key, thread_id = %thread_id, "Deleted Discord thread");
        Ok(true)
    }
}

// -- Serde types for the Discord REST API --

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    name: Option<String>,
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActiveThreads {
    threads: Vec<Channel>,
}

#[derive(Serialize)]
struct CreateMessage {
    content: String,
}

#[derive(Serialize)]
struct CreateThread {
    name: String,
    #[serde(rename = "type")]
    kind: u8,
    auto_archive_duration: u32,
}
