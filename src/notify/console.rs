// Console sink: prints notifications instead of delivering them.
//
// Used by `instawatch run --dry-run` and one-off CLI scrapes when no Discord
// credentials are configured.

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;

use super::traits::{DestinationHandle, NotificationSink};
use crate::tracking::account::AccountId;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn ensure_destination(&self, key: &AccountId) -> Result<DestinationHandle> {
        Ok(DestinationHandle {
            key: key.clone(),
            id: key.to_string(),
        })
    }

    async fn send(&self, destination: &DestinationHandle, text: &str) -> Result<()> {
        println!("{} {}", format!("[{}]", destination.key).cyan(), text);
        Ok(())
    }

    async fn remove_destination(&self, key: &AccountId) -> Result<bool> {
        println!("{} destination removed", format!("[{key}]").cyan());
        Ok(true)
    }
}
