// Notification sink trait: where new-post and story messages go.
//
// The default implementation posts into per-account Discord threads. A
// console sink prints to stdout for dry runs.

use anyhow::Result;
use async_trait::async_trait;

use crate::tracking::account::AccountId;

/// One message for one destination. Delivery is attempted once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub destination: AccountId,
    pub text: String,
}

/// A resolved destination, ready to receive messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationHandle {
    pub key: AccountId,
    /// Sink-specific identifier (a Discord thread id, for example).
    pub id: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Find the destination for `key`, creating it if it doesn't exist.
    async fn ensure_destination(&self, key: &AccountId) -> Result<DestinationHandle>;

    /// Deliver one message.
    async fn send(&self, destination: &DestinationHandle, text: &str) -> Result<()>;

    /// Delete the destination for `key`. Returns false if there was none.
    async fn remove_destination(&self, key: &AccountId) -> Result<bool>;
}
