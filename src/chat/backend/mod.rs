//! Data backend contract.
//!
//! Everything the messaging core needs from the hosted backend: the auth
//! query, row queries over `messages` / `connections` / `profiles`, the
//! message insert, the two bulk deletion-flag updates and the realtime
//! insert subscription. The core talks to `Arc<dyn DataBackend>` only, so
//! the HTTP backend and the in-process memory backend are interchangeable.

pub mod entities;
pub mod http;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use entities::{ConnectionRow, MessageRow, NewMessage, ProfileRow};

/// Scoped handle for one realtime subscription.
///
/// Owns the background task that feeds the event channel; dropping the guard
/// (or calling [`SubscriptionGuard::close`]) aborts it. A session holds at
/// most one guard at a time, which is what enforces the one-subscription
/// invariant.
pub struct SubscriptionGuard {
    task: Option<JoinHandle<()>>,
    label: String,
}

impl SubscriptionGuard {
    pub fn new(task: JoinHandle<()>, label: impl Into<String>) -> Self {
        Self {
            task: Some(task),
            label: label.into(),
        }
    }

    /// Explicit release. Equivalent to dropping the guard.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("[Backend] closed realtime subscription ({})", self.label);
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// An open realtime subscription: the insert event stream plus its guard.
///
/// Events carry the full inserted row. The channel is deliberately coarser
/// than a single conversation ("messages where I am a participant"); the
/// consumer must filter to the pair it cares about.
pub struct InsertSubscription {
    pub events: mpsc::Receiver<MessageRow>,
    pub guard: SubscriptionGuard,
}

/// Contract the messaging core expects from the hosted data backend.
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Who is the current authenticated user, if anyone.
    async fn current_user_id(&self) -> Result<Option<String>>;

    /// All rows visible to `user_id` regardless of partner:
    /// (`sender_id = user` and not `sender_deleted`) OR
    /// (`receiver_id = user` and not `receiver_deleted`),
    /// ordered by `created_at` descending.
    async fn messages_involving(&self, user_id: &str) -> Result<Vec<MessageRow>>;

    /// The pair history visible to `user_id`, ordered by `created_at`
    /// ascending.
    async fn messages_between(&self, user_id: &str, partner_id: &str) -> Result<Vec<MessageRow>>;

    /// Active connection rows where `user_id` is the follower.
    async fn following_of(&self, user_id: &str) -> Result<Vec<ConnectionRow>>;

    /// Active connection rows where `user_id` is the followee.
    async fn followers_of(&self, user_id: &str) -> Result<Vec<ConnectionRow>>;

    /// Batch profile lookup (`id in (set)`).
    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileRow>>;

    /// Insert one message; returns the fully populated row with the
    /// backend-assigned id and timestamp.
    async fn insert_message(&self, message: NewMessage) -> Result<MessageRow>;

    /// Bulk-set `sender_deleted = true` on every row where
    /// `sender_id = sender_id` and `receiver_id = receiver_id`.
    /// Returns the affected-row count.
    async fn hide_sent_messages(&self, sender_id: &str, receiver_id: &str) -> Result<u64>;

    /// Bulk-set `receiver_deleted = true` on every row where
    /// `receiver_id = receiver_id` and `sender_id = sender_id`.
    async fn hide_received_messages(&self, receiver_id: &str, sender_id: &str) -> Result<u64>;

    /// Register interest in message inserts involving `user_id`.
    async fn subscribe_message_inserts(&self, user_id: &str) -> Result<InsertSubscription>;
}
