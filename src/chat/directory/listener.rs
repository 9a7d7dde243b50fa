//! Directory change callbacks.

use crate::chat::directory::models::ConversationEntry;
use async_trait::async_trait;

/// Callback interface for directory updates.
#[async_trait]
pub trait DirectoryListener: Send + Sync {
    /// Fired after each successful rebuild with the full ordered snapshot.
    async fn on_conversations_changed(&self, entries: Vec<ConversationEntry>);
}

/// Default no-op listener.
pub struct EmptyDirectoryListener;

#[async_trait]
impl DirectoryListener for EmptyDirectoryListener {
    async fn on_conversations_changed(&self, _entries: Vec<ConversationEntry>) {}
}
