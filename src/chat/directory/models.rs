//! Directory view models.

use crate::chat::backend::entities::{MessageRow, ProfileRow};
use serde::Serialize;

/// One directory row: a conversation partner, the most recent message
/// visible to the current user (the preview), and the unread count.
///
/// Derived wholesale from the message history on every rebuild; never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationEntry {
    pub user: ProfileRow,
    /// Most recent visible message with this partner. `None` only for a
    /// partner pinned from search before any message exists.
    pub preview: Option<MessageRow>,
    /// Incoming messages from this partner not yet marked read.
    pub unread_count: u32,
}
