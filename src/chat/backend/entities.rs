//! Row types for the hosted data backend.
//!
//! These mirror the backend's `profiles`, `connections` and `messages`
//! relations. The core never owns them; it only reads rows, inserts new
//! messages and flips the two per-viewer deletion flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user profile as stored by the backend. Read-only from this core's
/// perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// Connection `status` value for a live follow edge.
pub const CONNECTION_ACTIVE: &str = "active";

/// A directed follow edge: `user_id` follows `friend_id`.
///
/// Two active rows with swapped endpoints denote mutual following.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRow {
    pub user_id: String,
    pub friend_id: String,
    pub status: String,
    #[serde(default)]
    pub is_favorite: bool,
}

impl ConnectionRow {
    pub fn is_active(&self) -> bool {
        self.status == CONNECTION_ACTIVE
    }
}

/// One direct message row.
///
/// `id` is backend-assigned and sortable; `created_at` is backend-assigned.
/// The two deletion flags are independent: a row is visible to its sender
/// only while `sender_deleted` is false and to its receiver only while
/// `receiver_deleted` is false, so erasing a conversation never removes the
/// other party's copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub sender_deleted: bool,
    #[serde(default)]
    pub receiver_deleted: bool,
}

impl MessageRow {
    /// The other participant from `user_id`'s point of view.
    pub fn partner_of(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Whether the row involves exactly the `{user_id, partner_id}` pair.
    pub fn belongs_to_pair(&self, user_id: &str, partner_id: &str) -> bool {
        (self.sender_id == user_id && self.receiver_id == partner_id)
            || (self.sender_id == partner_id && self.receiver_id == user_id)
    }

    /// Visibility under the viewer-side deletion flag.
    pub fn visible_to(&self, user_id: &str) -> bool {
        if self.sender_id == user_id {
            !self.sender_deleted
        } else if self.receiver_id == user_id {
            !self.receiver_deleted
        } else {
            false
        }
    }
}

/// Insert payload for a new message. Id, timestamp and flags are assigned by
/// the backend.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
}
