//! Conversation directory: one entry per partner with any visible message,
//! ordered by most recent activity.

use crate::chat::backend::entities::{MessageRow, ProfileRow};
use crate::chat::backend::DataBackend;
use crate::chat::directory::listener::{DirectoryListener, EmptyDirectoryListener};
use crate::chat::directory::models::ConversationEntry;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Derives the partner list for one user from the message history.
///
/// Holds only a transient snapshot; every `refresh` rebuilds it wholesale
/// from a single backend query. A failed refresh leaves the previous
/// snapshot in place so a transient error never flashes an empty list.
pub struct ConversationDirectory {
    backend: Arc<dyn DataBackend>,
    user_id: String,
    listener: Arc<dyn DirectoryListener>,
    entries: Mutex<Vec<ConversationEntry>>,
    /// Partners forced into the view before any message exists (picked from
    /// search). Dropped automatically once real history shows up.
    pinned: Mutex<HashSet<String>>,
}

impl ConversationDirectory {
    pub fn new(backend: Arc<dyn DataBackend>, user_id: String) -> Self {
        Self::with_listener(backend, user_id, Arc::new(EmptyDirectoryListener))
    }

    pub fn with_listener(
        backend: Arc<dyn DataBackend>,
        user_id: String,
        listener: Arc<dyn DirectoryListener>,
    ) -> Self {
        Self {
            backend,
            user_id,
            listener,
            entries: Mutex::new(Vec::new()),
            pinned: Mutex::new(HashSet::new()),
        }
    }

    /// Current snapshot without touching the backend.
    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Show `partner_id` in the directory even with no history yet. The
    /// entry carries an empty preview until the first message is sent.
    pub fn include_partner(&self, partner_id: &str) {
        if partner_id == self.user_id {
            return;
        }
        self.pinned.lock().unwrap().insert(partner_id.to_string());
    }

    /// Drop a pin, e.g. after the conversation with that partner was
    /// erased.
    pub fn remove_pin(&self, partner_id: &str) {
        self.pinned.lock().unwrap().remove(partner_id);
    }

    /// Rebuild the directory from the message history.
    ///
    /// One descending fetch, one walk: the first message seen per partner is
    /// that partner's preview (most recent by construction), unread counts
    /// accumulate along the way. Partner ids resolve to profiles in a single
    /// batch lookup.
    pub async fn refresh(&self) -> Result<Vec<ConversationEntry>> {
        let rows = match self.backend.messages_involving(&self.user_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    "[Directory] fetch failed, keeping previous snapshot: {e:#}"
                );
                return Err(e).context("conversation directory fetch failed");
            }
        };
        debug!("[Directory] fetched {} visible rows", rows.len());

        let mut order: Vec<String> = Vec::new();
        let mut previews: HashMap<String, MessageRow> = HashMap::new();
        let mut unread: HashMap<String, u32> = HashMap::new();
        for row in rows {
            let partner = row.partner_of(&self.user_id).to_string();
            if row.sender_id == partner && !row.is_read {
                *unread.entry(partner.clone()).or_default() += 1;
            }
            if !previews.contains_key(&partner) {
                order.push(partner.clone());
                previews.insert(partner, row);
            }
        }

        // Pinned partners with no history yet sort last with an empty
        // preview; pins superseded by real history are dropped.
        {
            let mut pinned = self.pinned.lock().unwrap();
            pinned.retain(|p| !previews.contains_key(p));
            for partner in pinned.iter() {
                order.push(partner.clone());
            }
        }

        let profiles = match self.backend.profiles_by_ids(&order).await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(
                    "[Directory] profile fetch failed, keeping previous snapshot: {e:#}"
                );
                return Err(e).context("conversation directory fetch failed");
            }
        };
        let by_id: HashMap<&str, &ProfileRow> =
            profiles.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut entries: Vec<ConversationEntry> = order
            .iter()
            .map(|partner| {
                let user = by_id.get(partner.as_str()).map(|p| (*p).clone()).unwrap_or_else(|| {
                    warn!("[Directory] no profile row for partner {partner}");
                    ProfileRow {
                        id: partner.clone(),
                        display_name: String::new(),
                        username: String::new(),
                        avatar_url: String::new(),
                    }
                });
                ConversationEntry {
                    user,
                    preview: previews.get(partner).cloned(),
                    unread_count: unread.get(partner).copied().unwrap_or(0),
                }
            })
            .collect();

        // Most recent activity first; entries with no preview last. Sort is
        // stable, so equal keys keep the fetch order.
        entries.sort_by(|a, b| {
            let key = |e: &ConversationEntry| e.preview.as_ref().map(|m| (m.created_at, m.id));
            match (key(a), key(b)) {
                (Some(ka), Some(kb)) => kb.cmp(&ka),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });

        info!("[Directory] rebuilt, {} conversations", entries.len());
        *self.entries.lock().unwrap() = entries.clone();
        self.listener.on_conversations_changed(entries.clone()).await;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::backend::entities::NewMessage;
    use crate::chat::backend::memory::{Fault, MemoryBackend};

    fn seeded_backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user("u1", "Ana", "ana");
        backend.add_user("u2", "Bruno", "bruno");
        backend.add_user("u3", "Carla", "carla");
        backend
    }

    async fn send(backend: &MemoryBackend, from: &str, to: &str, text: &str) {
        backend
            .insert_message(NewMessage {
                sender_id: from.to_string(),
                receiver_id: to.to_string(),
                text: text.to_string(),
            })
            .await
            .unwrap();
        // Distinct timestamps keep ordering assertions unambiguous.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    #[tokio::test]
    async fn one_entry_per_partner_most_recent_first() {
        let backend = seeded_backend();
        send(&backend, "u1", "u2", "first").await;
        send(&backend, "u2", "u1", "second").await;
        send(&backend, "u1", "u3", "hello carla").await;
        send(&backend, "u2", "u1", "third").await;

        let directory = ConversationDirectory::new(backend.clone(), "u1".to_string());
        let entries = directory.refresh().await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].user.id, "u2");
        assert_eq!(entries[0].preview.as_ref().unwrap().text, "third");
        assert_eq!(entries[1].user.id, "u3");
        let ids: HashSet<&str> = entries.iter().map(|e| e.user.id.as_str()).collect();
        assert_eq!(ids.len(), entries.len());
    }

    #[tokio::test]
    async fn unread_counts_incoming_only() {
        let backend = seeded_backend();
        send(&backend, "u2", "u1", "one").await;
        send(&backend, "u2", "u1", "two").await;
        send(&backend, "u1", "u2", "reply").await;

        let directory = ConversationDirectory::new(backend.clone(), "u1".to_string());
        let entries = directory.refresh().await.unwrap();
        assert_eq!(entries[0].unread_count, 2);
    }

    #[tokio::test]
    async fn sender_deleted_rows_hidden_from_sender_only() {
        let backend = seeded_backend();
        send(&backend, "u1", "u2", "soon gone").await;
        backend.hide_sent_messages("u1", "u2").await.unwrap();

        let for_sender = ConversationDirectory::new(backend.clone(), "u1".to_string());
        assert!(for_sender.refresh().await.unwrap().is_empty());

        let for_receiver = ConversationDirectory::new(backend.clone(), "u2".to_string());
        let entries = for_receiver.refresh().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].preview.as_ref().unwrap().text, "soon gone");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let backend = seeded_backend();
        send(&backend, "u2", "u1", "hi").await;

        let directory = ConversationDirectory::new(backend.clone(), "u1".to_string());
        directory.refresh().await.unwrap();
        assert_eq!(directory.entries().len(), 1);

        backend.inject_fault(Fault::Read);
        assert!(directory.refresh().await.is_err());
        assert_eq!(directory.entries().len(), 1);
    }

    #[tokio::test]
    async fn failed_profile_lookup_keeps_previous_snapshot() {
        let backend = seeded_backend();
        send(&backend, "u2", "u1", "hi").await;

        let directory = ConversationDirectory::new(backend.clone(), "u1".to_string());
        directory.refresh().await.unwrap();
        assert_eq!(directory.entries().len(), 1);

        backend.inject_fault(Fault::Profiles);
        assert!(directory.refresh().await.is_err());
        assert_eq!(directory.entries().len(), 1);
        assert_eq!(directory.entries()[0].user.display_name, "Bruno");
    }

    #[tokio::test]
    async fn pinned_partner_sorts_last_until_history_exists() {
        let backend = seeded_backend();
        send(&backend, "u2", "u1", "hi").await;

        let directory = ConversationDirectory::new(backend.clone(), "u1".to_string());
        directory.include_partner("u3");
        let entries = directory.refresh().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].user.id, "u2");
        assert_eq!(entries[1].user.id, "u3");
        assert!(entries[1].preview.is_none());

        send(&backend, "u1", "u3", "now real").await;
        let entries = directory.refresh().await.unwrap();
        assert_eq!(entries[0].user.id, "u3");
        assert!(entries[0].preview.is_some());
    }
}
