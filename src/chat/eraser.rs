//! Two-sided soft delete of one conversation, from the current user's
//! perspective only.
//!
//! Two independent bulk updates: `sender_deleted` on rows the user sent,
//! `receiver_deleted` on rows the user received. Rows are never removed and
//! the partner's flags are never touched, so the partner's view survives
//! intact. There is no rollback: if one side fails the store is left
//! asymmetric and the caller must retry.

use crate::chat::backend::DataBackend;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Affected-row counts from a fully successful erase.
#[derive(Debug, Clone, Copy)]
pub struct EraseReport {
    pub sent_hidden: u64,
    pub received_hidden: u64,
}

pub struct ConversationEraser {
    backend: Arc<dyn DataBackend>,
}

impl ConversationEraser {
    pub fn new(backend: Arc<dyn DataBackend>) -> Self {
        Self { backend }
    }

    /// Hide every message of the `{user, partner}` conversation from
    /// `user_id`'s view. Both updates are attempted even if the first
    /// fails, so a transient error hides as much as possible; any failure
    /// is reported as fatal with the resulting asymmetry spelled out.
    pub async fn delete_conversation(&self, user_id: &str, partner_id: &str) -> Result<EraseReport> {
        info!(
            "[Eraser] erasing conversation {} <-> {} (one-sided)",
            user_id, partner_id
        );
        let sent = self.backend.hide_sent_messages(user_id, partner_id).await;
        let received = self
            .backend
            .hide_received_messages(user_id, partner_id)
            .await;

        match (sent, received) {
            (Ok(sent_hidden), Ok(received_hidden)) => {
                info!(
                    "[Eraser] done, {} sent and {} received rows hidden",
                    sent_hidden, received_hidden
                );
                Ok(EraseReport {
                    sent_hidden,
                    received_hidden,
                })
            }
            (Ok(sent_hidden), Err(e)) => {
                warn!(
                    "[Eraser] partial erase: {} sent rows hidden, received side failed: {e:#}",
                    sent_hidden
                );
                Err(e).context(
                    "conversation partially erased: sent messages are hidden but received \
                     messages are not; retry the deletion",
                )
            }
            (Err(e), Ok(received_hidden)) => {
                warn!(
                    "[Eraser] partial erase: {} received rows hidden, sent side failed: {e:#}",
                    received_hidden
                );
                Err(e).context(
                    "conversation partially erased: received messages are hidden but sent \
                     messages are not; retry the deletion",
                )
            }
            (Err(e), Err(second)) => {
                warn!("[Eraser] erase failed on both sides: {e:#}; {second:#}");
                Err(e).context("conversation erase failed; nothing was hidden")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::backend::entities::NewMessage;
    use crate::chat::backend::memory::{Fault, MemoryBackend};
    use crate::chat::directory::ConversationDirectory;

    async fn insert(backend: &MemoryBackend, from: &str, to: &str, text: &str) {
        backend
            .insert_message(NewMessage {
                sender_id: from.to_string(),
                receiver_id: to.to_string(),
                text: text.to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    fn seeded_backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user("u1", "Ana", "ana");
        backend.add_user("u2", "Bruno", "bruno");
        backend
    }

    #[tokio::test]
    async fn erase_hides_both_directions_for_one_side_only() {
        let backend = seeded_backend();
        insert(&backend, "u1", "u2", "sent").await;
        insert(&backend, "u2", "u1", "received").await;

        let eraser = ConversationEraser::new(backend.clone());
        let report = eraser.delete_conversation("u1", "u2").await.unwrap();
        assert_eq!(report.sent_hidden, 1);
        assert_eq!(report.received_hidden, 1);

        let mine = ConversationDirectory::new(backend.clone(), "u1".to_string());
        assert!(mine.refresh().await.unwrap().is_empty());

        // The partner's view of the very same rows is untouched.
        let theirs = ConversationDirectory::new(backend.clone(), "u2".to_string());
        assert_eq!(theirs.refresh().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resending_after_erase_shows_only_the_new_message() {
        let backend = seeded_backend();
        insert(&backend, "u1", "u2", "old").await;

        let eraser = ConversationEraser::new(backend.clone());
        eraser.delete_conversation("u1", "u2").await.unwrap();
        insert(&backend, "u1", "u2", "fresh start").await;

        let mine = ConversationDirectory::new(backend.clone(), "u1".to_string());
        let entries = mine.refresh().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].preview.as_ref().unwrap().text, "fresh start");

        // The partner still sees both rows.
        let visible_to_partner = backend
            .raw_messages()
            .into_iter()
            .filter(|m| m.visible_to("u2"))
            .count();
        assert_eq!(visible_to_partner, 2);
    }

    #[tokio::test]
    async fn second_step_failure_reports_partial_state() {
        let backend = seeded_backend();
        insert(&backend, "u1", "u2", "sent").await;
        insert(&backend, "u2", "u1", "received").await;

        backend.inject_fault(Fault::HideReceived);
        let eraser = ConversationEraser::new(backend.clone());
        let err = eraser.delete_conversation("u1", "u2").await.unwrap_err();
        assert!(format!("{err:#}").contains("partially erased"));

        // Asymmetric state: the sent row is hidden, the received row is not.
        let rows = backend.raw_messages();
        assert!(rows.iter().any(|m| m.text == "sent" && m.sender_deleted));
        assert!(rows.iter().any(|m| m.text == "received" && !m.receiver_deleted));
    }
}
