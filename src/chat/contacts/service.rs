//! Connectable contacts for starting new conversations.
//!
//! The candidate set is the union of "I follow" and "follows me" over active
//! connection rows, independent of message history. Search runs against the
//! cached list in memory; no network round-trip per keystroke.

use crate::chat::backend::entities::ProfileRow;
use crate::chat::backend::DataBackend;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub struct ContactBook {
    backend: Arc<dyn DataBackend>,
    user_id: String,
    contacts: Mutex<Vec<ProfileRow>>,
}

impl ContactBook {
    pub fn new(backend: Arc<dyn DataBackend>, user_id: String) -> Self {
        Self {
            backend,
            user_id,
            contacts: Mutex::new(Vec::new()),
        }
    }

    /// Cached contact list.
    pub fn contacts(&self) -> Vec<ProfileRow> {
        self.contacts.lock().unwrap().clone()
    }

    /// Rebuild the candidate set from the connection rows.
    pub async fn refresh(&self) -> Result<Vec<ProfileRow>> {
        let result = async {
            let following = self.backend.following_of(&self.user_id).await?;
            let followers = self.backend.followers_of(&self.user_id).await?;
            anyhow::Ok((following, followers))
        }
        .await;

        let (following, followers) = match result {
            Ok(pair) => pair,
            Err(e) => {
                warn!("[Contacts] fetch failed, keeping previous list: {e:#}");
                return Err(e).context("contact list fetch failed");
            }
        };

        // Union of both directions, deduplicated by the other party's id.
        let mut seen = HashSet::new();
        let mut ids: Vec<String> = Vec::new();
        for id in following
            .into_iter()
            .map(|c| c.friend_id)
            .chain(followers.into_iter().map(|c| c.user_id))
        {
            if id != self.user_id && seen.insert(id.clone()) {
                ids.push(id);
            }
        }

        let profiles = self.backend.profiles_by_ids(&ids).await?;
        info!("[Contacts] rebuilt, {} contacts", profiles.len());
        *self.contacts.lock().unwrap() = profiles.clone();
        Ok(profiles)
    }

    /// Case-insensitive substring match on display name or username over the
    /// cached list. Empty query returns everything.
    pub fn search(&self, query: &str) -> Vec<ProfileRow> {
        let needle = query.trim().to_lowercase();
        let contacts = self.contacts.lock().unwrap();
        if needle.is_empty() {
            return contacts.clone();
        }
        contacts
            .iter()
            .filter(|p| {
                p.display_name.to_lowercase().contains(&needle)
                    || p.username.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }
}
