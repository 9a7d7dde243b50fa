//! In-process implementation of the data backend contract.
//!
//! Backs the demo CLI and the unit tests. Rows live in a mutex-guarded
//! store; realtime inserts are fanned out over a broadcast channel. A couple
//! of knobs (read delay, one-shot fault injection) exist so the stale-fetch
//! and failure-path tests can be driven deterministically.

use crate::chat::backend::entities::{
    ConnectionRow, MessageRow, NewMessage, ProfileRow, CONNECTION_ACTIVE,
};
use crate::chat::backend::{DataBackend, InsertSubscription, SubscriptionGuard};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Operation classes a one-shot fault can be armed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Read,
    Profiles,
    Insert,
    HideSent,
    HideReceived,
    Subscribe,
}

#[derive(Default)]
struct Store {
    profiles: Vec<ProfileRow>,
    connections: Vec<ConnectionRow>,
    messages: Vec<MessageRow>,
    next_id: i64,
}

/// In-memory backend with a broadcast insert feed.
pub struct MemoryBackend {
    store: Mutex<Store>,
    inserts: broadcast::Sender<MessageRow>,
    current_user: Mutex<Option<String>>,
    history_delay: Mutex<Option<Duration>>,
    fault: Mutex<Option<Fault>>,
    insert_calls: AtomicU64,
    subscribe_calls: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (inserts, _) = broadcast::channel(64);
        Self {
            store: Mutex::new(Store {
                next_id: 1,
                ..Store::default()
            }),
            inserts,
            current_user: Mutex::new(None),
            history_delay: Mutex::new(None),
            fault: Mutex::new(None),
            insert_calls: AtomicU64::new(0),
            subscribe_calls: AtomicU64::new(0),
        }
    }

    /// Seed a profile row.
    pub fn add_user(&self, id: &str, display_name: &str, username: &str) {
        self.store.lock().unwrap().profiles.push(ProfileRow {
            id: id.to_string(),
            display_name: display_name.to_string(),
            username: username.to_string(),
            avatar_url: String::new(),
        });
    }

    /// Seed an active follow edge `follower -> followee`.
    pub fn add_connection(&self, follower: &str, followee: &str) {
        self.store.lock().unwrap().connections.push(ConnectionRow {
            user_id: follower.to_string(),
            friend_id: followee.to_string(),
            status: CONNECTION_ACTIVE.to_string(),
            is_favorite: false,
        });
    }

    /// Set (or clear) the signed-in identity.
    pub fn sign_in_as(&self, user_id: Option<&str>) {
        *self.current_user.lock().unwrap() = user_id.map(str::to_string);
    }

    /// Delay applied to pair-history fetches; lets tests hold a fetch in
    /// flight while the session switches partners.
    pub fn set_history_delay(&self, delay: Option<Duration>) {
        *self.history_delay.lock().unwrap() = delay;
    }

    /// Arm a one-shot failure for the next operation of the given class.
    pub fn inject_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap() = Some(fault);
    }

    /// How many insert calls actually reached the backend.
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// How many realtime subscriptions were opened.
    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Raw row snapshot, deletion flags included. Test inspection only.
    pub fn raw_messages(&self) -> Vec<MessageRow> {
        self.store.lock().unwrap().messages.clone()
    }

    /// Publish an insert directly to the realtime feed without storing it.
    /// Stands in for rows inserted by other clients' stores arriving over
    /// the channel.
    pub fn publish_insert(&self, row: MessageRow) {
        let _ = self.inserts.send(row);
    }

    fn take_fault(&self, class: Fault) -> Result<()> {
        let mut slot = self.fault.lock().unwrap();
        if *slot == Some(class) {
            *slot = None;
            anyhow::bail!("injected {class:?} failure");
        }
        Ok(())
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn current_user_id(&self) -> Result<Option<String>> {
        Ok(self.current_user.lock().unwrap().clone())
    }

    async fn messages_involving(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        self.take_fault(Fault::Read)?;
        let store = self.store.lock().unwrap();
        let mut rows: Vec<MessageRow> = store
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == user_id || m.receiver_id == user_id) && m.visible_to(user_id)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    async fn messages_between(&self, user_id: &str, partner_id: &str) -> Result<Vec<MessageRow>> {
        let delay = *self.history_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.take_fault(Fault::Read)?;
        let store = self.store.lock().unwrap();
        let mut rows: Vec<MessageRow> = store
            .messages
            .iter()
            .filter(|m| m.belongs_to_pair(user_id, partner_id) && m.visible_to(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(rows)
    }

    async fn following_of(&self, user_id: &str) -> Result<Vec<ConnectionRow>> {
        self.take_fault(Fault::Read)?;
        let store = self.store.lock().unwrap();
        Ok(store
            .connections
            .iter()
            .filter(|c| c.user_id == user_id && c.is_active())
            .cloned()
            .collect())
    }

    async fn followers_of(&self, user_id: &str) -> Result<Vec<ConnectionRow>> {
        self.take_fault(Fault::Read)?;
        let store = self.store.lock().unwrap();
        Ok(store
            .connections
            .iter()
            .filter(|c| c.friend_id == user_id && c.is_active())
            .cloned()
            .collect())
    }

    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileRow>> {
        self.take_fault(Fault::Profiles)?;
        let store = self.store.lock().unwrap();
        Ok(store
            .profiles
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRow> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.take_fault(Fault::Insert)?;
        let row = {
            let mut store = self.store.lock().unwrap();
            let id = store.next_id;
            store.next_id += 1;
            let row = MessageRow {
                id,
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                text: message.text,
                created_at: Utc::now(),
                is_read: false,
                sender_deleted: false,
                receiver_deleted: false,
            };
            store.messages.push(row.clone());
            row
        };
        // Fan the confirmed row out to realtime subscribers; send errors just
        // mean nobody is listening.
        let _ = self.inserts.send(row.clone());
        Ok(row)
    }

    async fn hide_sent_messages(&self, sender_id: &str, receiver_id: &str) -> Result<u64> {
        self.take_fault(Fault::HideSent)?;
        let mut store = self.store.lock().unwrap();
        let mut affected = 0;
        for m in store.messages.iter_mut() {
            if m.sender_id == sender_id && m.receiver_id == receiver_id {
                m.sender_deleted = true;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn hide_received_messages(&self, receiver_id: &str, sender_id: &str) -> Result<u64> {
        self.take_fault(Fault::HideReceived)?;
        let mut store = self.store.lock().unwrap();
        let mut affected = 0;
        for m in store.messages.iter_mut() {
            if m.receiver_id == receiver_id && m.sender_id == sender_id {
                m.receiver_deleted = true;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn subscribe_message_inserts(&self, user_id: &str) -> Result<InsertSubscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.take_fault(Fault::Subscribe)?;
        let mut feed = self.inserts.subscribe();
        let (tx, rx) = mpsc::channel(64);
        let user = user_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(row) => {
                        if row.sender_id != user && row.receiver_id != user {
                            continue;
                        }
                        if tx.send(row).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("[Memory] realtime feed lagged, skipped {skipped} rows");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(InsertSubscription {
            events: rx,
            guard: SubscriptionGuard::new(task, format!("messages:{user_id}")),
        })
    }
}
