//! Chat session: message history and live updates for exactly one partner.
//!
//! The session is a small state machine (Idle -> Loading -> Active) guarded
//! by a mutex, with a generation counter that invalidates everything still
//! in flight for a previous partner. The realtime subscription guard lives
//! inside the Active state, so replacing or clearing the state is what
//! releases it; there is never more than one open subscription.

use crate::chat::backend::entities::{MessageRow, NewMessage};
use crate::chat::backend::{DataBackend, SubscriptionGuard};
use crate::chat::session::listener::{EmptyMessageListener, MessageListener};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Loading,
    Active,
}

enum SessionState {
    Idle,
    Loading {
        partner_id: String,
    },
    Active {
        partner_id: String,
        messages: Vec<MessageRow>,
        /// `None` when the subscription failed to open and the session runs
        /// without live updates.
        _subscription: Option<SubscriptionGuard>,
    },
}

struct SessionInner {
    generation: u64,
    state: SessionState,
}

pub struct ChatSession {
    backend: Arc<dyn DataBackend>,
    user_id: String,
    listener: Arc<dyn MessageListener>,
    /// Caller-supplied suspended/blocked flag; sends are refused while set.
    restricted: AtomicBool,
    inner: Arc<Mutex<SessionInner>>,
}

fn sort_by_created_at(messages: &mut [MessageRow]) {
    messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
}

impl ChatSession {
    pub fn new(backend: Arc<dyn DataBackend>, user_id: String) -> Self {
        Self::with_listener(backend, user_id, Arc::new(EmptyMessageListener))
    }

    pub fn with_listener(
        backend: Arc<dyn DataBackend>,
        user_id: String,
        listener: Arc<dyn MessageListener>,
    ) -> Self {
        Self {
            backend,
            user_id,
            listener,
            restricted: AtomicBool::new(false),
            inner: Arc::new(Mutex::new(SessionInner {
                generation: 0,
                state: SessionState::Idle,
            })),
        }
    }

    pub fn set_restricted(&self, restricted: bool) {
        self.restricted.store(restricted, Ordering::SeqCst);
    }

    pub async fn status(&self) -> SessionStatus {
        match self.inner.lock().await.state {
            SessionState::Idle => SessionStatus::Idle,
            SessionState::Loading { .. } => SessionStatus::Loading,
            SessionState::Active { .. } => SessionStatus::Active,
        }
    }

    /// Partner of the current (loading or active) session.
    pub async fn partner_id(&self) -> Option<String> {
        match &self.inner.lock().await.state {
            SessionState::Idle => None,
            SessionState::Loading { partner_id } | SessionState::Active { partner_id, .. } => {
                Some(partner_id.clone())
            }
        }
    }

    /// Snapshot of the active message list, `created_at` ascending.
    pub async fn messages(&self) -> Vec<MessageRow> {
        match &self.inner.lock().await.state {
            SessionState::Active { messages, .. } => messages.clone(),
            _ => Vec::new(),
        }
    }

    /// Open (or switch to) a session with `partner_id`.
    ///
    /// Tears down any existing subscription first, fetches the pair history
    /// and opens a fresh realtime subscription. A result arriving after the
    /// session moved on to another partner is discarded, never applied.
    pub async fn open(&self, partner_id: &str) -> Result<()> {
        let (generation, closed_partner) = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            // Replacing the state drops a previous Active's guard, closing
            // its subscription before the new one opens.
            let prev = std::mem::replace(
                &mut inner.state,
                SessionState::Loading {
                    partner_id: partner_id.to_string(),
                },
            );
            let closed = match prev {
                SessionState::Active { partner_id, .. } => Some(partner_id),
                _ => None,
            };
            (inner.generation, closed)
        };
        if let Some(closed) = closed_partner {
            self.listener.on_session_closed(closed).await;
        }
        info!("[Session] opening chat with {}", partner_id);

        let history = match self
            .backend
            .messages_between(&self.user_id, partner_id)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                // Session stays in Loading for this partner; caller may
                // retry. A stale failure belongs to a dead generation and
                // changes nothing either way.
                warn!("[Session] history fetch for {} failed: {e:#}", partner_id);
                return Err(e).context("chat history fetch failed");
            }
        };

        // The fetch ran unlocked, so a partner switch may have superseded
        // this open while it was in flight. Check before subscribing: a dead
        // generation must never hold a second live subscription or report
        // status for the session that replaced it.
        if self.inner.lock().await.generation != generation {
            debug!(
                "[Session] discarding stale open for {} (partner switched)",
                partner_id
            );
            return Ok(());
        }

        let subscription = match self.backend.subscribe_message_inserts(&self.user_id).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                // Non-fatal: history still shows, just without live updates.
                warn!("[Session] realtime subscription failed, degraded mode: {e:#}");
                if self.inner.lock().await.generation == generation {
                    self.listener
                        .on_realtime_status_changed(false, format!("{e:#}"))
                        .await;
                }
                None
            }
        };

        let live = subscription.is_some();
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                debug!(
                    "[Session] discarding stale open for {} (partner switched)",
                    partner_id
                );
                return Ok(());
            }
            let (guard, events) = match subscription {
                Some(s) => (Some(s.guard), Some(s.events)),
                None => (None, None),
            };
            inner.state = SessionState::Active {
                partner_id: partner_id.to_string(),
                messages: history,
                _subscription: guard,
            };
            if let Some(events) = events {
                self.spawn_event_pump(events, generation, partner_id.to_string());
            }
        }

        self.listener
            .on_session_opened(partner_id.to_string())
            .await;
        if live {
            self.listener
                .on_realtime_status_changed(true, "realtime subscription open".to_string())
                .await;
        }
        Ok(())
    }

    /// Forwards realtime inserts into the active message list.
    ///
    /// The channel is coarser than the pair, so every event passes the pair
    /// predicate and the viewer visibility check before it is appended. The
    /// list is re-sorted after every append so out-of-order delivery cannot
    /// misorder it, and appends de-duplicate by message id against the
    /// confirmed-send echo.
    fn spawn_event_pump(
        &self,
        mut events: tokio::sync::mpsc::Receiver<MessageRow>,
        generation: u64,
        partner_id: String,
    ) {
        let inner = Arc::clone(&self.inner);
        let listener = self.listener.clone();
        let user_id = self.user_id.clone();
        tokio::spawn(async move {
            while let Some(row) = events.recv().await {
                if !row.belongs_to_pair(&user_id, &partner_id) {
                    debug!("[Session] ignoring insert for another pair (id={})", row.id);
                    continue;
                }
                if !row.visible_to(&user_id) {
                    continue;
                }
                let appended = {
                    let mut guard = inner.lock().await;
                    if guard.generation != generation {
                        break;
                    }
                    match &mut guard.state {
                        SessionState::Active { messages, .. } => {
                            if messages.iter().any(|m| m.id == row.id) {
                                false
                            } else {
                                messages.push(row.clone());
                                sort_by_created_at(messages);
                                true
                            }
                        }
                        _ => break,
                    }
                };
                if appended {
                    listener.on_message_received(row).await;
                }
            }
            debug!("[Session] event pump for {} finished", partner_id);
        });
    }

    /// Submit one outgoing message to the open partner.
    ///
    /// Never reaches the backend for empty-after-trim text, without an
    /// active session, or while the account is flagged restricted.
    pub async fn send(&self, text: &str) -> Result<MessageRow> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            anyhow::bail!("refusing to send an empty message");
        }
        if self.restricted.load(Ordering::SeqCst) {
            anyhow::bail!("account is restricted from sending messages");
        }
        let partner_id = {
            let inner = self.inner.lock().await;
            match &inner.state {
                SessionState::Active { partner_id, .. } => partner_id.clone(),
                _ => anyhow::bail!("no active chat session to send into"),
            }
        };

        let row = self
            .backend
            .insert_message(NewMessage {
                sender_id: self.user_id.clone(),
                receiver_id: partner_id.clone(),
                text: trimmed.to_string(),
            })
            .await
            .context("message send failed")?;

        // Append the confirmed row if the session is still on this partner;
        // the realtime echo of the same id is a no-op either way.
        {
            let mut inner = self.inner.lock().await;
            if let SessionState::Active {
                partner_id: current,
                messages,
                ..
            } = &mut inner.state
            {
                if *current == partner_id && !messages.iter().any(|m| m.id == row.id) {
                    messages.push(row.clone());
                    sort_by_created_at(messages);
                }
            }
        }
        self.listener.on_message_sent(row.clone()).await;
        Ok(row)
    }

    /// Tear the session down: subscription released, messages cleared.
    pub async fn close(&self) {
        let closed_partner = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            match std::mem::replace(&mut inner.state, SessionState::Idle) {
                SessionState::Active { partner_id, .. } => Some(partner_id),
                SessionState::Loading { partner_id } => Some(partner_id),
                SessionState::Idle => None,
            }
        };
        if let Some(partner_id) = closed_partner {
            info!("[Session] closed chat with {}", partner_id);
            self.listener.on_session_closed(partner_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::backend::memory::{Fault, MemoryBackend};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    /// Records realtime status callbacks so tests can assert on them.
    #[derive(Default)]
    struct RecordingListener {
        realtime_events: std::sync::Mutex<Vec<(bool, String)>>,
    }

    impl RecordingListener {
        fn realtime_events(&self) -> Vec<(bool, String)> {
            self.realtime_events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageListener for RecordingListener {
        async fn on_session_opened(&self, _partner_id: String) {}
        async fn on_message_received(&self, _message: MessageRow) {}
        async fn on_message_sent(&self, _message: MessageRow) {}
        async fn on_session_closed(&self, _partner_id: String) {}
        async fn on_realtime_status_changed(&self, connected: bool, detail: String) {
            self.realtime_events
                .lock()
                .unwrap()
                .push((connected, detail));
        }
    }

    fn seeded_backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user("u1", "Ana", "ana");
        backend.add_user("u2", "Bruno", "bruno");
        backend.add_user("u3", "Carla", "carla");
        backend
    }

    async fn insert(backend: &MemoryBackend, from: &str, to: &str, text: &str) -> MessageRow {
        let row = backend
            .insert_message(NewMessage {
                sender_id: from.to_string(),
                receiver_id: to.to_string(),
                text: text.to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        row
    }

    async fn wait_for_len(session: &ChatSession, len: usize) -> Vec<MessageRow> {
        for _ in 0..100 {
            let messages = session.messages().await;
            if messages.len() >= len {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        session.messages().await
    }

    #[tokio::test]
    async fn open_loads_history_ascending_and_send_appends() {
        let backend = seeded_backend();
        insert(&backend, "u1", "u2", "older").await;
        insert(&backend, "u2", "u1", "newer").await;

        let session = ChatSession::new(backend.clone(), "u1".to_string());
        session.open("u2").await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Active);

        let messages = session.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "older");
        assert_eq!(messages[1].text, "newer");

        let sent = session.send("  reply  ").await.unwrap();
        assert_eq!(sent.text, "reply");
        let messages = session.messages().await;
        assert_eq!(messages.last().unwrap().text, "reply");
    }

    #[tokio::test]
    async fn stale_history_fetch_is_discarded_on_partner_switch() {
        let backend = seeded_backend();
        insert(&backend, "u2", "u1", "from bruno").await;
        insert(&backend, "u3", "u1", "from carla").await;

        backend.set_history_delay(Some(Duration::from_millis(80)));
        let session = Arc::new(ChatSession::new(backend.clone(), "u1".to_string()));

        let slow = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.open("u2").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.open("u3").await.unwrap();
        slow.await.unwrap().unwrap();

        // The late result for u2 must not have been applied.
        assert_eq!(session.partner_id().await.as_deref(), Some("u3"));
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "from carla");
    }

    #[tokio::test]
    async fn stale_open_never_opens_a_second_subscription() {
        let backend = seeded_backend();
        backend.set_history_delay(Some(Duration::from_millis(80)));

        let listener = Arc::new(RecordingListener::default());
        let session = Arc::new(ChatSession::with_listener(
            backend.clone(),
            "u1".to_string(),
            listener.clone(),
        ));

        // Hold u2's history fetch in flight, switch to u3, then let the
        // stale open resolve.
        let slow = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.open("u2").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.open("u3").await.unwrap();
        slow.await.unwrap().unwrap();

        // Only the current generation subscribed; the superseded open bailed
        // before reaching the realtime channel.
        assert_eq!(backend.subscribe_calls(), 1);
        assert_eq!(session.partner_id().await.as_deref(), Some("u3"));

        // No degraded-mode report leaked from the dead generation.
        let events = listener.realtime_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].0);
    }

    #[tokio::test]
    async fn failed_history_fetch_stays_loading_and_retry_succeeds() {
        let backend = seeded_backend();
        insert(&backend, "u2", "u1", "hi").await;

        let session = ChatSession::new(backend.clone(), "u1".to_string());
        backend.inject_fault(Fault::Read);
        assert!(session.open("u2").await.is_err());

        // The partner is kept so the caller can retry the same open.
        assert_eq!(session.status().await, SessionStatus::Loading);
        assert_eq!(session.partner_id().await.as_deref(), Some("u2"));

        session.open("u2").await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Active);
        assert_eq!(session.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn subscription_failure_degrades_to_a_usable_session() {
        let backend = seeded_backend();
        insert(&backend, "u2", "u1", "hi").await;

        let listener = Arc::new(RecordingListener::default());
        let session =
            ChatSession::with_listener(backend.clone(), "u1".to_string(), listener.clone());

        backend.inject_fault(Fault::Subscribe);
        session.open("u2").await.unwrap();

        // History shows and sending works, just without live updates.
        assert_eq!(session.status().await, SessionStatus::Active);
        assert_eq!(session.messages().await.len(), 1);
        let sent = session.send("still works").await.unwrap();
        assert_eq!(session.messages().await.last().unwrap().id, sent.id);

        let events = listener.realtime_events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].0);

        // A row inserted behind the session's back is not picked up live.
        insert(&backend, "u2", "u1", "unseen").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.messages().await.iter().all(|m| m.text != "unseen"));
    }

    #[tokio::test]
    async fn realtime_inserts_filtered_to_open_pair() {
        let backend = seeded_backend();
        let session = ChatSession::new(backend.clone(), "u1".to_string());
        session.open("u2").await.unwrap();

        // Same participant, wrong pair: must never leak into this session.
        insert(&backend, "u3", "u1", "wrong pair").await;
        insert(&backend, "u2", "u1", "right pair").await;

        let messages = wait_for_len(&session, 1).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "right pair");
    }

    #[tokio::test]
    async fn confirmed_send_and_realtime_echo_deduplicate() {
        let backend = seeded_backend();
        let session = ChatSession::new(backend.clone(), "u1".to_string());
        session.open("u2").await.unwrap();

        let sent = session.send("hello").await.unwrap();
        // The memory backend echoes the insert over the realtime feed; give
        // the pump time to see it.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = session.messages().await;
        assert_eq!(messages.iter().filter(|m| m.id == sent.id).count(), 1);
    }

    #[tokio::test]
    async fn out_of_order_realtime_delivery_is_resorted() {
        let backend = seeded_backend();
        let session = ChatSession::new(backend.clone(), "u1".to_string());
        session.open("u2").await.unwrap();

        let newer = MessageRow {
            id: 50,
            sender_id: "u2".to_string(),
            receiver_id: "u1".to_string(),
            text: "second".to_string(),
            created_at: Utc::now(),
            is_read: false,
            sender_deleted: false,
            receiver_deleted: false,
        };
        let older = MessageRow {
            created_at: newer.created_at - ChronoDuration::seconds(60),
            id: 49,
            text: "first".to_string(),
            ..newer.clone()
        };
        backend.publish_insert(newer);
        backend.publish_insert(older);

        let messages = wait_for_len(&session, 2).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "first");
        assert_eq!(messages[1].text, "second");
    }

    #[tokio::test]
    async fn send_preconditions_never_reach_backend() {
        let backend = seeded_backend();
        let session = ChatSession::new(backend.clone(), "u1".to_string());

        // No open session.
        assert!(session.send("hi").await.is_err());

        session.open("u2").await.unwrap();
        assert!(session.send("").await.is_err());
        assert!(session.send("   ").await.is_err());

        session.set_restricted(true);
        assert!(session.send("blocked").await.is_err());
        assert_eq!(backend.insert_calls(), 0);

        session.set_restricted(false);
        session.send("ok").await.unwrap();
        assert_eq!(backend.insert_calls(), 1);
    }

    #[tokio::test]
    async fn close_returns_to_idle_and_clears_messages() {
        let backend = seeded_backend();
        insert(&backend, "u2", "u1", "hi").await;

        let session = ChatSession::new(backend.clone(), "u1".to_string());
        session.open("u2").await.unwrap();
        assert_eq!(session.messages().await.len(), 1);

        session.close().await;
        assert_eq!(session.status().await, SessionStatus::Idle);
        assert!(session.messages().await.is_empty());
        assert!(session.partner_id().await.is_none());
    }
}
