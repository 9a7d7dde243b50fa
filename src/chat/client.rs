//! EVOAPP messaging client facade.
//!
//! Wires the directory, contact book, chat session and eraser over one
//! shared backend handle. With no authenticated identity the client stays
//! signed out and every operation is a silent no-op: reads return empty,
//! writes are refused.

use crate::chat::backend::entities::{MessageRow, ProfileRow};
use crate::chat::backend::http::{HttpBackend, HttpBackendConfig};
use crate::chat::backend::DataBackend;
use crate::chat::contacts::ContactBook;
use crate::chat::directory::{
    ConversationDirectory, ConversationEntry, DirectoryListener, EmptyDirectoryListener,
};
use crate::chat::eraser::{ConversationEraser, EraseReport};
use crate::chat::session::{ChatSession, EmptyMessageListener, MessageComposer, MessageListener};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// REST base address of the hosted backend.
    pub api_base_url: String,
    /// WebSocket base address of the realtime channel.
    pub realtime_ws_url: String,
    /// Project API key.
    pub anon_key: String,
    /// Access token of the signed-in user; empty when signed out.
    pub access_token: String,
}

impl ClientConfig {
    pub fn new(anon_key: String, access_token: String) -> Self {
        Self {
            api_base_url: "http://localhost:54321".to_string(),
            realtime_ws_url: "ws://localhost:54321".to_string(),
            anon_key,
            access_token,
        }
    }
}

/// The messaging core's entry point.
pub struct ChatClient {
    backend: Arc<dyn DataBackend>,
    directory_listener: Arc<dyn DirectoryListener>,
    message_listener: Arc<dyn MessageListener>,
    user_id: Option<String>,
    directory: Option<Arc<ConversationDirectory>>,
    contacts: Option<Arc<ContactBook>>,
    session: Option<Arc<ChatSession>>,
    eraser: Option<ConversationEraser>,
    composer: Mutex<MessageComposer>,
}

impl ChatClient {
    /// Client over the hosted HTTP/realtime backend.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let backend = HttpBackend::new(HttpBackendConfig {
            api_base_url: config.api_base_url,
            realtime_ws_url: config.realtime_ws_url,
            anon_key: config.anon_key,
            access_token: config.access_token,
        })?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Client over any backend implementation (used by the demo CLI and the
    /// tests with the in-memory backend).
    pub fn with_backend(backend: Arc<dyn DataBackend>) -> Self {
        Self {
            backend,
            directory_listener: Arc::new(EmptyDirectoryListener),
            message_listener: Arc::new(EmptyMessageListener),
            user_id: None,
            directory: None,
            contacts: None,
            session: None,
            eraser: None,
            composer: Mutex::new(MessageComposer::new()),
        }
    }

    /// Register before `connect`; later registrations are ignored.
    pub fn set_directory_listener(&mut self, listener: Arc<dyn DirectoryListener>) {
        if self.directory.is_some() {
            warn!("[Client] directory listener registered after connect, ignoring");
            return;
        }
        self.directory_listener = listener;
    }

    /// Register before `connect`; later registrations are ignored.
    pub fn set_message_listener(&mut self, listener: Arc<dyn MessageListener>) {
        if self.session.is_some() {
            warn!("[Client] message listener registered after connect, ignoring");
            return;
        }
        self.message_listener = listener;
    }

    /// Resolve the authenticated identity and bring up the components.
    ///
    /// With no identity the client stays signed out; that is not an error.
    pub async fn connect(&mut self) -> Result<()> {
        let Some(user_id) = self.backend.current_user_id().await? else {
            info!("[Client] no authenticated user, staying signed out");
            return Ok(());
        };
        info!("[Client] connected as {}", user_id);

        let directory = Arc::new(ConversationDirectory::with_listener(
            self.backend.clone(),
            user_id.clone(),
            self.directory_listener.clone(),
        ));
        let contacts = Arc::new(ContactBook::new(self.backend.clone(), user_id.clone()));
        let session = Arc::new(ChatSession::with_listener(
            self.backend.clone(),
            user_id.clone(),
            self.message_listener.clone(),
        ));
        let eraser = ConversationEraser::new(self.backend.clone());

        // Initial population runs in the background; failures keep the
        // empty snapshots and are retried on the next explicit refresh.
        {
            let directory = directory.clone();
            tokio::spawn(async move {
                if let Err(e) = directory.refresh().await {
                    error!("[Client] initial directory refresh failed: {e:#}");
                }
            });
        }
        {
            let contacts = contacts.clone();
            tokio::spawn(async move {
                if let Err(e) = contacts.refresh().await {
                    error!("[Client] initial contacts refresh failed: {e:#}");
                }
            });
        }

        self.user_id = Some(user_id);
        self.directory = Some(directory);
        self.contacts = Some(contacts);
        self.session = Some(session);
        self.eraser = Some(eraser);
        Ok(())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Cached directory snapshot; empty when signed out.
    pub fn conversations(&self) -> Vec<ConversationEntry> {
        self.directory
            .as_ref()
            .map(|d| d.entries())
            .unwrap_or_default()
    }

    /// Rebuild the directory. Signed out: no-op, empty list.
    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationEntry>> {
        match &self.directory {
            Some(directory) => directory.refresh().await,
            None => Ok(Vec::new()),
        }
    }

    /// Cached contact list; empty when signed out.
    pub fn contacts(&self) -> Vec<ProfileRow> {
        self.contacts
            .as_ref()
            .map(|c| c.contacts())
            .unwrap_or_default()
    }

    /// Rebuild the contact list. Signed out: no-op, empty list.
    pub async fn refresh_contacts(&self) -> Result<Vec<ProfileRow>> {
        match &self.contacts {
            Some(contacts) => contacts.refresh().await,
            None => Ok(Vec::new()),
        }
    }

    /// In-memory contact search; empty when signed out.
    pub fn search_contacts(&self, query: &str) -> Vec<ProfileRow> {
        self.contacts
            .as_ref()
            .map(|c| c.search(query))
            .unwrap_or_default()
    }

    /// Open (or switch to) a chat with `partner_id`. Works for contacts
    /// with no message history yet; the directory then shows them with an
    /// empty preview until the first send.
    pub async fn open_chat(&self, partner_id: &str) -> Result<()> {
        let (Some(session), Some(directory)) = (&self.session, &self.directory) else {
            info!("[Client] open_chat while signed out, ignoring");
            return Ok(());
        };
        directory.include_partner(partner_id);
        session.open(partner_id).await
    }

    /// Message list of the open chat, `created_at` ascending.
    pub async fn messages(&self) -> Vec<MessageRow> {
        match &self.session {
            Some(session) => session.messages().await,
            None => Vec::new(),
        }
    }

    /// Replace the draft under composition.
    pub async fn set_draft(&self, text: &str) {
        self.composer.lock().await.set_draft(text);
    }

    /// Current draft text; the failed-send leftovers live here.
    pub async fn draft(&self) -> String {
        self.composer.lock().await.draft().to_string()
    }

    /// Submit the current draft into the open chat. The draft clears on
    /// submission and comes back if the backend rejects the write.
    pub async fn send_draft(&self) -> Result<MessageRow> {
        let Some(session) = &self.session else {
            anyhow::bail!("cannot send: no authenticated user");
        };
        self.composer.lock().await.send_draft(session).await
    }

    /// Send into the open chat. Refused while signed out. Routed through
    /// the composer, so on failure the text stays available as the draft.
    pub async fn send_message(&self, text: &str) -> Result<MessageRow> {
        self.set_draft(text).await;
        self.send_draft().await
    }

    /// Caller-supplied suspended/blocked account state.
    pub fn set_restricted(&self, restricted: bool) {
        if let Some(session) = &self.session {
            session.set_restricted(restricted);
        }
    }

    /// Erase the conversation with `partner_id` from this user's view.
    ///
    /// Destructive and irreversible for this user, hence the explicit
    /// confirmation flag. On full success the open session (if it is on
    /// this partner) is closed and the directory refreshed, so the partner
    /// disappears from the list.
    pub async fn delete_conversation(
        &self,
        partner_id: &str,
        confirmed: bool,
    ) -> Result<EraseReport> {
        if !confirmed {
            anyhow::bail!("conversation deletion requires explicit confirmation");
        }
        let (Some(user_id), Some(eraser)) = (&self.user_id, &self.eraser) else {
            anyhow::bail!("cannot delete conversation: no authenticated user");
        };
        let report = eraser.delete_conversation(user_id, partner_id).await?;

        if let Some(session) = &self.session {
            if session.partner_id().await.as_deref() == Some(partner_id) {
                session.close().await;
            }
        }
        if let Some(directory) = &self.directory {
            directory.remove_pin(partner_id);
            if let Err(e) = directory.refresh().await {
                warn!("[Client] directory refresh after erase failed: {e:#}");
            }
        }
        Ok(report)
    }

    /// Close the open chat, if any.
    pub async fn close_chat(&self) {
        if let Some(session) = &self.session {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::backend::memory::{Fault, MemoryBackend};
    use std::time::Duration;

    fn seeded_backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user("u1", "Ana", "ana");
        backend.add_user("u2", "Bruno", "bruno");
        backend.add_connection("u1", "u2");
        backend
    }

    #[tokio::test]
    async fn signed_out_client_is_a_silent_no_op() {
        let backend = seeded_backend();
        let mut client = ChatClient::with_backend(backend.clone());
        client.connect().await.unwrap();

        assert!(client.user_id().is_none());
        assert!(client.conversations().is_empty());
        assert!(client.refresh_conversations().await.unwrap().is_empty());
        assert!(client.contacts().is_empty());
        assert!(client.search_contacts("ana").is_empty());
        client.open_chat("u2").await.unwrap();
        assert!(client.messages().await.is_empty());
        assert!(client.send_message("hi").await.is_err());
        assert!(client.delete_conversation("u2", true).await.is_err());
        assert_eq!(backend.insert_calls(), 0);
    }

    #[tokio::test]
    async fn unconfirmed_deletion_is_refused() {
        let backend = seeded_backend();
        backend.sign_in_as(Some("u1"));
        let mut client = ChatClient::with_backend(backend.clone());
        client.connect().await.unwrap();

        assert!(client.delete_conversation("u2", false).await.is_err());
    }

    #[tokio::test]
    async fn failed_send_keeps_the_text_as_draft() {
        let backend = seeded_backend();
        backend.sign_in_as(Some("u1"));
        let mut client = ChatClient::with_backend(backend.clone());
        client.connect().await.unwrap();
        client.open_chat("u2").await.unwrap();

        backend.inject_fault(Fault::Insert);
        assert!(client.send_message("precious text").await.is_err());
        assert_eq!(client.draft().await, "precious text");

        // Retrying the restored draft succeeds and clears it.
        let sent = client.send_draft().await.unwrap();
        assert_eq!(sent.text, "precious text");
        assert_eq!(client.draft().await, "");
    }

    #[tokio::test]
    async fn first_contact_to_one_sided_erase_end_to_end() {
        let backend = seeded_backend();

        backend.sign_in_as(Some("u1"));
        let mut u1 = ChatClient::with_backend(backend.clone());
        u1.connect().await.unwrap();

        backend.sign_in_as(Some("u2"));
        let mut u2 = ChatClient::with_backend(backend.clone());
        u2.connect().await.unwrap();

        // u1 finds u2 in search despite having no message history.
        u1.refresh_contacts().await.unwrap();
        let hits = u1.search_contacts("bru");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "u2");

        u1.open_chat("u2").await.unwrap();
        u1.send_message("Oi!").await.unwrap();

        let mine = u1.refresh_conversations().await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user.id, "u2");
        assert_eq!(mine[0].preview.as_ref().unwrap().text, "Oi!");

        let theirs = u2.refresh_conversations().await.unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].user.id, "u1");
        assert_eq!(theirs[0].preview.as_ref().unwrap().text, "Oi!");

        // One-sided erase: u1's list empties, session closes, u2 keeps the
        // conversation.
        u1.delete_conversation("u2", true).await.unwrap();
        assert!(u1.conversations().is_empty());
        assert!(u1.messages().await.is_empty());

        let theirs = u2.refresh_conversations().await.unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].preview.as_ref().unwrap().text, "Oi!");

        // Give the spawned initial refresh tasks time to settle so they
        // cannot outlive the backend assertions above.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
