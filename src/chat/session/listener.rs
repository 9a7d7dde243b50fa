//! Chat session callbacks.

use crate::chat::backend::entities::MessageRow;
use async_trait::async_trait;

/// Callback interface for session lifecycle and message traffic.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// A session reached the active state for this partner.
    async fn on_session_opened(&self, partner_id: String);

    /// A message for the open pair arrived over the realtime channel.
    async fn on_message_received(&self, message: MessageRow);

    /// An outgoing message was confirmed by the backend.
    async fn on_message_sent(&self, message: MessageRow);

    /// The session for this partner was torn down.
    async fn on_session_closed(&self, partner_id: String);

    /// Live-update availability changed; `false` means the session runs in
    /// degraded (non-live) mode.
    async fn on_realtime_status_changed(&self, connected: bool, detail: String);
}

/// Default no-op listener.
pub struct EmptyMessageListener;

#[async_trait]
impl MessageListener for EmptyMessageListener {
    async fn on_session_opened(&self, _partner_id: String) {}
    async fn on_message_received(&self, _message: MessageRow) {}
    async fn on_message_sent(&self, _message: MessageRow) {}
    async fn on_session_closed(&self, _partner_id: String) {}
    async fn on_realtime_status_changed(&self, _connected: bool, _detail: String) {}
}
