//! Draft handling for the message composer.
//!
//! The draft is cleared the moment a send is attempted (optimistic UX) and
//! restored if the backend rejects the write, so a failed send never
//! silently loses the user's text.

use crate::chat::backend::entities::MessageRow;
use crate::chat::session::service::ChatSession;
use anyhow::Result;

#[derive(Default)]
pub struct MessageComposer {
    draft: String,
}

impl MessageComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_draft(&mut self, text: &str) {
        self.draft = text.to_string();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Submit the current draft through the session.
    ///
    /// Whitespace-only drafts are rejected up front and left untouched.
    /// Otherwise the draft is taken immediately and put back on failure.
    pub async fn send_draft(&mut self, session: &ChatSession) -> Result<MessageRow> {
        if self.draft.trim().is_empty() {
            anyhow::bail!("nothing to send");
        }
        let draft = std::mem::take(&mut self.draft);
        match session.send(&draft).await {
            Ok(row) => Ok(row),
            Err(e) => {
                self.draft = draft;
                Err(e)
            }
        }
    }
}
