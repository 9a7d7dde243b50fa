pub mod auth;
pub mod backend;
pub mod client;
pub mod contacts;
pub mod directory;
pub mod eraser;
pub mod session;
pub mod types;

pub use auth::sign_in;
pub use client::{ChatClient, ClientConfig};
pub use directory::{ConversationEntry, DirectoryListener};
pub use session::{MessageComposer, MessageListener, SessionStatus};
