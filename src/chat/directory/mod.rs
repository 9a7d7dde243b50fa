pub mod listener;
pub mod models;
pub mod service;

pub use listener::{DirectoryListener, EmptyDirectoryListener};
pub use models::ConversationEntry;
pub use service::ConversationDirectory;
