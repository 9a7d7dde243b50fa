pub mod composer;
pub mod listener;
pub mod service;

pub use composer::MessageComposer;
pub use listener::{EmptyMessageListener, MessageListener};
pub use service::{ChatSession, SessionStatus};
