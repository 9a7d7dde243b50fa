pub mod chat;

pub use chat::{
    backend::entities::{MessageRow, ProfileRow},
    backend::DataBackend,
    client::{ChatClient, ClientConfig},
    sign_in,
};
