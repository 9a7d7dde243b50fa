pub mod service;

pub use service::ContactBook;
