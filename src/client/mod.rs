pub mod connection;
pub mod core;
pub mod pending;

pub use self::core::{ClientConfig, MessageQueueClient};
