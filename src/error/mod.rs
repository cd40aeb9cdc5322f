pub mod client;
pub mod decode;
pub mod queue;

pub use client::{ClientError, PopError, PushError};
pub use decode::DecodeError;
pub use queue::QueueFull;
