pub mod engine;
pub mod registry;

pub use engine::MessageQueue;
pub use registry::{ByteBudget, QueueStorage};
