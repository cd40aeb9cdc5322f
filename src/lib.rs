/// Credential hashing and verification.
pub mod auth;
/// Client-side API: connection, correlation table, request methods.
pub mod client;
/// Broker configuration loading.
pub mod config;
/// Common error types: decoding, client operations, admission.
pub mod error;
/// Structured logging initialization.
pub mod logging;
/// Network stack: framing, sessions and the Tokio-based broker server.
pub mod network;
/// Binary packet schema and payload coding.
pub mod protocol;
/// Queue engine: FIFO buffers, waiters, byte-budget admission.
pub mod queue;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Credential storage with hashed secrets.
pub use auth::Credentials;
/// Client API.
pub use client::{ClientConfig, MessageQueueClient};
/// config
pub use config::Settings;
/// Operation errors.
pub use error::{ClientError, DecodeError, PopError, PushError, QueueFull};
/// Broker server and its tuning knobs.
pub use network::{MessageQueueServer, ServerConfig};
/// Wire-level packet schema.
pub use protocol::{DeclineReason, Packet, PushFailure};
/// Queue storage.
pub use queue::{ByteBudget, MessageQueue, QueueStorage};
