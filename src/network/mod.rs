pub mod connection;
pub mod server;
pub mod session;

pub use server::{MessageQueueServer, ServerConfig};
pub use session::{SessionHandle, SessionRegistry, SessionState};
