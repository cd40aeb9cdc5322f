use thiserror::Error;

use crate::protocol::DeclineReason;

/// Ошибки клиентского соединения с брокером.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection closed by broker")]
    ConnectionClosed,

    #[error("Authentication declined: {reason}")]
    AuthenticationFailed { reason: DeclineReason },

    #[error("Client is disconnected")]
    Disconnected,
}

/// Исход неудачного pop-запроса.
///
/// Таймаут — отдельный исход, он никогда не смешивается с отказом
/// брокера или обрывом соединения.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PopError {
    #[error("Pop request timed out")]
    TimedOut,

    #[error("Pop request rejected by broker")]
    Failed,

    #[error("Disconnected before a response arrived")]
    Disconnected,
}

/// Исход неудачного подтверждаемого push.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("Queue is full")]
    QueueFull,

    #[error("No confirmation within the timeout")]
    TimedOut,

    #[error("Disconnected before a confirmation arrived")]
    Disconnected,

    #[error("Broker reported an unknown push failure")]
    Unknown,
}
