//! Схема пакетов протокола.
//!
//! Закрытый набор вариантов [`Packet`], общий для клиента и брокера.
//! Каждый пакет кодируется однобайтовым тегом, за которым идут поля,
//! и целиком помещается в один кадр транспорта с префиксом длины.

use bytes::Bytes;

use super::codec::{PayloadReader, PayloadWriter};
use crate::error::DecodeError;

pub const TAG_CONNECT: u8 = 0;
pub const TAG_CONNECTION_ACCEPTED: u8 = 1;
pub const TAG_CONNECTION_DECLINED: u8 = 2;
pub const TAG_DISCONNECT: u8 = 3;
pub const TAG_PUSH: u8 = 4;
pub const TAG_POP_REQUEST: u8 = 5;
pub const TAG_POP_RESPONSE: u8 = 6;
pub const TAG_POP_EXPIRED: u8 = 7;
pub const TAG_RELIABLE_PUSH: u8 = 8;
pub const TAG_PUSH_CONFIRMATION: u8 = 9;

/// Причина отклонения аутентификации.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    WrongCredentials,
    Unknown,
}

/// Причина отказа подтверждаемого push со стороны брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailure {
    QueueFull,
    Unknown,
}

/// Сообщение протокола.
///
/// Payload внутри `PopResponse` кодируется только при `failed == false`:
/// для неуспешного ответа на проводе нет пустого массива байт.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect {
        username: String,
        password: String,
    },
    ConnectionAccepted,
    ConnectionDeclined(DeclineReason),
    Disconnect,
    Push {
        queue: String,
        payload: Bytes,
    },
    ReliablePush {
        queue: String,
        payload: Bytes,
        id: u64,
    },
    PushConfirmation {
        id: u64,
        error: Option<PushFailure>,
    },
    PopRequest {
        queue: String,
        id: u64,
        timeout: Option<f64>,
    },
    PopResponse {
        queue: String,
        id: u64,
        payload: Bytes,
        failed: bool,
    },
    PopExpired {
        queue: String,
        id: u64,
    },
}

impl Packet {
    /// Кодирует пакет в тело одного кадра.
    pub fn encode(&self) -> Bytes {
        let mut w = match self {
            Packet::Push { payload, queue } | Packet::ReliablePush { payload, queue, .. } => {
                PayloadWriter::with_capacity(payload.len() + queue.len() + 32)
            }
            Packet::PopResponse { payload, queue, .. } => {
                PayloadWriter::with_capacity(payload.len() + queue.len() + 32)
            }
            _ => PayloadWriter::new(),
        };

        match self {
            Packet::Connect { username, password } => {
                w.put_u8(TAG_CONNECT);
                w.put_str(username);
                w.put_str(password);
            }
            Packet::ConnectionAccepted => w.put_u8(TAG_CONNECTION_ACCEPTED),
            Packet::ConnectionDeclined(reason) => {
                w.put_u8(TAG_CONNECTION_DECLINED);
                w.put_u8(match reason {
                    DeclineReason::WrongCredentials => 0,
                    DeclineReason::Unknown => 1,
                });
            }
            Packet::Disconnect => w.put_u8(TAG_DISCONNECT),
            Packet::Push { queue, payload } => {
                w.put_u8(TAG_PUSH);
                w.put_str(queue);
                w.put_bytes(payload);
            }
            Packet::ReliablePush { queue, payload, id } => {
                w.put_u8(TAG_RELIABLE_PUSH);
                w.put_str(queue);
                w.put_bytes(payload);
                w.put_u64(*id);
            }
            Packet::PushConfirmation { id, error } => {
                w.put_u8(TAG_PUSH_CONFIRMATION);
                w.put_u64(*id);
                match error {
                    Some(failure) => {
                        w.put_bool(true);
                        w.put_u8(match failure {
                            PushFailure::QueueFull => 0,
                            PushFailure::Unknown => 1,
                        });
                    }
                    None => w.put_bool(false),
                }
            }
            Packet::PopRequest { queue, id, timeout } => {
                w.put_u8(TAG_POP_REQUEST);
                w.put_str(queue);
                w.put_u64(*id);
                match timeout {
                    Some(seconds) => {
                        w.put_bool(true);
                        w.put_f64(*seconds);
                    }
                    None => w.put_bool(false),
                }
            }
            Packet::PopResponse {
                queue,
                id,
                payload,
                failed,
            } => {
                w.put_u8(TAG_POP_RESPONSE);
                w.put_str(queue);
                w.put_u64(*id);
                w.put_bool(*failed);
                if !failed {
                    w.put_bytes(payload);
                }
            }
            Packet::PopExpired { queue, id } => {
                w.put_u8(TAG_POP_EXPIRED);
                w.put_str(queue);
                w.put_u64(*id);
            }
        }

        w.into_bytes()
    }

    /// Декодирует тело одного кадра.
    ///
    /// Неизвестный тег или усечённое тело — ошибка только этого кадра.
    pub fn decode(frame: &[u8]) -> Result<Packet, DecodeError> {
        let mut r = PayloadReader::new(frame);
        let packet = match r.read_u8()? {
            TAG_CONNECT => Packet::Connect {
                username: r.read_string()?,
                password: r.read_string()?,
            },
            TAG_CONNECTION_ACCEPTED => Packet::ConnectionAccepted,
            TAG_CONNECTION_DECLINED => {
                let reason = match r.read_u8()? {
                    0 => DeclineReason::WrongCredentials,
                    _ => DeclineReason::Unknown,
                };
                Packet::ConnectionDeclined(reason)
            }
            TAG_DISCONNECT => Packet::Disconnect,
            TAG_PUSH => Packet::Push {
                queue: r.read_string()?,
                payload: r.read_bytes()?,
            },
            TAG_RELIABLE_PUSH => Packet::ReliablePush {
                queue: r.read_string()?,
                payload: r.read_bytes()?,
                id: r.read_u64()?,
            },
            TAG_PUSH_CONFIRMATION => {
                let id = r.read_u64()?;
                let error = if r.read_bool()? {
                    Some(match r.read_u8()? {
                        0 => PushFailure::QueueFull,
                        _ => PushFailure::Unknown,
                    })
                } else {
                    None
                };
                Packet::PushConfirmation { id, error }
            }
            TAG_POP_REQUEST => {
                let queue = r.read_string()?;
                let id = r.read_u64()?;
                let timeout = if r.read_bool()? {
                    Some(r.read_f64()?)
                } else {
                    None
                };
                Packet::PopRequest { queue, id, timeout }
            }
            TAG_POP_RESPONSE => {
                let queue = r.read_string()?;
                let id = r.read_u64()?;
                let failed = r.read_bool()?;
                let payload = if failed { Bytes::new() } else { r.read_bytes()? };
                Packet::PopResponse {
                    queue,
                    id,
                    payload,
                    failed,
                }
            }
            TAG_POP_EXPIRED => Packet::PopExpired {
                queue: r.read_string()?,
                id: r.read_u64()?,
            },
            tag => return Err(DecodeError::UnknownTag(tag)),
        };
        r.finish()?;
        Ok(packet)
    }
}

impl std::fmt::Display for DeclineReason {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::WrongCredentials => write!(f, "wrong credentials"),
            Self::Unknown => write!(f, "unknown error"),
        }
    }
}
