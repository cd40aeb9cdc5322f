//! Обработка одного клиентского соединения.
//!
//! Чтение кадров и диспетчеризация пакетов идут последовательно в
//! задаче соединения: пока Connect не разрешился, следующие пакеты
//! этого клиента не обрабатываются. Исходящие пакеты уходят через
//! канал сессии в отдельную пишущую задачу, поэтому прямая доставка
//! из чужого push никогда не пишет в сокет из чужой задачи.

use std::{io::ErrorKind, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
    sync::mpsc,
    time::sleep,
};
use tracing::{debug, info, trace, warn};

use super::{
    server::MessageQueueServer,
    session::{SessionHandle, SessionState},
};
use crate::protocol::{frame, DeclineReason, Packet, PushFailure};

/// Что делать с соединением после обработки пакета.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Обработчик одного соединения.
pub(crate) struct ConnectionHandler {
    session: SessionHandle,
    state: SessionState,
    addr: SocketAddr,
    decode_errors: usize,
}

impl ConnectionHandler {
    /// Основной цикл: кадр → пакет → диспетчеризация.
    pub(crate) async fn run(
        server: &MessageQueueServer,
        socket: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::with_capacity(8192, read_half);

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let session = server.sessions().register(outbound_tx);
        let session_id = session.id();

        // Пишущая задача: живёт, пока жив хоть один клон канала
        // сессии, затем закрывает свою половину сокета.
        let writer_task = tokio::spawn(async move {
            while let Some(packet) = outbound_rx.recv().await {
                if let Err(e) = frame::write_packet(&mut write_half, &packet).await {
                    trace!("Write failed: {e}");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let mut handler = ConnectionHandler {
            session,
            state: SessionState::Unauthenticated,
            addr,
            decode_errors: 0,
        };

        let result = handler.read_loop(server, &mut reader).await;
        handler.state = SessionState::Closed;

        // Чистка: сессия выбывает из реестра, её ожидающие
        // pop-запросы — из всех очередей, молча.
        server.sessions().unregister(session_id);
        server.storage().remove_session(session_id);

        // Локальный handle — последний клон канала: его drop
        // завершает пишущую задачу.
        drop(handler);
        let _ = writer_task.await;

        result
    }

    async fn read_loop(
        &mut self,
        server: &MessageQueueServer,
        reader: &mut (impl tokio::io::AsyncRead + Unpin),
    ) -> Result<()> {
        loop {
            select! {
                _ = server.shutdown_notified() => {
                    info!("Session {} ({}): received shutdown signal", self.session.id(), self.addr);
                    return Ok(());
                }

                frame = frame::read_frame(reader) => {
                    match frame {
                        Ok(Some(body)) => {
                            match Packet::decode(&body) {
                                Ok(packet) => {
                                    trace!("Session {} ({}): received {:?}", self.session.id(), self.addr, packet);
                                    if self.dispatch(server, packet).await == Flow::Close {
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    warn!("Session {} ({}): dropping malformed frame: {}", self.session.id(), self.addr, e);
                                    server.sessions().record_decode_error();
                                    self.decode_errors += 1;
                                    if self.decode_errors >= server.config().max_decode_errors {
                                        warn!("Session {} ({}): too many malformed frames, closing", self.session.id(), self.addr);
                                        return Ok(());
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            debug!("Session {} ({}): client closed connection", self.session.id(), self.addr);
                            return Ok(());
                        }
                        Err(e) if is_recoverable(&e) => {
                            debug!("Session {} ({}): connection dropped: {}", self.session.id(), self.addr, e);
                            return Ok(());
                        }
                        Err(e) => {
                            return Err(e).context("Fatal read error");
                        }
                    }
                }
            }
        }
    }

    /// Машина состояний соединения (§ аутентификация и маршрутизация).
    async fn dispatch(
        &mut self,
        server: &MessageQueueServer,
        packet: Packet,
    ) -> Flow {
        match packet {
            Packet::Connect { username, password } => self.handle_connect(server, username, password).await,

            Packet::Disconnect => {
                debug!("Session {} ({}): client requested disconnect", self.session.id(), self.addr);
                Flow::Close
            }

            Packet::Push { queue, payload } => {
                if self.state != SessionState::Authenticated {
                    // молчание: до аутентификации нельзя ни писать в
                    // очереди, ни прощупывать их существование
                    debug!("Session {} ({}): ignoring pre-auth push", self.session.id(), self.addr);
                    return Flow::Continue;
                }
                if server.storage().push(&queue, payload).is_err() {
                    debug!(queue = %queue, "best-effort push dropped: queue full");
                }
                Flow::Continue
            }

            Packet::ReliablePush { queue, payload, id } => {
                if self.state != SessionState::Authenticated {
                    debug!("Session {} ({}): ignoring pre-auth reliable push", self.session.id(), self.addr);
                    return Flow::Continue;
                }
                let error = match server.storage().push(&queue, payload) {
                    Ok(()) => None,
                    Err(_) => Some(PushFailure::QueueFull),
                };
                self.session.send(Packet::PushConfirmation { id, error });
                Flow::Continue
            }

            Packet::PopRequest { queue, id, timeout } => {
                if self.state != SessionState::Authenticated {
                    // неаутентифицированный pop получает отказ сразу,
                    // чтобы вызывающий никогда не ждал
                    self.session.send(Packet::PopResponse {
                        queue,
                        id,
                        payload: bytes::Bytes::new(),
                        failed: true,
                    });
                    return Flow::Continue;
                }
                let timeout = timeout
                    .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
                    .map(Duration::from_secs_f64);
                server.storage().pop(&queue, self.session.clone(), id, timeout);
                Flow::Continue
            }

            // серверные пакеты во входящем направлении игнорируются
            Packet::ConnectionAccepted
            | Packet::ConnectionDeclined(_)
            | Packet::PushConfirmation { .. }
            | Packet::PopResponse { .. }
            | Packet::PopExpired { .. } => Flow::Continue,
        }
    }

    async fn handle_connect(
        &mut self,
        server: &MessageQueueServer,
        username: String,
        password: String,
    ) -> Flow {
        if self.state == SessionState::Authenticated {
            // повторный Connect — идемпотентное подтверждение
            self.session.send(Packet::ConnectionAccepted);
            return Flow::Continue;
        }

        let declined = match server.credentials().verify(username, password).await {
            Ok(true) => {
                self.state = SessionState::Authenticated;
                info!("Session {} ({}): authenticated", self.session.id(), self.addr);
                self.session.send(Packet::ConnectionAccepted);
                return Flow::Continue;
            }
            Ok(false) => DeclineReason::WrongCredentials,
            Err(e) => {
                warn!("Session {} ({}): credential verification failed: {}", self.session.id(), self.addr, e);
                DeclineReason::Unknown
            }
        };

        info!("Session {} ({}): authentication declined: {}", self.session.id(), self.addr, declined);
        self.session.send(Packet::ConnectionDeclined(declined));
        // пауза, чтобы пишущая задача успела выгрузить отказ до
        // закрытия сокета
        sleep(server.config().decline_grace).await;
        Flow::Close
    }
}

fn is_recoverable(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
    )
}
