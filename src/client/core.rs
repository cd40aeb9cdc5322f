//! Клиент брокера очередей.
//!
//! Высокоуровневый интерфейс: connect/push/reliable_push/pop/
//! disconnect. Каждый асинхронный запрос получает 64-битный id
//! (случайный старт, монотонный инкремент с переполнением) и висит
//! в корреляционной таблице до первого разрешения.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};
use tracing::{debug, info};

use super::{
    connection::{connect, spawn_io_tasks, Outbound},
    pending::PendingTable,
};
use crate::{
    error::{ClientError, PopError, PushError},
    protocol::Packet,
};

/// Конфигурация клиента.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Таймаут установления соединения и ожидания ответа на Connect
    pub connect_timeout: Duration,
    /// Пауза перед закрытием сокета при disconnect, чтобы успел
    /// уйти прощальный пакет
    pub flush_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            flush_delay: Duration::from_millis(10),
        }
    }
}

/// Клиент брокера очередей сообщений.
pub struct MessageQueueClient {
    shared: Arc<ClientShared>,
    flush_delay: Duration,
}

/// Состояние, разделяемое с задачами транспорта.
pub(crate) struct ClientShared {
    pending: PendingTable,
    connect_waiter: Mutex<Option<oneshot::Sender<Result<(), ClientError>>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    disconnected: AtomicBool,
    next_id: AtomicU64,
}

impl MessageQueueClient {
    /// Подключается и аутентифицируется.
    ///
    /// Приостанавливается до `ConnectionAccepted` / `ConnectionDeclined`;
    /// обрыв транспорта без ответа — это `ConnectionClosed`.
    pub async fn connect(
        addr: SocketAddr,
        username: &str,
        password: &str,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let stream = connect(addr, config.connect_timeout).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let shared = Arc::new(ClientShared {
            pending: PendingTable::new(),
            connect_waiter: Mutex::new(Some(accepted_tx)),
            outbound: outbound_tx,
            disconnected: AtomicBool::new(false),
            next_id: AtomicU64::new(fastrand::u64(..)),
        });
        spawn_io_tasks(stream, shared.clone(), outbound_rx);

        shared.send(Packet::Connect {
            username: username.to_string(),
            password: password.to_string(),
        })?;

        match timeout(config.connect_timeout, accepted_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => return Err(ClientError::ConnectionTimeout),
        }

        info!("Connected to message queue broker at {addr}");
        Ok(Self {
            shared,
            flush_delay: config.flush_delay,
        })
    }

    /// Push без подтверждения: fire-and-forget.
    ///
    /// Единственная возможная ошибка — локальная: клиент уже
    /// отключён. Ответа от брокера не бывает.
    pub fn push(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        if self.shared.is_disconnected() {
            return Err(ClientError::Disconnected);
        }
        self.shared.send(Packet::Push {
            queue: queue.to_string(),
            payload: payload.into(),
        })
    }

    /// Push с подтверждением брокера.
    ///
    /// Локальный таймер и подтверждение соревнуются; побеждает ровно
    /// один. Опоздавшее подтверждение находит пустой слот таблицы.
    pub async fn reliable_push(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
        confirmation_timeout: Duration,
    ) -> Result<(), PushError> {
        if self.shared.is_disconnected() {
            return Err(PushError::Disconnected);
        }

        let id = self.shared.next_id();
        let confirmation = self.shared.pending.insert_push(id);
        let sent = self.shared.send(Packet::ReliablePush {
            queue: queue.to_string(),
            payload: payload.into(),
            id,
        });
        if sent.is_err() {
            self.shared.pending.discard(id);
            return Err(PushError::Disconnected);
        }

        match timeout(confirmation_timeout, confirmation).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PushError::Disconnected),
            Err(_) => {
                self.shared.pending.discard(id);
                Err(PushError::TimedOut)
            }
        }
    }

    /// Запрашивает старейшее сообщение очереди.
    ///
    /// Таймаут уходит брокеру тем же запросом; локального таймера
    /// нет — запрос разрешит `PopResponse`, `PopExpired` или
    /// teardown.
    pub async fn pop(
        &self,
        queue: &str,
        pop_timeout: Option<Duration>,
    ) -> Result<Bytes, PopError> {
        if self.shared.is_disconnected() {
            return Err(PopError::Disconnected);
        }

        let id = self.shared.next_id();
        let response = self.shared.pending.insert_pop(id);
        let sent = self.shared.send(Packet::PopRequest {
            queue: queue.to_string(),
            id,
            timeout: pop_timeout.map(|t| t.as_secs_f64()),
        });
        if sent.is_err() {
            self.shared.pending.discard(id);
            return Err(PopError::Disconnected);
        }

        match response.await {
            Ok(result) => result,
            Err(_) => Err(PopError::Disconnected),
        }
    }

    /// Отключается от брокера.
    ///
    /// Шлёт `Disconnect`, даёт пишущей задаче выгрузить его, закрывает
    /// транспорт и разрешает все незавершённые запросы исходом
    /// «отключён».
    pub async fn disconnect(&self) {
        if self.shared.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Disconnecting from message queue broker");
        let _ = self.shared.outbound.send(Outbound::Packet(Packet::Disconnect));
        sleep(self.flush_delay).await;
        let _ = self.shared.outbound.send(Outbound::Close);
        self.shared.pending.fail_all();
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.is_disconnected()
    }

    /// Незавершённых запросов в корреляционной таблице.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }
}

impl ClientShared {
    fn send(
        &self,
        packet: Packet,
    ) -> Result<(), ClientError> {
        self.outbound
            .send(Outbound::Packet(packet))
            .map_err(|_| ClientError::Disconnected)
    }

    fn next_id(&self) -> u64 {
        // монотонный с переполнением; случайный старт делает
        // коллизию через wraparound практически невозможной при
        // малом числе одновременных запросов
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn resolve_connect(
        &self,
        result: Result<(), ClientError>,
    ) {
        if let Some(waiter) = self.connect_waiter.lock().take() {
            let _ = waiter.send(result);
        }
    }

    /// Входящий пакет от брокера.
    pub(crate) fn handle_packet(
        &self,
        packet: Packet,
    ) {
        match packet {
            Packet::ConnectionAccepted => self.resolve_connect(Ok(())),
            Packet::ConnectionDeclined(reason) => {
                self.resolve_connect(Err(ClientError::AuthenticationFailed { reason }))
            }
            Packet::Disconnect => {
                self.disconnected.store(true, Ordering::SeqCst);
                self.pending.fail_all();
            }
            Packet::PopResponse {
                id,
                payload,
                failed,
                ..
            } => self.pending.resolve_pop_response(id, payload, failed),
            Packet::PopExpired { id, .. } => self.pending.resolve_expired(id),
            Packet::PushConfirmation { id, error } => self.pending.resolve_confirmation(id, error),
            // клиентские пакеты во входящем направлении игнорируются
            Packet::Connect { .. } | Packet::Push { .. } | Packet::ReliablePush { .. } | Packet::PopRequest { .. } => {}
        }
    }

    /// Транспорт оборвался: больше ответов не будет.
    pub(crate) fn connection_lost(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.resolve_connect(Err(ClientError::ConnectionClosed));
        self.pending.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DeclineReason;

    fn shared() -> (Arc<ClientShared>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ClientShared {
            pending: PendingTable::new(),
            connect_waiter: Mutex::new(None),
            outbound: tx,
            disconnected: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        });
        (shared, rx)
    }

    /// Тест проверяет, что `ConnectionAccepted` разрешает ожидание
    /// подключения успехом, а `ConnectionDeclined` — ошибкой
    /// аутентификации.
    #[tokio::test]
    async fn test_connect_waiter_resolution() {
        let (shared, _rx) = shared();
        let (tx, waiter) = oneshot::channel();
        *shared.connect_waiter.lock() = Some(tx);

        shared.handle_packet(Packet::ConnectionAccepted);
        assert!(matches!(waiter.await, Ok(Ok(()))));

        let (tx, waiter) = oneshot::channel();
        *shared.connect_waiter.lock() = Some(tx);
        shared.handle_packet(Packet::ConnectionDeclined(DeclineReason::WrongCredentials));
        assert!(matches!(
            waiter.await,
            Ok(Err(ClientError::AuthenticationFailed {
                reason: DeclineReason::WrongCredentials,
            }))
        ));
    }

    /// Тест проверяет, что ответы брокера находят свои ожидающие
    /// запросы по id и разрешают их нужным исходом.
    #[tokio::test]
    async fn test_pending_resolution_by_id() {
        let (shared, _rx) = shared();

        let pop = shared.pending.insert_pop(1);
        shared.handle_packet(Packet::PopResponse {
            queue: "orders".into(),
            id: 1,
            payload: Bytes::from_static(b"msg"),
            failed: false,
        });
        assert_eq!(pop.await.unwrap().unwrap(), Bytes::from_static(b"msg"));

        let expired = shared.pending.insert_pop(2);
        shared.handle_packet(Packet::PopExpired {
            queue: "orders".into(),
            id: 2,
        });
        assert!(matches!(expired.await.unwrap(), Err(PopError::TimedOut)));

        let push = shared.pending.insert_push(3);
        shared.handle_packet(Packet::PushConfirmation { id: 3, error: None });
        assert!(push.await.unwrap().is_ok());
    }

    /// Тест проверяет, что обрыв транспорта помечает клиента
    /// отключённым и разрешает все незавершённые запросы.
    #[tokio::test]
    async fn test_connection_lost_fails_pending() {
        let (shared, _rx) = shared();
        let pop = shared.pending.insert_pop(7);
        let push = shared.pending.insert_push(8);

        shared.connection_lost();

        assert!(shared.is_disconnected());
        assert!(matches!(pop.await.unwrap(), Err(PopError::Disconnected)));
        assert!(matches!(push.await.unwrap(), Err(PushError::Disconnected)));
        assert_eq!(shared.pending.len(), 0);
    }

    /// Тест проверяет, что пакеты клиентского направления во входящем
    /// потоке игнорируются без паники.
    #[tokio::test]
    async fn test_client_direction_packets_ignored() {
        let (shared, _rx) = shared();
        shared.handle_packet(Packet::Push {
            queue: "q".into(),
            payload: Bytes::new(),
        });
        shared.handle_packet(Packet::Connect {
            username: "u".into(),
            password: "p".into(),
        });
        assert!(!shared.is_disconnected());
    }
}
