//! Сервер брокера очередей.
//!
//! Владеет хранилищем очередей, реестром сессий и учётными данными;
//! принимает соединения, запускает периодический sweep и умеет
//! останавливаться gracefully.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use tokio::{
    net::{TcpListener, ToSocketAddrs},
    select,
    sync::{Notify, Semaphore},
    time::{interval, Instant},
};
use tracing::{debug, error, info, warn};

use super::{connection::ConnectionHandler, session::SessionRegistry};
use crate::{
    auth::{Credentials, PasswordError},
    queue::QueueStorage,
};

/// Параметры сервера.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Максимальное количество одновременных соединений
    pub max_connections: usize,
    /// Общий байтовый бюджет всех очередей (None — без лимита)
    pub max_total_bytes: Option<usize>,
    /// Байтовый лимит одной очереди (None — без лимита)
    pub max_queue_bytes: Option<usize>,
    /// Интервал sweep-прохода по протухшим pop-запросам
    pub sweep_interval: Duration,
    /// Пауза между отказом в аутентификации и закрытием сокета
    pub decline_grace: Duration,
    /// Сколько битых кадров терпеть до закрытия соединения
    pub max_decode_errors: usize,
}

/// Брокер очередей сообщений.
pub struct MessageQueueServer {
    storage: Arc<QueueStorage>,
    sessions: Arc<SessionRegistry>,
    credentials: Credentials,
    config: ServerConfig,
    connection_semaphore: Arc<Semaphore>,
    shutdown_signal: Arc<Notify>,
    shutting_down: AtomicBool,
}

impl MessageQueueServer {
    /// Создаёт брокер, хешируя пару учётных данных.
    ///
    /// Открытые логин и пароль после этого вызова нигде не хранятся.
    pub fn new(
        username: &str,
        password: &str,
        config: ServerConfig,
    ) -> Result<Self, PasswordError> {
        Ok(Self {
            storage: Arc::new(QueueStorage::new(
                config.max_total_bytes,
                config.max_queue_bytes,
            )),
            sessions: Arc::new(SessionRegistry::new()),
            credentials: Credentials::new(username, password)?,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config,
            shutdown_signal: Arc::new(Notify::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Слушает адрес (IPv4 или IPv6) и обслуживает соединения до
    /// вызова [`shutdown`](Self::shutdown).
    pub async fn run(
        self: Arc<Self>,
        addr: impl ToSocketAddrs,
    ) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind listener")?;
        self.serve(listener).await
    }

    /// Обслуживает уже связанный listener. Удобно для тестов:
    /// порт 0 + `listener.local_addr()`.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
    ) -> Result<()> {
        let addr = listener.local_addr().context("No local address")?;
        info!("Message queue broker listening on {addr}");

        self.clone().spawn_sweep_task();

        loop {
            select! {
                _ = self.shutdown_signal.notified() => break,

                accepted = listener.accept() => {
                    let (socket, peer) = accepted.context("Accept failed")?;
                    if self.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }

                    let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Connection limit reached, rejecting {peer}");
                            continue;
                        }
                    };

                    let server = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        debug!("Connection established from {peer}");
                        if let Err(e) = ConnectionHandler::run(&server, socket, peer).await {
                            error!("Connection from {peer} closed with error: {e:#}");
                        } else {
                            debug!("Connection from {peer} closed");
                        }
                    });
                }
            }
        }

        info!("Broker on {addr} stopped accepting connections");
        Ok(())
    }

    /// Инициирует graceful shutdown: приём прекращается, активные
    /// соединения получают сигнал и закрываются.
    pub fn shutdown(&self) {
        info!("Initiating broker shutdown");
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown_signal.notify_waiters();
    }

    /// Ждёт завершения всех активных сессий.
    pub async fn wait_for_shutdown(
        &self,
        timeout: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        while self.sessions.active_count() > 0 {
            if start.elapsed() > timeout {
                return Err(anyhow!(
                    "Shutdown timeout exceeded with {} active sessions",
                    self.sessions.active_count()
                ));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("All sessions closed gracefully");
        Ok(())
    }

    /// Периодический sweep: ограничивает запаздывание таймаутов
    /// pop-запросов даже в очередях без push-трафика.
    fn spawn_sweep_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.sweep_interval);
            loop {
                select! {
                    _ = self.shutdown_signal.notified() => break,
                    _ = ticker.tick() => {
                        if self.shutting_down.load(Ordering::SeqCst) {
                            break;
                        }
                        self.storage.sweep();
                    }
                }
            }
        });
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.active_count()
    }

    /// Буферизованные байты всех очередей.
    pub fn used_bytes(&self) -> usize {
        self.storage.used_bytes()
    }

    pub(crate) fn storage(&self) -> &QueueStorage {
        &self.storage
    }

    pub(crate) fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub(crate) fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) async fn shutdown_notified(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown_signal.notified().await
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_total_bytes: None,
            max_queue_bytes: None,
            sweep_interval: Duration::from_secs(1),
            decline_grace: Duration::from_millis(50),
            max_decode_errors: 8,
        }
    }
}
