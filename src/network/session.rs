use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::Packet;

/// Состояние сессии в её жизненном цикле.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Соединение установлено, Connect ещё не подтверждён
    Unauthenticated,
    /// Учётные данные проверены
    Authenticated,
    /// Соединение закрывается
    Closed,
}

/// Лёгкая ссылка на сессию: идентификатор плюс исходящий канал.
///
/// Именно такие значения лежат в списках ожидающих pop-запросов —
/// никаких указателей на соединение, только `(id, канал)`. После
/// дисконнекта записи инвалидируются явно через `remove_waiters`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    outbound: mpsc::UnboundedSender<Packet>,
}

/// Реестр активных сессий брокера.
///
/// Потокобезопасное хранилище, используется для рассылки при
/// остановке и для статистики.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<u64, SessionHandle>,
    id_counter: AtomicU64,
    decode_errors: AtomicUsize,
}

impl SessionHandle {
    pub fn new(
        id: u64,
        outbound: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ставит пакет в исходящую очередь сессии.
    ///
    /// Отказ (приёмник уже закрыт) молча игнорируется: адресат
    /// отключился, ответить ему больше нечем.
    pub fn send(
        &self,
        packet: Packet,
    ) {
        let _ = self.outbound.send(packet);
    }

    /// Уведомляет клиента об истечении его pop-запроса.
    pub fn expire(
        &self,
        queue: &str,
        id: u64,
    ) {
        self.send(Packet::PopExpired {
            queue: queue.to_string(),
            id,
        });
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует новую сессию и возвращает её handle.
    pub fn register(
        &self,
        outbound: mpsc::UnboundedSender<Packet>,
    ) -> SessionHandle {
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = SessionHandle::new(id, outbound);
        self.sessions.insert(id, handle.clone());
        handle
    }

    /// Удаляет сессию из реестра. Отсутствующий id — no-op.
    pub fn unregister(
        &self,
        session_id: u64,
    ) {
        self.sessions.remove(&session_id);
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_errors(&self) -> usize {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет регистрацию, уникальность id и удаление.
    #[test]
    fn test_register_unregister() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let a = registry.register(tx.clone());
        let b = registry.register(tx);
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.active_count(), 2);

        registry.unregister(a.id());
        assert_eq!(registry.active_count(), 1);
        // повторное удаление — no-op
        registry.unregister(a.id());
        assert_eq!(registry.active_count(), 1);
    }

    /// Тест проверяет, что send в закрытую сессию не падает.
    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(1, tx);
        drop(rx);
        handle.send(Packet::Disconnect);
        handle.expire("jobs", 9);
    }

    /// Тест проверяет доставку пакета через handle.
    #[tokio::test]
    async fn test_send_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(1, tx);
        handle.expire("jobs", 5);
        assert_eq!(
            rx.recv().await,
            Some(Packet::PopExpired {
                queue: "jobs".into(),
                id: 5
            })
        );
    }
}
