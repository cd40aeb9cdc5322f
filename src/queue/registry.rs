//! Реестр очередей и общий байтовый бюджет.
//!
//! Очередь создаётся лениво при первом push или pop на незнакомое
//! имя; гонка конкурентного первого доступа разрешается внутри
//! `DashMap::entry` — движок для имени создаётся ровно один раз,
//! проигравший работает с победившим экземпляром. Созданные очереди
//! живут до остановки брокера.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use super::engine::MessageQueue;
use crate::{error::QueueFull, network::session::SessionHandle};

/// Атомарный байтовый бюджет.
///
/// `try_reserve` — CAS-цикл: конкурентные push разных очередей не
/// сериализуют друг друга, но совместно перешагнуть лимит не могут.
#[derive(Debug)]
pub struct ByteBudget {
    cap: usize,
    used: AtomicUsize,
}

/// Хранилище очередей брокера: имя → движок.
#[derive(Debug)]
pub struct QueueStorage {
    queues: DashMap<Arc<str>, Arc<MessageQueue>>,
    budget: Arc<ByteBudget>,
    max_queue_bytes: usize,
}

impl ByteBudget {
    /// `None` — без ограничения.
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            cap: cap.unwrap_or(usize::MAX),
            used: AtomicUsize::new(0),
        }
    }

    /// Пытается зарезервировать `n` байт. `false` — лимит не
    /// позволяет, счётчик не изменён.
    pub fn try_reserve(
        &self,
        n: usize,
    ) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(n).filter(|&total| total <= self.cap)
            })
            .is_ok()
    }

    /// Возвращает ранее зарезервированные байты.
    pub fn release(
        &self,
        n: usize,
    ) {
        self.used.fetch_sub(n, Ordering::SeqCst);
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }
}

impl QueueStorage {
    pub fn new(
        max_total_bytes: Option<usize>,
        max_queue_bytes: Option<usize>,
    ) -> Self {
        Self {
            queues: DashMap::new(),
            budget: Arc::new(ByteBudget::new(max_total_bytes)),
            max_queue_bytes: max_queue_bytes.unwrap_or(usize::MAX),
        }
    }

    /// Возвращает движок очереди, создавая его при первом доступе.
    fn queue(
        &self,
        name: &str,
    ) -> Arc<MessageQueue> {
        if let Some(existing) = self.queues.get(name) {
            return existing.clone();
        }
        self.queues
            .entry(Arc::from(name))
            .or_insert_with(|| {
                debug!(queue = name, "queue created");
                Arc::new(MessageQueue::new(
                    Arc::from(name),
                    self.max_queue_bytes,
                    self.budget.clone(),
                ))
            })
            .clone()
    }

    pub fn push(
        &self,
        name: &str,
        payload: Bytes,
    ) -> Result<(), QueueFull> {
        self.queue(name).push(payload)
    }

    pub fn pop(
        &self,
        name: &str,
        session: SessionHandle,
        id: u64,
        timeout: Option<Duration>,
    ) {
        self.queue(name).pop(session, id, timeout)
    }

    /// Периодический проход: выбрасывает протухших ожидающих во всех
    /// очередях. Безопасно чередуется с конкурентными push/pop.
    pub fn sweep(&self) {
        for entry in self.queues.iter() {
            entry.value().sweep();
        }
    }

    /// Чистка после дисконнекта: удаляет ожидающих этой сессии из
    /// всех очередей.
    pub fn remove_session(
        &self,
        session_id: u64,
    ) {
        for entry in self.queues.iter() {
            entry.value().remove_waiters(session_id);
        }
    }

    /// Буферизованные байты всех очередей.
    pub fn used_bytes(&self) -> usize {
        self.budget.used()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::protocol::Packet;

    fn session(id: u64) -> (SessionHandle, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(id, tx), rx)
    }

    /// Тест проверяет ленивое создание и переиспользование движка.
    #[test]
    fn test_lazy_creation() {
        let storage = QueueStorage::new(None, None);
        assert_eq!(storage.queue_count(), 0);

        storage.push("a", Bytes::from_static(b"1")).unwrap();
        storage.push("a", Bytes::from_static(b"2")).unwrap();
        storage.push("b", Bytes::from_static(b"3")).unwrap();
        assert_eq!(storage.queue_count(), 2);
    }

    /// Тест проверяет, что гонка первого доступа создаёт ровно один
    /// движок на имя: все буферизованные байты видны одной очереди.
    #[test]
    fn test_concurrent_first_access_single_engine() {
        let storage = Arc::new(QueueStorage::new(None, None));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let storage = storage.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        storage.push("contended", Bytes::from_static(b"x")).unwrap();
                    }
                });
            }
        });

        assert_eq!(storage.queue_count(), 1);
        assert_eq!(storage.used_bytes(), 800);
    }

    /// Тест проверяет общий бюджет: очереди делят лимит, отказ не
    /// меняет счётчики.
    #[test]
    fn test_global_budget_shared_across_queues() {
        let storage = QueueStorage::new(Some(10), None);

        storage.push("a", Bytes::from_static(b"aaaaa")).unwrap();
        storage.push("b", Bytes::from_static(b"bbbbb")).unwrap();
        assert_eq!(storage.used_bytes(), 10);

        assert_eq!(storage.push("c", Bytes::from_static(b"c")), Err(QueueFull));
        assert_eq!(storage.used_bytes(), 10);
    }

    /// Тест проверяет CAS-бюджет под конкуренцией: лимит никогда не
    /// превышается совместными push.
    #[test]
    fn test_budget_never_exceeded_concurrently() {
        let storage = Arc::new(QueueStorage::new(Some(50), None));
        let accepted = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for worker in 0..10 {
                let storage = storage.clone();
                let accepted = accepted.clone();
                scope.spawn(move || {
                    let name = format!("q{worker}");
                    for _ in 0..20 {
                        if storage.push(&name, Bytes::from_static(b"12345")).is_ok() {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(accepted.load(Ordering::SeqCst), 10);
        assert_eq!(storage.used_bytes(), 50);
    }

    /// Тест проверяет remove_session по всем очередям.
    #[tokio::test]
    async fn test_remove_session_across_queues() {
        let storage = QueueStorage::new(None, None);
        let (gone, _rx) = session(1);

        storage.pop("a", gone.clone(), 1, None);
        storage.pop("b", gone, 2, None);
        storage.remove_session(1);

        // следующий push буферизуется: ожидающих больше нет
        storage.push("a", Bytes::from_static(b"x")).unwrap();
        assert_eq!(storage.used_bytes(), 1);
    }

    /// Тест проверяет, что sweep шлёт PopExpired по всем очередям.
    #[tokio::test]
    async fn test_sweep_all_queues() {
        let storage = QueueStorage::new(None, None);
        let (waiter, mut rx) = session(1);

        storage.pop("a", waiter.clone(), 1, Some(Duration::from_millis(1)));
        storage.pop("b", waiter, 2, Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        storage.sweep();
        let mut expired = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        expired.sort_by_key(|p| match p {
            Packet::PopExpired { id, .. } => *id,
            other => panic!("expected PopExpired, got {other:?}"),
        });
        assert!(matches!(expired[0], Packet::PopExpired { id: 1, .. }));
        assert!(matches!(expired[1], Packet::PopExpired { id: 2, .. }));
    }
}
