//! Таблица незавершённых запросов клиента.
//!
//! Каждый pop и подтверждаемый push висит здесь под своим id до
//! первого разрешения. Разрешить запись может ответ брокера,
//! серверное истечение, локальный таймер или teardown соединения —
//! побеждает ровно один: запись сначала изымается под мьютексом,
//! проигравший натыкается на пустой слот и ничего не делает.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    error::{PopError, PushError},
    protocol::PushFailure,
};

#[derive(Debug)]
pub(crate) enum PendingReply {
    Pop(oneshot::Sender<Result<Bytes, PopError>>),
    Push(oneshot::Sender<Result<(), PushError>>),
}

#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<u64, PendingReply>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pop(
        &self,
        id: u64,
    ) -> oneshot::Receiver<Result<Bytes, PopError>> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(id, PendingReply::Pop(tx));
        rx
    }

    pub fn insert_push(
        &self,
        id: u64,
    ) -> oneshot::Receiver<Result<(), PushError>> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(id, PendingReply::Push(tx));
        rx
    }

    /// Изымает запись, если это pop. Чужая или отсутствующая
    /// запись остаётся нетронутой.
    fn take_pop(
        &self,
        id: u64,
    ) -> Option<oneshot::Sender<Result<Bytes, PopError>>> {
        let mut entries = self.entries.lock();
        match entries.remove(&id) {
            Some(PendingReply::Pop(tx)) => Some(tx),
            Some(other) => {
                entries.insert(id, other);
                None
            }
            None => None,
        }
    }

    fn take_push(
        &self,
        id: u64,
    ) -> Option<oneshot::Sender<Result<(), PushError>>> {
        let mut entries = self.entries.lock();
        match entries.remove(&id) {
            Some(PendingReply::Push(tx)) => Some(tx),
            Some(other) => {
                entries.insert(id, other);
                None
            }
            None => None,
        }
    }

    pub fn resolve_pop_response(
        &self,
        id: u64,
        payload: Bytes,
        failed: bool,
    ) {
        if let Some(tx) = self.take_pop(id) {
            let _ = tx.send(if failed { Err(PopError::Failed) } else { Ok(payload) });
        }
    }

    pub fn resolve_expired(
        &self,
        id: u64,
    ) {
        if let Some(tx) = self.take_pop(id) {
            let _ = tx.send(Err(PopError::TimedOut));
        }
    }

    pub fn resolve_confirmation(
        &self,
        id: u64,
        error: Option<PushFailure>,
    ) {
        if let Some(tx) = self.take_push(id) {
            let _ = tx.send(match error {
                None => Ok(()),
                Some(PushFailure::QueueFull) => Err(PushError::QueueFull),
                Some(PushFailure::Unknown) => Err(PushError::Unknown),
            });
        }
    }

    /// Снимает запись без разрешения: проигравшая половина гонки
    /// {таймер, подтверждение} зовёт это и попадает в пустой слот.
    pub fn discard(
        &self,
        id: u64,
    ) {
        self.entries.lock().remove(&id);
    }

    /// Teardown: каждый незавершённый запрос разрешается ровно один
    /// раз исходом «отключён».
    pub fn fail_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for (_, reply) in entries {
            match reply {
                PendingReply::Pop(tx) => {
                    let _ = tx.send(Err(PopError::Disconnected));
                }
                PendingReply::Push(tx) => {
                    let _ = tx.send(Err(PushError::Disconnected));
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет разрешение pop ответом и идемпотентность
    /// повторного разрешения.
    #[tokio::test]
    async fn test_pop_resolution_once() {
        let table = PendingTable::new();
        let rx = table.insert_pop(1);

        table.resolve_pop_response(1, Bytes::from_static(b"x"), false);
        // повторы по тому же id — no-op
        table.resolve_pop_response(1, Bytes::from_static(b"y"), false);
        table.resolve_expired(1);

        assert_eq!(rx.await.unwrap(), Ok(Bytes::from_static(b"x")));
        assert_eq!(table.len(), 0);
    }

    /// Тест проверяет исходы подтверждаемого push.
    #[tokio::test]
    async fn test_push_confirmation_outcomes() {
        let table = PendingTable::new();

        let ok = table.insert_push(1);
        table.resolve_confirmation(1, None);
        assert_eq!(ok.await.unwrap(), Ok(()));

        let full = table.insert_push(2);
        table.resolve_confirmation(2, Some(PushFailure::QueueFull));
        assert_eq!(full.await.unwrap(), Err(PushError::QueueFull));
    }

    /// Тест проверяет PopExpired и отказной PopResponse.
    #[tokio::test]
    async fn test_pop_failure_kinds() {
        let table = PendingTable::new();

        let expired = table.insert_pop(1);
        table.resolve_expired(1);
        assert_eq!(expired.await.unwrap(), Err(PopError::TimedOut));

        let failed = table.insert_pop(2);
        table.resolve_pop_response(2, Bytes::new(), true);
        assert_eq!(failed.await.unwrap(), Err(PopError::Failed));
    }

    /// Тест проверяет, что пакет не того рода не трогает запись.
    #[tokio::test]
    async fn test_kind_mismatch_leaves_entry() {
        let table = PendingTable::new();
        let rx = table.insert_push(1);

        table.resolve_pop_response(1, Bytes::from_static(b"stray"), false);
        assert_eq!(table.len(), 1);

        table.resolve_confirmation(1, None);
        assert_eq!(rx.await.unwrap(), Ok(()));
    }

    /// Тест проверяет teardown: все записи разрешаются исходом
    /// «отключён», таблица пустеет.
    #[tokio::test]
    async fn test_fail_all() {
        let table = PendingTable::new();
        let pop = table.insert_pop(1);
        let push = table.insert_push(2);

        table.fail_all();
        assert_eq!(pop.await.unwrap(), Err(PopError::Disconnected));
        assert_eq!(push.await.unwrap(), Err(PushError::Disconnected));
        assert_eq!(table.len(), 0);
    }

    /// Тест проверяет discard: снятая запись уже не разрешается.
    #[tokio::test]
    async fn test_discard_then_resolution_is_noop() {
        let table = PendingTable::new();
        let rx = table.insert_push(1);

        table.discard(1);
        table.resolve_confirmation(1, None);

        // отправитель уничтожен вместе с записью
        assert!(rx.await.is_err());
    }
}
