//! Одна именованная FIFO-очередь.
//!
//! Буфер сообщений и список ожидающих pop-запросов живут под одним
//! мьютексом: операции одной очереди взаимно исключены, разные
//! очереди независимы. Инвариант: push сначала пытается отдать
//! payload старейшему живому ожидающему и только потом буферизует,
//! поэтому при установившемся трафике буфер и список ожидающих не
//! бывают непусты одновременно.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use super::registry::ByteBudget;
use crate::{error::QueueFull, network::session::SessionHandle, protocol::Packet};

/// Ожидающий pop-запрос: кому ответить и когда запрос протухает.
#[derive(Debug)]
struct Waiter {
    session: SessionHandle,
    id: u64,
    deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct QueueInner {
    messages: VecDeque<Bytes>,
    waiters: VecDeque<Waiter>,
    /// Сумма длин буферизованных сообщений
    bytes: usize,
}

/// Именованная FIFO-очередь байтовых сообщений.
#[derive(Debug)]
pub struct MessageQueue {
    name: Arc<str>,
    inner: Mutex<QueueInner>,
    /// Лимит буферизованных байт этой очереди
    max_bytes: usize,
    /// Общий бюджет брокера, делится всеми очередями
    global: Arc<ByteBudget>,
}

impl Waiter {
    fn expired(
        &self,
        now: Instant,
    ) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

impl MessageQueue {
    pub fn new(
        name: Arc<str>,
        max_bytes: usize,
        global: Arc<ByteBudget>,
    ) -> Self {
        Self {
            name,
            inner: Mutex::new(QueueInner::default()),
            max_bytes,
            global,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Принимает новое сообщение.
    ///
    /// Сначала контроль бюджета (очередь и брокер целиком), при
    /// отказе — `QueueFull` без каких-либо изменений состояния.
    /// Затем проход по списку ожидающих от головы: протухшие
    /// получают `PopExpired` и выбывают, первому живому payload
    /// уходит напрямую, минуя буфер и байтовый учёт. Без ожидающих —
    /// буферизация в хвост.
    pub fn push(
        &self,
        payload: Bytes,
    ) -> Result<(), QueueFull> {
        let size = payload.len();
        let mut inner = self.inner.lock();

        if inner.bytes + size > self.max_bytes {
            return Err(QueueFull);
        }
        if !self.global.try_reserve(size) {
            return Err(QueueFull);
        }

        let now = Instant::now();
        while let Some(waiter) = inner.waiters.pop_front() {
            if waiter.expired(now) {
                waiter.session.expire(&self.name, waiter.id);
                continue;
            }
            // прямая доставка: payload не лежал в буфере, резерв
            // возвращается и в учёте не остаётся следа
            self.global.release(size);
            trace!(queue = %self.name, id = waiter.id, size, "direct delivery to waiter");
            waiter.session.send(Packet::PopResponse {
                queue: self.name.to_string(),
                id: waiter.id,
                payload,
                failed: false,
            });
            return Ok(());
        }

        inner.bytes += size;
        inner.messages.push_back(payload);
        trace!(queue = %self.name, size, buffered = inner.bytes, "payload buffered");
        Ok(())
    }

    /// Обслуживает pop-запрос.
    ///
    /// Непустой буфер — немедленный ответ старейшим сообщением.
    /// Пустой — запрос встаёт в хвост списка ожидающих с дедлайном
    /// `now + timeout` либо без дедлайна.
    pub fn pop(
        &self,
        session: SessionHandle,
        id: u64,
        timeout: Option<Duration>,
    ) {
        let mut inner = self.inner.lock();

        if let Some(payload) = inner.messages.pop_front() {
            inner.bytes -= payload.len();
            self.global.release(payload.len());
            trace!(queue = %self.name, id, size = payload.len(), "pop served from buffer");
            session.send(Packet::PopResponse {
                queue: self.name.to_string(),
                id,
                payload,
                failed: false,
            });
            return;
        }

        inner.waiters.push_back(Waiter {
            session,
            id,
            deadline: timeout.map(|t| Instant::now() + t),
        });
    }

    /// Выбрасывает протухших ожидающих, отправляя каждому
    /// `PopExpired`. Ограничивает запаздывание таймаута даже без
    /// дальнейшего push-трафика.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.waiters.retain(|waiter| {
            if waiter.expired(now) {
                waiter.session.expire(&self.name, waiter.id);
                false
            } else {
                true
            }
        });
    }

    /// Молча удаляет всех ожидающих отключившейся сессии:
    /// отвечать больше некому.
    pub fn remove_waiters(
        &self,
        session_id: u64,
    ) {
        let mut inner = self.inner.lock();
        inner
            .waiters
            .retain(|waiter| waiter.session.id() != session_id);
    }

    /// Байт в буфере этой очереди.
    pub fn buffered_bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    #[cfg(test)]
    pub(crate) fn buffered_messages(&self) -> usize {
        self.inner.lock().messages.len()
    }

    #[cfg(test)]
    pub(crate) fn waiting_clients(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}
