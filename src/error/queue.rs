use thiserror::Error;

/// Отказ по байтовому бюджету: очередь или брокер целиком исчерпали
/// лимит, полезная нагрузка не принята и счётчики не изменены.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Queue byte budget exhausted")]
pub struct QueueFull;
