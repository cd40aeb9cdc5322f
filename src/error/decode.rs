use thiserror::Error;

/// Ошибки декодирования одного кадра протокола.
///
/// Ошибка всегда относится только к текущему кадру: соединение
/// продолжает жить, пока не исчерпан лимит ошибок декодирования.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected end of frame")]
    UnexpectedEof,

    #[error("Unknown packet tag: {0}")]
    UnknownTag(u8),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Frame has {0} trailing bytes after packet body")]
    TrailingBytes(usize),

    #[error("Frame too large: {size} > {limit}")]
    FrameTooLarge { size: usize, limit: usize },
}
