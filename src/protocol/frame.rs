//! Кадрирование: один пакет — один кадр с u32-префиксом длины.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::packet::Packet;
use crate::error::DecodeError;

/// Максимальный размер тела кадра. Кадр больше лимита — протокольная
/// ошибка, а не повод аллоцировать гигабайты по одному u32 с провода.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Кодирует пакет и пишет его одним кадром.
pub async fn write_packet<W>(
    writer: &mut W,
    packet: &Packet,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = packet.encode();
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Читает тело следующего кадра.
///
/// `Ok(None)` — чистый EOF на границе кадров (клиент закрыл
/// соединение). EOF посреди кадра — ошибка ввода-вывода.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            DecodeError::FrameTooLarge {
                size: len,
                limit: MAX_FRAME_BYTES,
            }
            .to_string(),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
