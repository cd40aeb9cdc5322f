//! Примитивный бинарный кодек.
//!
//! Пишет и читает значения фиксированной ширины (big-endian), булевы
//! флаги, UTF-8 строки и байтовые массивы с u32-префиксом длины.
//! Любое усечённое или некорректное поле даёт типизированную
//! [`DecodeError`], никогда не панику.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Записывающая половина кодека: растущий буфер плюс put-методы.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

/// Читающая половина кодека поверх одного кадра.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u8(
        &mut self,
        v: u8,
    ) {
        self.buf.put_u8(v);
    }

    pub fn put_u32(
        &mut self,
        v: u32,
    ) {
        self.buf.put_u32(v);
    }

    pub fn put_u64(
        &mut self,
        v: u64,
    ) {
        self.buf.put_u64(v);
    }

    pub fn put_f64(
        &mut self,
        v: f64,
    ) {
        self.buf.put_f64(v);
    }

    pub fn put_bool(
        &mut self,
        v: bool,
    ) {
        self.buf.put_u8(v as u8);
    }

    /// Строка: u32 длина + UTF-8 байты.
    pub fn put_str(
        &mut self,
        v: &str,
    ) {
        self.buf.put_u32(v.len() as u32);
        self.buf.put_slice(v.as_bytes());
    }

    /// Байтовый массив: u32 длина + содержимое.
    pub fn put_bytes(
        &mut self,
        v: &[u8],
    ) {
        self.buf.put_u32(v.len() as u32);
        self.buf.put_slice(v);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(
        &self,
        n: usize,
    ) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let raw = self.read_raw()?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self) -> Result<Bytes, DecodeError> {
        let raw = self.read_raw()?;
        Ok(Bytes::copy_from_slice(raw))
    }

    fn read_raw(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32()? as usize;
        if self.buf.len() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Кадр обязан быть прочитан целиком: хвост после тела пакета —
    /// это ошибка декодирования, а не молчаливо съеденный мусор.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.buf.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что примитивы читаются в том же порядке,
    /// в каком были записаны.
    #[test]
    fn test_primitives_round_trip() {
        let mut w = PayloadWriter::new();
        w.put_u8(7);
        w.put_u32(123_456);
        w.put_u64(u64::MAX);
        w.put_f64(2.5);
        w.put_bool(true);
        w.put_str("очередь");
        w.put_bytes(b"\x00\x01\x02");

        let frame = w.into_bytes();
        let mut r = PayloadReader::new(&frame);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u32().unwrap(), 123_456);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_f64().unwrap(), 2.5);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_string().unwrap(), "очередь");
        assert_eq!(r.read_bytes().unwrap(), Bytes::from_static(b"\x00\x01\x02"));
        r.finish().unwrap();
    }

    /// Тест проверяет, что усечённое поле даёт UnexpectedEof,
    /// а не панику.
    #[test]
    fn test_truncated_field() {
        let mut w = PayloadWriter::new();
        w.put_str("hello");
        let frame = w.into_bytes();

        let mut r = PayloadReader::new(&frame[..frame.len() - 2]);
        assert_eq!(r.read_string(), Err(DecodeError::UnexpectedEof));
    }

    /// Тест проверяет, что длина, выходящая за границы кадра,
    /// отклоняется.
    #[test]
    fn test_length_past_end() {
        // u32 длина = 100, но данных нет
        let frame = [0u8, 0, 0, 100];
        let mut r = PayloadReader::new(&frame);
        assert_eq!(r.read_bytes(), Err(DecodeError::UnexpectedEof));
    }

    /// Тест проверяет, что finish() отлавливает хвостовые байты.
    #[test]
    fn test_trailing_bytes() {
        let mut w = PayloadWriter::new();
        w.put_u8(1);
        w.put_u8(2);
        let frame = w.into_bytes();

        let mut r = PayloadReader::new(&frame);
        r.read_u8().unwrap();
        assert_eq!(r.finish(), Err(DecodeError::TrailingBytes(1)));
    }

    /// Тест проверяет, что не-UTF-8 строка даёт InvalidUtf8.
    #[test]
    fn test_invalid_utf8() {
        let mut w = PayloadWriter::new();
        w.put_bytes(&[0xff, 0xfe]);
        let frame = w.into_bytes();

        let mut r = PayloadReader::new(&frame);
        assert_eq!(r.read_string(), Err(DecodeError::InvalidUtf8));
    }

    /// Тест проверяет пустые строку и массив.
    #[test]
    fn test_empty_values() {
        let mut w = PayloadWriter::new();
        w.put_str("");
        w.put_bytes(&[]);
        let frame = w.into_bytes();

        let mut r = PayloadReader::new(&frame);
        assert_eq!(r.read_string().unwrap(), "");
        assert!(r.read_bytes().unwrap().is_empty());
        r.finish().unwrap();
    }
}
