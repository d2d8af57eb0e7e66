//! # Record Buffers
//!
//! Bounded byte arenas used for the four TLS buffer roles. Each buffer has a
//! logical capacity that only grows; growth copies the unread bytes into a
//! fresh allocation so nothing already received is lost.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

/// Bounded, growable byte buffer.
///
/// Bytes are appended at the back (up to `capacity`) and consumed from the
/// front. Consuming compacts implicitly: the freed space becomes spare
/// capacity again.
#[derive(Debug)]
pub struct RecordBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl RecordBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        RecordBuffer {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Readable bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Free space left before the logical capacity is reached.
    #[inline]
    pub fn spare(&self) -> usize {
        self.capacity - self.buf.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drops `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n.min(self.buf.len()));
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Appends as much of `data` as fits and returns the number of bytes
    /// copied.
    pub fn put_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.spare());
        self.buf.extend_from_slice(&data[..n]);
        n
    }

    /// Raises the capacity to `required`, keeping every unread byte.
    ///
    /// Returns `false` when the buffer is already large enough; capacity never
    /// shrinks.
    pub fn grow(&mut self, required: usize) -> bool {
        if required <= self.capacity {
            return false;
        }
        let mut next = BytesMut::with_capacity(required);
        next.extend_from_slice(&self.buf);
        self.buf = next;
        self.capacity = required;
        true
    }

    /// Reads once from `reader` into the spare space.
    ///
    /// A buffer without spare space returns `Ok(0)` without touching the
    /// reader; callers must grow it first if they need more room.
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let spare = self.spare();
        if spare == 0 {
            return Ok(0);
        }
        let start = self.buf.len();
        self.buf.resize(start + spare, 0);
        let result = reader.read(&mut self.buf[start..]);
        let read = *result.as_ref().unwrap_or(&0);
        self.buf.truncate(start + read);
        result
    }

    /// Writes readable bytes to `writer` once and consumes what was accepted.
    pub fn write_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<usize> {
        if self.buf.is_empty() {
            return Ok(0);
        }
        let written = writer.write(&self.buf)?;
        self.buf.advance(written);
        Ok(written)
    }

    /// Moves every readable byte out, leaving the buffer empty.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}

/// Appending through `io::Write` lets TLS libraries emit records straight
/// into the buffer. A full buffer reports `WouldBlock`.
impl Write for RecordBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.put_slice(data) {
            0 => Err(io::ErrorKind::WouldBlock.into()),
            n => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_slice_respects_capacity() {
        let mut buffer = RecordBuffer::with_capacity(4);
        assert_eq!(buffer.put_slice(b"abcdef"), 4);
        assert_eq!(buffer.as_slice(), b"abcd");
        assert_eq!(buffer.spare(), 0);
    }

    #[test]
    fn grow_preserves_unread_bytes() {
        let mut buffer = RecordBuffer::with_capacity(8);
        buffer.put_slice(b"12345678");
        buffer.consume(3);
        assert!(buffer.grow(32));
        assert_eq!(buffer.capacity(), 32);
        assert_eq!(buffer.as_slice(), b"45678");
        assert_eq!(buffer.put_slice(b"9"), 1);
        assert_eq!(buffer.as_slice(), b"456789");
    }

    #[test]
    fn grow_never_shrinks() {
        let mut buffer = RecordBuffer::with_capacity(16);
        buffer.put_slice(b"abc");
        assert!(!buffer.grow(8));
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.as_slice(), b"abc");
    }

    #[test]
    fn consume_frees_space() {
        let mut buffer = RecordBuffer::with_capacity(4);
        buffer.put_slice(b"abcd");
        buffer.consume(2);
        assert_eq!(buffer.spare(), 2);
        assert_eq!(buffer.put_slice(b"ef"), 2);
        assert_eq!(buffer.as_slice(), b"cdef");
    }

    #[test]
    fn read_from_fills_spare_space() {
        let mut buffer = RecordBuffer::with_capacity(4);
        let mut source: &[u8] = b"abcdef";
        assert_eq!(buffer.read_from(&mut source).unwrap(), 4);
        assert_eq!(buffer.as_slice(), b"abcd");
        assert_eq!(buffer.read_from(&mut source).unwrap(), 0);
        assert_eq!(source, b"ef");
    }

    #[test]
    fn write_impl_reports_full_buffer() {
        let mut buffer = RecordBuffer::with_capacity(2);
        assert_eq!(buffer.write(b"abc").unwrap(), 2);
        let err = buffer.write(b"c").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn write_to_drains_accepted_bytes() {
        let mut buffer = RecordBuffer::with_capacity(8);
        buffer.put_slice(b"abcdef");
        let mut sink = Vec::new();
        assert_eq!(buffer.write_to(&mut sink).unwrap(), 6);
        assert!(buffer.is_empty());
        assert_eq!(sink, b"abcdef");
    }
}
