//! Growable byte buffer used for a session's inbound buffer and for message
//! header / follow-block bytes.
use std::ops::Deref;

/// A plain growable byte buffer.
///
/// This is intentionally a thin wrapper around `Vec<u8>`: the core never
/// needs anything fancier than append-and-drain-a-prefix, and keeping it a
/// distinct type (rather than passing `Vec<u8>` around everywhere) documents
/// intent at call sites (`in_buffer: Buffer` reads as "decoder input",
/// `header: Buffer` reads as "message bytes").
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    inner: Vec<u8>,
}

impl Buffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { inner: Vec::new() }
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Wrap an existing byte vector.
    pub fn from_vec(inner: Vec<u8>) -> Self {
        Self { inner }
    }

    /// Append bytes read from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop the first `count` bytes, shifting the remainder down.
    ///
    /// Used by the decoder's caller once a complete request has been parsed
    /// out of the head of the buffer.
    pub fn consume(&mut self, count: usize) {
        if count >= self.inner.len() {
            self.inner.clear();
        } else {
            self.inner.drain(..count);
        }
    }

    /// Empty the buffer entirely (used when a dying session's pending input
    /// is discarded rather than decoded).
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Borrow the full contents as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(inner: Vec<u8>) -> Self {
        Self { inner }
    }
}

impl<'a> From<&'a [u8]> for Buffer {
    fn from(bytes: &'a [u8]) -> Self {
        Self {
            inner: bytes.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_and_consume() {
        let mut buf = Buffer::new();
        buf.extend(b"hello world");
        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");
    }

    #[test]
    fn consume_more_than_len_clears() {
        let mut buf = Buffer::from(b"hi".to_vec());
        buf.consume(100);
        assert!(buf.is_empty());
    }
}
