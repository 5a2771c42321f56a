//! Buffered, hashing writer
//!
//! Small appends are collected in memory and pushed to the underlying writer
//! once the buffer reaches a size threshold. Every byte that reaches the
//! writer also feeds a BLAKE3 hasher, so the content hash is ready as soon as
//! the last byte is written.

use std::io::{self, Write};

/// Write adapter with an explicit size-threshold flush policy
pub struct BufferedSink<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    /// Flush once the buffer holds at least this many bytes
    threshold: usize,
    hasher: blake3::Hasher,
    /// Total bytes accepted so far (buffered or not)
    position: u64,
}

impl<W: Write> BufferedSink<W> {
    pub fn new(inner: W, threshold: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(threshold.min(1024 * 1024)),
            threshold,
            hasher: blake3::Hasher::new(),
            position: 0,
        }
    }

    /// Logical write offset: bytes accepted, including unflushed ones
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes sitting in the buffer
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Push buffered bytes to the inner writer and hash them
    pub fn flush_buffer(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.inner.write_all(&self.buffer)?;
            self.hasher.update(&self.buffer);
            self.buffer.clear();
        }
        self.inner.flush()
    }

    /// Flush everything and hand back the writer with the content hash
    pub fn finish(mut self) -> io::Result<(W, blake3::Hash)> {
        self.flush_buffer()?;
        let hash = self.hasher.finalize();
        Ok((self.inner, hash))
    }
}

impl<W: Write> Write for BufferedSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.position += buf.len() as u64;
        if self.buffer.len() >= self.threshold {
            self.flush_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()
    }
}
