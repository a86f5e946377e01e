//! Fixed-capacity byte ring buffer.
//!
//! Writes never block and never grow the backing store: a write larger than
//! the remaining space is truncated and the short count is the producer's
//! backpressure signal. Reads never block either and return bytes in the
//! order they were written.
//!
//! The buffer is single-producer/single-consumer and owned by one call's
//! inbound loop, so it takes `&mut self` rather than locking internally.

/// A fixed-size circular byte buffer.
#[derive(Debug)]
pub struct AudioRingBuffer {
    buf: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl AudioRingBuffer {
    /// Creates an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    /// Copies as much of `data` as fits and returns the number of bytes written.
    ///
    /// Returns 0 when the buffer is full.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        if n == 0 {
            return 0;
        }

        let cap = self.buf.len();
        let first = n.min(cap - self.write_pos);
        self.buf[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        let rest = n - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&data[first..n]);
        }

        self.write_pos = (self.write_pos + n) % cap;
        self.len += n;
        n
    }

    /// Moves up to `out.len()` bytes into `out` and returns how many were read.
    ///
    /// Returns 0 when the buffer is empty.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        if n == 0 {
            return 0;
        }

        let cap = self.buf.len();
        let first = n.min(cap - self.read_pos);
        out[..first].copy_from_slice(&self.buf[self.read_pos..self.read_pos + first]);
        let rest = n - first;
        if rest > 0 {
            out[first..n].copy_from_slice(&self.buf[..rest]);
        }

        self.read_pos = (self.read_pos + n) % cap;
        self.len -= n;
        n
    }

    /// Number of bytes waiting to be read.
    pub fn available(&self) -> usize {
        self.len
    }

    /// Number of bytes that can still be written.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Discards all buffered bytes. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.len = 0;
    }
}
