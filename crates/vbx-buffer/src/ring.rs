//! Single-owner ring buffer for pending writes (RB, §2). Backed by a
//! `VecDeque<u8>` so `as_slices()` gives the two contiguous runs a vectored
//! `sendv`/`writev` wants without ever needing to rotate the buffer.

use std::collections::VecDeque;
use std::io::IoSlice;

#[derive(Debug, Default)]
pub struct RingBuffer {
    bytes: VecDeque<u8>,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            bytes: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Append bytes to the tail of the ring, to be drained by the next
    /// flush.
    pub fn push(&mut self, data: &[u8]) {
        self.bytes.extend(data.iter().copied());
    }

    /// The ring's contents as up to two contiguous slices, suitable for a
    /// vectored write. Empty runs are omitted.
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        let (a, b) = self.bytes.as_slices();
        let mut slices = Vec::with_capacity(2);
        if !a.is_empty() {
            slices.push(IoSlice::new(a));
        }
        if !b.is_empty() {
            slices.push(IoSlice::new(b));
        }
        slices
    }

    /// Drop the first `n` bytes after they've been confirmed written.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.bytes.len());
        self.bytes.drain(..n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_consume_drains_in_order() {
        let mut ring = RingBuffer::new();
        ring.push(b"hello ");
        ring.push(b"world");
        assert_eq!(ring.len(), 11);
        ring.consume(6);
        assert_eq!(ring.len(), 5);
        let slices = ring.io_slices();
        let joined: Vec<u8> = slices.iter().flat_map(|s| s.iter().copied()).collect();
        assert_eq!(joined, b"world");
    }

    #[test]
    fn consume_more_than_len_drains_everything() {
        let mut ring = RingBuffer::new();
        ring.push(b"ab");
        ring.consume(100);
        assert!(ring.is_empty());
    }
}
