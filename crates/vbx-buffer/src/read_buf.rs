//! Chained receive buffer (RDB, §2): bytes arrive in whatever chunks the
//! transport hands over, and callers can ask for either a scattered view
//! (cheap, never copies) or a contiguous view (which copies only when the
//! requested run actually straddles a chunk boundary).
//!
//! This module does no I/O itself — the transport (`vbx-io`) reads into its
//! own scratch buffer and hands the resulting bytes to [`ReadBufferChain::extend`].

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Size at which an in-progress tail chunk is frozen and appended to
/// `filled`, matching `spark-buffer`'s default pooled-buffer granularity.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Default)]
pub struct ReadBufferChain {
    /// Fully or partially consumed chunks, oldest first. `filled[0]` may be
    /// partially consumed; all consumption happens from its front.
    filled: VecDeque<Bytes>,
    /// Bytes not yet large enough to freeze into `filled`.
    tail: BytesMut,
    total_len: usize,
}

impl ReadBufferChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total unconsumed bytes across every chunk.
    pub fn len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.total_len += data.len();
        self.tail.extend_from_slice(data);
        if self.tail.len() >= DEFAULT_CHUNK_SIZE {
            let full = std::mem::replace(&mut self.tail, BytesMut::new()).freeze();
            self.filled.push_back(full);
        }
    }

    /// A scattered, read-only view of every unconsumed byte, oldest first.
    /// Never copies.
    pub fn scattered(&self) -> Vec<&[u8]> {
        let mut views: Vec<&[u8]> = self.filled.iter().map(|b| b.as_ref()).collect();
        if !self.tail.is_empty() {
            views.push(&self.tail[..]);
        }
        views
    }

    /// A contiguous view of the first `n` bytes. Returns `None` if fewer
    /// than `n` bytes are available. Copies only when `n` straddles more
    /// than one chunk; a request fully inside `filled[0]` or the bare tail
    /// borrows directly.
    pub fn contiguous(&mut self, n: usize) -> Option<Bytes> {
        if n > self.total_len {
            return None;
        }
        if let Some(front) = self.filled.front() {
            if front.len() >= n {
                return Some(front.slice(0..n));
            }
        } else if self.tail.len() >= n {
            return Some(Bytes::copy_from_slice(&self.tail[..n]));
        }

        let mut out = Vec::with_capacity(n);
        for chunk in self.filled.iter() {
            let take = (n - out.len()).min(chunk.len());
            out.extend_from_slice(&chunk[..take]);
            if out.len() == n {
                break;
            }
        }
        if out.len() < n {
            let take = n - out.len();
            out.extend_from_slice(&self.tail[..take]);
        }
        Some(Bytes::from(out))
    }

    /// Drop the first `n` unconsumed bytes.
    pub fn consume(&mut self, mut n: usize) {
        n = n.min(self.total_len);
        self.total_len -= n;
        while n > 0 {
            match self.filled.front_mut() {
                Some(front) if front.len() <= n => {
                    n -= front.len();
                    self.filled.pop_front();
                }
                Some(front) => {
                    *front = front.slice(n..);
                    n = 0;
                }
                None => {
                    let _ = self.tail.split_to(n);
                    n = 0;
                }
            }
        }
    }
}
