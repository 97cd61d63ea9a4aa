//! Buffer machinery backing the memcached request pipeline: a chained
//! receive buffer (RDB), a single-owner output ring (RB), a coalescing
//! byte-level manager for packet key+header spans, and the slab allocator
//! that hands out reusable packet records (§2, §4.2).

pub mod coalesce;
pub mod packet_slab;
pub mod read_buf;
pub mod ring;

pub use coalesce::{CoalescingBuffer, Span};
pub use packet_slab::{Slab, SlabKey};
pub use read_buf::ReadBufferChain;
pub use ring::RingBuffer;
