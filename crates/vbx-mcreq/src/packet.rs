//! A single in-flight memcached command (§3, §4.2).
//!
//! A `Packet` never owns its own header/key bytes directly — those live in
//! the owning [`crate::pipeline::Pipeline`]'s coalescing buffer, addressed
//! by [`Span`]. The exceptions are caller-supplied (`*_NO_COPY`) buffers and
//! detached packets produced by [`crate::dispatch::dup_packet`], which do
//! own their bytes outright.

use crate::flags::PacketFlags;
use bytes::Bytes;
use vbx_buffer::Span;
use vbx_core::ids::Opaque;

/// Caller-supplied correlation token, round-tripped back through the
/// response-handler registry untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie(pub u64);

/// The value half of a packet (§3: `mc_VALUE`).
#[derive(Debug)]
pub enum PacketValue {
    None,
    /// A span inside the owning pipeline's coalescing buffer — the common
    /// case, filled via `Pipeline::reserve_value`/`reserve_value2`.
    InPipeline(Span),
    /// A single caller-owned buffer (`VALUE_NO_COPY`), or a detached
    /// packet's own heap copy.
    Owned(Bytes),
    /// A scatter/gather list of caller-supplied buffers (`VALUE_IOV`).
    Iov(Vec<Bytes>),
}

impl PacketValue {
    pub fn len(&self) -> usize {
        match self {
            PacketValue::None => 0,
            PacketValue::InPipeline(span) => span.len,
            PacketValue::Owned(b) => b.len(),
            PacketValue::Iov(parts) => parts.iter().map(Bytes::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Minimal embedded request metadata (§3: `mc_REQDATA`). The extended form
/// (`mc_REQDATAEX`) from the source collapses into the same struct here —
/// dispatch is keyed by opcode in a pipeline-wide registry rather than a
/// per-packet callback pointer (see `dispatch.rs`), so there is nothing an
/// "extended" packet needs beyond what's already here.
#[derive(Debug, Clone, Copy)]
pub struct ReqData {
    pub cookie: Cookie,
    /// Milliseconds on the pipeline's clock when the command was scheduled.
    pub start_ms: u64,
}

/// A single request, pending a response or still being assembled.
#[derive(Debug)]
pub struct Packet {
    /// Span of header (+ extras + key) bytes inside the owning pipeline's
    /// coalescing buffer.
    pub kh_span: Span,
    pub value: PacketValue,
    pub extras_len: u8,
    pub retries: u8,
    pub flags: PacketFlags,
    pub opaque: Opaque,
    pub rdata: ReqData,
}

impl Packet {
    pub fn new(kh_span: Span, extras_len: u8, opaque: Opaque, rdata: ReqData) -> Self {
        Self {
            kh_span,
            value: PacketValue::None,
            extras_len,
            retries: 0,
            flags: PacketFlags::empty(),
            opaque,
            rdata,
        }
    }

    pub fn body_len(&self) -> u32 {
        (self.kh_span.len + self.value.len()) as u32 - crate::header::HEADER_SIZE as u32
    }

    pub fn total_len(&self) -> u32 {
        self.body_len() + crate::header::HEADER_SIZE as u32
    }

    /// Mark the packet handled by the response dispatcher. Mirrors the
    /// source's `mcreq_packet_handled` macro: setting `INVOKED` here, not
    /// freeing storage — storage release is `FLUSHED && INVOKED`, checked
    /// by the pipeline once both references have dropped.
    pub fn mark_invoked(&mut self) {
        self.flags.insert(PacketFlags::INVOKED);
    }

    pub fn mark_flushed(&mut self) {
        self.flags.insert(PacketFlags::FLUSHED);
    }

    pub fn is_fully_released(&self) -> bool {
        self.flags.is_fully_released()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbx_buffer::Span;

    fn packet(len: usize) -> Packet {
        Packet::new(
            Span { offset: 0, len },
            0,
            Opaque(1),
            ReqData {
                cookie: Cookie(7),
                start_ms: 0,
            },
        )
    }

    #[test]
    fn mark_invoked_then_flushed_is_fully_released() {
        let mut pkt = packet(24);
        assert!(!pkt.is_fully_released());
        pkt.mark_invoked();
        assert!(!pkt.is_fully_released());
        pkt.mark_flushed();
        assert!(pkt.is_fully_released());
    }

    #[test]
    fn body_len_excludes_header() {
        let pkt = packet(24 + 8);
        assert_eq!(pkt.body_len(), 8);
        assert_eq!(pkt.total_len(), 32);
    }
}
