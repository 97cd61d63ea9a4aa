//! A per-server request pipeline (§3, §4.2): the non-I/O half of a
//! connection — its packet pool, its coalescing buffer, and the two
//! orderings a packet passes through (pending-commit, then dispatched).

use crate::header::HEADER_SIZE;
use crate::packet::{Packet, PacketValue, ReqData};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::trace;
use vbx_buffer::{CoalescingBuffer, Slab, SlabKey, Span};
use vbx_core::error::McreqError;
use vbx_core::ids::{Opaque, ServerIndex};

/// A per-pipeline request pipeline. Holds no socket state — see `vbx-io`
/// for that; this is exactly the part the source says "does not do network
/// I/O by design".
pub struct Pipeline {
    pub index: ServerIndex,
    /// Packets dispatched to the wire (or about to be), oldest first.
    requests: VecDeque<SlabKey>,
    /// Packets added during the current scheduling scope, not yet
    /// committed into `requests`.
    ctxqueued: VecDeque<SlabKey>,
    pool: Slab<Packet>,
    buf: CoalescingBuffer,
    flush_start: Option<Box<dyn FnMut(ServerIndex) + Send>>,
    buf_done: Option<Box<dyn FnMut(ServerIndex, crate::packet::Cookie) + Send>>,
}

impl Pipeline {
    pub fn new(index: ServerIndex) -> Self {
        Self {
            index,
            requests: VecDeque::new(),
            ctxqueued: VecDeque::new(),
            pool: Slab::new(),
            buf: CoalescingBuffer::new(),
            flush_start: None,
            buf_done: None,
        }
    }

    pub fn set_flush_start(&mut self, f: impl FnMut(ServerIndex) + Send + 'static) {
        self.flush_start = Some(Box::new(f));
    }

    pub fn set_buf_done(&mut self, f: impl FnMut(ServerIndex, crate::packet::Cookie) + Send + 'static) {
        self.buf_done = Some(Box::new(f));
    }

    /// Ask whoever owns the socket for this pipeline to start flushing.
    /// Takes no pipeline reference by design — see the module doc for why.
    pub fn request_flush(&mut self) {
        if let Some(cb) = self.flush_start.as_mut() {
            cb(self.index);
        }
    }

    pub fn requests_len(&self) -> usize {
        self.requests.len()
    }

    pub fn ctxqueued_len(&self) -> usize {
        self.ctxqueued.len()
    }

    /// Number of packets still allocated in this pipeline's pool, committed
    /// or not. Used by [`crate::queue::CommandQueue`] to tell how many
    /// packets a finalizing call actually released, since that count isn't
    /// otherwise visible from outside the pool.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn get(&self, key: SlabKey) -> Option<&Packet> {
        self.pool.get(key)
    }

    pub fn get_mut(&mut self, key: SlabKey) -> Option<&mut Packet> {
        self.pool.get_mut(key)
    }

    /// The bytes backing a packet's value, regardless of which storage
    /// variant holds them. `Iov` values have no single contiguous view —
    /// callers needing that must walk the parts themselves.
    pub fn packet_value<'a>(&'a self, pkt: &'a Packet) -> Option<&'a [u8]> {
        match &pkt.value {
            PacketValue::None => None,
            PacketValue::InPipeline(span) => Some(self.buf.get(*span)),
            PacketValue::Owned(b) => Some(b),
            PacketValue::Iov(_) => None,
        }
    }

    pub fn header_bytes(&self, pkt: &Packet) -> &[u8] {
        self.buf.get(pkt.kh_span)
    }

    pub fn header_bytes_mut(&mut self, span: Span) -> &mut [u8] {
        self.buf.get_mut(span)
    }

    /// Reserve a header-only span (no key) — for frames that carry fixed
    /// data not needing a key lookup.
    pub fn reserve_header(
        &mut self,
        hdrsize: u8,
        opaque: Opaque,
        rdata: ReqData,
    ) -> SlabKey {
        let span = self.buf.reserve(hdrsize as usize);
        self.pool.insert(Packet::new(span, 0, opaque, rdata))
    }

    /// Reserve header+key as one contiguous span and copy the key in.
    /// `hdrsize` must already include the 24-byte header plus any extras.
    pub fn reserve_key(
        &mut self,
        hdrsize: u8,
        key: &[u8],
        opaque: Opaque,
        rdata: ReqData,
    ) -> SlabKey {
        let span = self.buf.reserve(hdrsize as usize + key.len());
        self.buf.get_mut(span)[hdrsize as usize..].copy_from_slice(key);
        let extras_len = hdrsize.saturating_sub(HEADER_SIZE as u8);
        let pkt = Packet::new(span, extras_len, opaque, rdata);
        self.pool.insert(pkt)
    }

    /// Reserve `n` zeroed bytes for the value and return them for the
    /// caller to fill (mirrors `mcreq_reserve_value2`'s no-copy reservation).
    pub fn reserve_value2(&mut self, key: SlabKey, n: usize) -> Result<&mut [u8], McreqError> {
        let span = self.buf.reserve(n);
        let pkt = self
            .pool
            .get_mut(key)
            .ok_or_else(|| McreqError::ProtocolError("reserve_value2: unknown packet".into()))?;
        pkt.value = PacketValue::InPipeline(span);
        pkt.flags.insert(crate::flags::PacketFlags::HAS_VALUE);
        Ok(self.buf.get_mut(span))
    }

    /// Reserve space for `data` and copy it in immediately.
    pub fn reserve_value(&mut self, key: SlabKey, data: &[u8]) -> Result<(), McreqError> {
        self.reserve_value2(key, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Reserve a value the caller already owns as a `Bytes` (zero-copy,
    /// `VALUE_NO_COPY`).
    pub fn attach_value_no_copy(&mut self, key: SlabKey, value: Bytes) -> Result<(), McreqError> {
        let pkt = self
            .pool
            .get_mut(key)
            .ok_or_else(|| McreqError::ProtocolError("attach_value_no_copy: unknown packet".into()))?;
        pkt.value = PacketValue::Owned(value);
        pkt.flags.insert(crate::flags::PacketFlags::HAS_VALUE);
        pkt.flags.insert(crate::flags::PacketFlags::VALUE_NO_COPY);
        Ok(())
    }

    /// Reserve a scatter/gather value (`VALUE_IOV`).
    pub fn attach_value_iov(&mut self, key: SlabKey, parts: Vec<Bytes>) -> Result<(), McreqError> {
        let pkt = self
            .pool
            .get_mut(key)
            .ok_or_else(|| McreqError::ProtocolError("attach_value_iov: unknown packet".into()))?;
        pkt.value = PacketValue::Iov(parts);
        pkt.flags.insert(crate::flags::PacketFlags::HAS_VALUE);
        pkt.flags.insert(crate::flags::PacketFlags::VALUE_IOV);
        Ok(())
    }

    /// Append a packet to the current scheduling scope. Only ever called
    /// through a [`crate::queue::ScheduleGuard`].
    pub(crate) fn sched_add(&mut self, key: SlabKey) {
        self.ctxqueued.push_back(key);
    }

    pub(crate) fn drain_ctxqueued_into_requests(&mut self) {
        while let Some(key) = self.ctxqueued.pop_front() {
            self.requests.push_back(key);
        }
    }

    pub(crate) fn drain_and_release_ctxqueued(&mut self) {
        while let Some(key) = self.ctxqueued.pop_front() {
            self.release_packet(key);
        }
    }

    /// Find a packet by opaque without removing it (for multi-response
    /// commands such as `stat`).
    pub fn find(&self, opaque: Opaque) -> Option<SlabKey> {
        self.requests
            .iter()
            .copied()
            .find(|&key| self.pool.get(key).map(|p| p.opaque) == Some(opaque))
    }

    /// Find and remove a packet by opaque.
    pub fn remove(&mut self, opaque: Opaque) -> Option<SlabKey> {
        let pos = self
            .requests
            .iter()
            .position(|&key| self.pool.get(key).map(|p| p.opaque) == Some(opaque))?;
        self.requests.remove(pos)
    }

    /// Insert an already-allocated packet into `requests`, keeping the
    /// ordering sorted oldest-start-first rather than simply appending
    /// (§4.2: `reenqueue_packet`). Used to put a relocated or retried
    /// packet back without letting it jump ahead of older pending work.
    pub fn reenqueue_packet(&mut self, key: SlabKey) {
        let start_ms = self.pool.get(key).map(|p| p.rdata.start_ms).unwrap_or(0);
        let pos = self
            .requests
            .iter()
            .position(|&k| self.pool.get(k).map(|p| p.rdata.start_ms).unwrap_or(0) > start_ms)
            .unwrap_or(self.requests.len());
        self.requests.insert(pos, key);
    }

    /// Mark a packet handled; release it immediately if it was already
    /// flushed (mirrors `mcreq_packet_handled`).
    pub fn packet_handled(&mut self, key: SlabKey) {
        if let Some(pkt) = self.pool.get_mut(key) {
            pkt.mark_invoked();
            if pkt.is_fully_released() {
                self.release_packet(key);
            }
        }
    }

    /// Mark a packet flushed; release it immediately if its handler already
    /// ran.
    pub fn packet_flushed(&mut self, key: SlabKey) {
        if let Some(pkt) = self.pool.get_mut(key) {
            pkt.mark_flushed();
            if pkt.is_fully_released() {
                self.release_packet(key);
            }
        }
    }

    /// Release a packet's storage unconditionally: its coalescing spans
    /// return to the free-list, its slab slot is freed, and (if set) the
    /// buf-done callback is notified so caller-owned buffers can be
    /// reclaimed too.
    pub fn release_packet(&mut self, key: SlabKey) {
        let Some(pkt) = self.pool.remove(key) else {
            return;
        };
        if !pkt.flags.contains(crate::flags::PacketFlags::KEY_NO_COPY) {
            self.buf.release(pkt.kh_span);
        }
        if let PacketValue::InPipeline(span) = pkt.value {
            self.buf.release(span);
        }
        if let Some(cb) = self.buf_done.as_mut() {
            cb(self.index, pkt.rdata.cookie);
        }
        trace!(pipeline = self.index.0, opaque = ?pkt.opaque, "packet released");
    }

    /// Remove every committed request, handing each to `callback` before
    /// its storage is released (§4.2: `pipeline_fail`).
    pub fn fail_all(&mut self, mut callback: impl FnMut(&Packet)) -> usize {
        let keys: Vec<SlabKey> = self.requests.drain(..).collect();
        let mut n = 0;
        for key in keys {
            if let Some(pkt) = self.pool.get(key) {
                callback(pkt);
            }
            self.packet_handled(key);
            n += 1;
        }
        n
    }

    /// Remove only requests older than `oldest_valid_ms`, handing each to
    /// `callback`. Returns the count removed and the start time of the
    /// oldest surviving request, if any (§4.2: `pipeline_timeout`).
    pub fn timeout_older_than(
        &mut self,
        oldest_valid_ms: u64,
        mut callback: impl FnMut(&Packet),
    ) -> (usize, Option<u64>) {
        let mut survivors = VecDeque::new();
        let mut removed = 0;
        let mut oldest_start = None;
        while let Some(key) = self.requests.pop_front() {
            let Some(pkt) = self.pool.get(key) else {
                continue;
            };
            if pkt.rdata.start_ms < oldest_valid_ms {
                callback(pkt);
                self.packet_handled(key);
                removed += 1;
            } else {
                oldest_start = Some(oldest_start.map_or(pkt.rdata.start_ms, |o: u64| {
                    o.min(pkt.rdata.start_ms)
                }));
                survivors.push_back(key);
            }
        }
        self.requests = survivors;
        (removed, oldest_start)
    }

    /// Drain every committed request (without regard to age), letting
    /// `callback` decide per-packet whether it should be kept in the
    /// pipeline or relocated elsewhere (§4.2: `iterwipe`).
    ///
    /// `Remove` only detaches the key from `requests`; it does not release
    /// the packet's slab slot or coalescing spans. The callback sees only
    /// `&Packet`, not `&mut CommandQueue`, so it cannot call
    /// [`crate::dispatch::dup_packet`] itself to relocate the packet during
    /// the walk. The expected caller shape is: call `iterwipe` to collect
    /// the keys marked `Remove` (e.g. via a `Cell`/`Vec` the closure pushes
    /// into), then for each, call `dup_packet` against the still-live
    /// source slot, and only then call [`Self::release_packet`] on the
    /// original key to reclaim it. Until that follow-up call, the detached
    /// packet stays allocated in the pool, reachable by key but absent from
    /// both `requests` and `ctxqueued`.
    pub fn iterwipe(&mut self, mut callback: impl FnMut(&Packet) -> IterwipeAction) {
        let keys: Vec<SlabKey> = self.requests.drain(..).collect();
        for key in keys {
            let action = match self.pool.get(key) {
                Some(pkt) => callback(pkt),
                None => continue,
            };
            match action {
                IterwipeAction::Keep => self.requests.push_back(key),
                IterwipeAction::Remove => {}
            }
        }
    }
}

/// Decision returned from an [`Pipeline::iterwipe`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterwipeAction {
    Keep,
    /// Detach from `requests` without freeing — see [`Pipeline::iterwipe`].
    Remove,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Cookie;

    fn rdata() -> ReqData {
        ReqData {
            cookie: Cookie(1),
            start_ms: 0,
        }
    }

    #[test]
    fn reserve_key_then_release_recovers_buffer_space() {
        let mut pl = Pipeline::new(ServerIndex(0));
        let key = pl.reserve_key(24, b"hello", Opaque(1), rdata());
        assert_eq!(pl.get(key).unwrap().kh_span.len, 29);
        pl.packet_flushed(key);
        pl.packet_handled(key);
        assert!(pl.get(key).is_none());
    }

    #[test]
    fn reserve_value2_exposes_writable_span() {
        let mut pl = Pipeline::new(ServerIndex(0));
        let key = pl.reserve_header(24, Opaque(2), rdata());
        {
            let buf = pl.reserve_value2(key, 4).unwrap();
            buf.copy_from_slice(b"data");
        }
        let pkt = pl.get(key).unwrap();
        assert_eq!(pl.packet_value(pkt).unwrap(), b"data");
    }

    #[test]
    fn find_and_remove_by_opaque() {
        let mut pl = Pipeline::new(ServerIndex(0));
        let key = pl.reserve_header(24, Opaque(9), rdata());
        pl.sched_add(key);
        pl.drain_ctxqueued_into_requests();
        assert_eq!(pl.find(Opaque(9)), Some(key));
        assert_eq!(pl.remove(Opaque(9)), Some(key));
        assert_eq!(pl.find(Opaque(9)), None);
    }

    #[test]
    fn fail_all_invokes_callback_and_empties_requests() {
        let mut pl = Pipeline::new(ServerIndex(0));
        let key = pl.reserve_header(24, Opaque(3), rdata());
        pl.sched_add(key);
        pl.drain_ctxqueued_into_requests();
        let mut seen = Vec::new();
        let n = pl.fail_all(|pkt| seen.push(pkt.opaque));
        assert_eq!(n, 1);
        assert_eq!(seen, vec![Opaque(3)]);
        assert_eq!(pl.requests_len(), 0);
    }

    #[test]
    fn timeout_older_than_keeps_recent_requests() {
        let mut pl = Pipeline::new(ServerIndex(0));
        let old = pl.reserve_header(
            24,
            Opaque(1),
            ReqData {
                cookie: Cookie(1),
                start_ms: 100,
            },
        );
        let fresh = pl.reserve_header(
            24,
            Opaque(2),
            ReqData {
                cookie: Cookie(1),
                start_ms: 900,
            },
        );
        pl.sched_add(old);
        pl.sched_add(fresh);
        pl.drain_ctxqueued_into_requests();
        let (removed, oldest_start) = pl.timeout_older_than(500, |_| {});
        assert_eq!(removed, 1);
        assert_eq!(oldest_start, Some(900));
        assert_eq!(pl.requests_len(), 1);
    }

    #[test]
    fn reenqueue_packet_preserves_start_time_order() {
        let mut pl = Pipeline::new(ServerIndex(0));
        let late = pl.reserve_header(
            24,
            Opaque(1),
            ReqData {
                cookie: Cookie(1),
                start_ms: 1_000,
            },
        );
        pl.sched_add(late);
        pl.drain_ctxqueued_into_requests();

        let early = pl.reserve_header(
            24,
            Opaque(2),
            ReqData {
                cookie: Cookie(1),
                start_ms: 100,
            },
        );
        pl.reenqueue_packet(early);

        let early_pos = pl.requests.iter().position(|&k| k == early).unwrap();
        let late_pos = pl.requests.iter().position(|&k| k == late).unwrap();
        assert!(early_pos < late_pos, "older start_ms must sort ahead of newer");
    }

    #[test]
    fn iterwipe_remove_detaches_without_freeing() {
        let mut pl = Pipeline::new(ServerIndex(0));
        let key = pl.reserve_header(24, Opaque(5), rdata());
        pl.sched_add(key);
        pl.drain_ctxqueued_into_requests();
        pl.iterwipe(|_| IterwipeAction::Remove);
        assert_eq!(pl.requests_len(), 0);
        assert!(pl.get(key).is_some(), "detached packet stays allocated until reclaimed");
        pl.release_packet(key);
        assert!(pl.get(key).is_none());
    }

    #[test]
    fn iterwipe_keep_leaves_packet_in_requests() {
        let mut pl = Pipeline::new(ServerIndex(0));
        let key = pl.reserve_header(24, Opaque(6), rdata());
        pl.sched_add(key);
        pl.drain_ctxqueued_into_requests();
        pl.iterwipe(|_| IterwipeAction::Keep);
        assert_eq!(pl.requests_len(), 1);
        assert!(pl.get(key).is_some());
    }
}
