//! The command queue (§3, §4.2): the set of pipelines a configuration maps
//! onto, plus the two-phase scheduling transaction that keeps a batch of
//! commands from becoming visible (or flushable) until it's known to have
//! fully succeeded.

use crate::header::{Header, Magic, Opcode, HEADER_SIZE};
use crate::packet::{Cookie, Packet, ReqData};
use crate::pipeline::{IterwipeAction, Pipeline};
use std::sync::Arc;
use vbx_buffer::SlabKey;
use vbx_core::config::VbucketConfig;
use vbx_core::error::McreqError;
use vbx_core::ids::{Opaque, ServerIndex};

/// Owns one pipeline per server slot in the active configuration, plus the
/// opaque sequence counter used to correlate requests with responses.
pub struct CommandQueue {
    pipelines: Vec<Pipeline>,
    config: Option<Arc<dyn VbucketConfig>>,
    next_opaque: u32,
    /// Count of pending (not-yet-done) packets across every pipeline:
    /// committed by `sched_leave`, decremented as each finalizes.
    pending: usize,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            pipelines: Vec::new(),
            config: None,
            next_opaque: 1,
            pending: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Run a pipeline-finalizing operation and fold however many packets it
    /// actually released into `pending`. The pool shrinks by exactly the
    /// number of packets a call fully releases, which is the only place
    /// that count is visible from outside `Pipeline`'s own bookkeeping.
    fn finalize<T>(&mut self, server: ServerIndex, f: impl FnOnce(&mut Pipeline) -> T) -> Option<T> {
        let pl = self.pipelines.get_mut(server.0)?;
        let before = pl.pool_len();
        let result = f(pl);
        let after = pl.pool_len();
        self.pending = self.pending.saturating_sub(before.saturating_sub(after));
        Some(result)
    }

    /// Mirrors `Pipeline::packet_handled`, keeping `pending` in step.
    pub fn packet_handled(&mut self, server: ServerIndex, key: SlabKey) {
        self.finalize(server, |pl| pl.packet_handled(key));
    }

    /// Mirrors `Pipeline::packet_flushed`, keeping `pending` in step.
    pub fn packet_flushed(&mut self, server: ServerIndex, key: SlabKey) {
        self.finalize(server, |pl| pl.packet_flushed(key));
    }

    /// Mirrors `Pipeline::fail_all`, keeping `pending` in step.
    pub fn fail_all(&mut self, server: ServerIndex, callback: impl FnMut(&Packet)) -> usize {
        self.finalize(server, |pl| pl.fail_all(callback)).unwrap_or(0)
    }

    /// Mirrors `Pipeline::timeout_older_than`, keeping `pending` in step.
    pub fn timeout_older_than(
        &mut self,
        server: ServerIndex,
        oldest_valid_ms: u64,
        callback: impl FnMut(&Packet),
    ) -> (usize, Option<u64>) {
        self.finalize(server, |pl| pl.timeout_older_than(oldest_valid_ms, callback))
            .unwrap_or((0, None))
    }

    /// Mirrors `Pipeline::iterwipe`, keeping `pending` in step. `Remove`
    /// only detaches the packet within the pipeline's own walk (see
    /// `Pipeline::iterwipe`), so this wrapper does not fold in a decrement
    /// for it — the eventual `release_packet` reclaim after relocation is
    /// what actually shrinks the pool, and callers reach that through
    /// `Pipeline` directly once they hold the pipeline post-relocation.
    pub fn iterwipe(&mut self, server: ServerIndex, callback: impl FnMut(&Packet) -> IterwipeAction) {
        if let Some(pl) = self.pipelines.get_mut(server.0) {
            pl.iterwipe(callback);
        }
    }

    /// Replace the pipeline set and active configuration. The queue does
    /// not own the configuration's lifetime beyond holding the `Arc`.
    pub fn set_pipelines(&mut self, pipelines: Vec<Pipeline>, config: Arc<dyn VbucketConfig>) {
        self.pipelines = pipelines;
        self.config = Some(config);
    }

    /// Hand the pipeline array back to the caller (e.g. during a topology
    /// swap), leaving the queue without an active configuration until
    /// `set_pipelines` is called again.
    pub fn take_pipelines(&mut self) -> Vec<Pipeline> {
        self.config = None;
        std::mem::take(&mut self.pipelines)
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn pipeline_mut(&mut self, index: ServerIndex) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(index.0)
    }

    pub fn pipeline(&self, index: ServerIndex) -> Option<&Pipeline> {
        self.pipelines.get(index.0)
    }

    fn next_opaque(&mut self) -> Opaque {
        let v = self.next_opaque;
        self.next_opaque = self.next_opaque.wrapping_add(1);
        Opaque(v)
    }

    /// Open a scheduling scope. Every `sched_add` made through the returned
    /// guard stays invisible to `requests`/flush ordering until `leave` or
    /// `fail` consumes it.
    pub fn sched_enter(&mut self) -> ScheduleGuard<'_> {
        ScheduleGuard {
            queue: self,
            committed: false,
        }
    }

    /// Handle the common case shared by every command: hash the key,
    /// locate its pipeline, and reserve a header+key span with the vbucket
    /// id and key length already filled in (§4.2: `mcreq_basic_packet`).
    ///
    /// Returns the packet's slab key, the pipeline index it landed on, and
    /// the opaque assigned to it. The caller still owns writing the opcode,
    /// extras, and value.
    pub fn basic_packet(
        &mut self,
        key: &[u8],
        extras_len: u8,
        opcode: Opcode,
        cookie: Cookie,
        start_ms: u64,
    ) -> Result<(ServerIndex, SlabKey, Opaque), McreqError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| McreqError::ProtocolError("no active configuration".into()))?;
        let vbucket = config.vbucket_for_key(key);
        let server = config
            .server_for_vbucket(vbucket)
            .ok_or(McreqError::UnmappedVbucket { vbucket: vbucket.0 })?;
        let pipeline = self
            .pipelines
            .get_mut(server.0)
            .ok_or(McreqError::UnmappedVbucket { vbucket: vbucket.0 })?;

        let opaque = self.next_opaque();
        let hdrsize = HEADER_SIZE as u8 + extras_len;
        let pkt_key = pipeline.reserve_key(hdrsize, key, opaque, ReqData { cookie, start_ms });

        let header = Header {
            magic: Magic::Request,
            opcode,
            key_len: key.len() as u16,
            extras_len,
            data_type: 0,
            vbucket_or_status: vbucket.0,
            body_len: 0,
            opaque: opaque.0,
            cas: 0,
        };
        let span = pipeline.get(pkt_key).expect("just inserted").kh_span;
        pipeline
            .header_bytes_mut(span)
            .copy_from_slice(&header.encode());

        Ok((server, pkt_key, opaque))
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII scheduling transaction (§4.2). Must be consumed via [`Self::leave`]
/// or [`Self::fail`] — dropping it uncommitted is a bug in the caller and
/// panics in debug builds, mirroring the source's documented requirement
/// that `sched_enter`/`sched_leave` always pair up.
pub struct ScheduleGuard<'a> {
    queue: &'a mut CommandQueue,
    committed: bool,
}

impl ScheduleGuard<'_> {
    /// Add a packet, already reserved against `server`'s pipeline, to this
    /// scheduling scope.
    pub fn sched_add(&mut self, server: ServerIndex, key: SlabKey) {
        if let Some(pl) = self.queue.pipelines.get_mut(server.0) {
            pl.sched_add(key);
        }
    }

    /// Commit every packet added in this scope into its pipeline's request
    /// ordering, optionally requesting a flush on every touched pipeline.
    pub fn leave(mut self, do_flush: bool) {
        self.committed = true;
        for pl in self.queue.pipelines.iter_mut() {
            let moved = pl.ctxqueued_len();
            if moved == 0 {
                continue;
            }
            pl.drain_ctxqueued_into_requests();
            self.queue.pending += moved;
            if do_flush {
                pl.request_flush();
            }
        }
    }

    /// Abort the scope: every packet added since `sched_enter` is released
    /// back to its pipeline rather than becoming visible.
    pub fn fail(mut self) {
        self.committed = true;
        for pl in self.queue.pipelines.iter_mut() {
            pl.drain_and_release_ctxqueued();
        }
    }
}

impl Drop for ScheduleGuard<'_> {
    fn drop(&mut self) {
        debug_assert!(
            self.committed,
            "ScheduleGuard dropped without calling leave() or fail()"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbx_core::ids::VbucketId;

    #[derive(Debug)]
    struct OneServerConfig;

    impl VbucketConfig for OneServerConfig {
        fn vbucket_for_key(&self, _key: &[u8]) -> VbucketId {
            VbucketId(0)
        }
        fn server_for_vbucket(&self, _vbucket: VbucketId) -> Option<ServerIndex> {
            Some(ServerIndex(0))
        }
        fn server_count(&self) -> usize {
            1
        }
    }

    fn queue_with_one_pipeline() -> CommandQueue {
        let mut q = CommandQueue::new();
        q.set_pipelines(vec![Pipeline::new(ServerIndex(0))], Arc::new(OneServerConfig));
        q
    }

    #[test]
    fn basic_packet_reserves_header_with_vbucket_and_opaque() {
        let mut q = queue_with_one_pipeline();
        let (server, key, opaque) = q
            .basic_packet(b"user:1", 0, Opcode::Get, Cookie(1), 0)
            .unwrap();
        assert_eq!(server, ServerIndex(0));
        let pl = q.pipeline(server).unwrap();
        let pkt = pl.get(key).unwrap();
        assert_eq!(pkt.opaque, opaque);
        let decoded = Header::decode(pl.header_bytes(pkt)).unwrap();
        assert_eq!(decoded.opaque, opaque.0);
        assert_eq!(decoded.key_len, 6);
    }

    #[test]
    fn sched_leave_commits_into_requests() {
        let mut q = queue_with_one_pipeline();
        let (server, key, _) = q.basic_packet(b"k", 0, Opcode::Get, Cookie(1), 0).unwrap();
        let mut guard = q.sched_enter();
        guard.sched_add(server, key);
        guard.leave(false);
        assert_eq!(q.pipeline(server).unwrap().requests_len(), 1);
    }

    #[test]
    fn sched_leave_increments_pending_and_finalize_decrements_it() {
        let mut q = queue_with_one_pipeline();
        let (server, key, _) = q.basic_packet(b"k", 0, Opcode::Get, Cookie(1), 0).unwrap();
        let mut guard = q.sched_enter();
        guard.sched_add(server, key);
        guard.leave(false);
        assert_eq!(q.pending(), 1);

        q.packet_flushed(server, key);
        assert_eq!(q.pending(), 1, "not released until invoked too");
        q.packet_handled(server, key);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn sched_fail_does_not_touch_pending() {
        let mut q = queue_with_one_pipeline();
        let (server, key, _) = q.basic_packet(b"k", 0, Opcode::Get, Cookie(1), 0).unwrap();
        let mut guard = q.sched_enter();
        guard.sched_add(server, key);
        guard.fail();
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn fail_all_decrements_pending_by_released_count() {
        let mut q = queue_with_one_pipeline();
        let (server, key, _) = q.basic_packet(b"k", 0, Opcode::Get, Cookie(1), 0).unwrap();
        let mut guard = q.sched_enter();
        guard.sched_add(server, key);
        guard.leave(false);
        q.packet_flushed(server, key);
        assert_eq!(q.pending(), 1);

        let n = q.fail_all(server, |_| {});
        assert_eq!(n, 1);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn sched_fail_releases_without_committing() {
        let mut q = queue_with_one_pipeline();
        let (server, key, _) = q.basic_packet(b"k", 0, Opcode::Get, Cookie(1), 0).unwrap();
        let mut guard = q.sched_enter();
        guard.sched_add(server, key);
        guard.fail();
        let pl = q.pipeline(server).unwrap();
        assert_eq!(pl.requests_len(), 0);
        assert!(pl.get(key).is_none());
    }
}
