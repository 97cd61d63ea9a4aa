//! The socket context itself (§4.3).
//!
//! `IoCtx` owns the receive chain, the output ring, and the callback set a
//! pipeline registers against a connection. It knows nothing about sockets;
//! a driver (readiness-based or completion-based) feeds it bytes and
//! readiness signals and it decides what happens next.

use crate::mode::IoMode;
use crate::transport::RawTransport;
use std::cell::Cell;
use std::io;
use vbx_buffer::{ReadBufferChain, RingBuffer};
use vbx_core::error::IoCtxError;

/// Lifecycle state of a context. Once `Detached`, no further I/O is
/// attempted even if the underlying transport is still technically open —
/// this is what makes `close_ex` safe to call from inside a callback that's
/// itself running off this same context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxState {
    Active,
    Detached,
}

/// Scratch read size for event-mode pumping.
const READ_CHUNK: usize = 16 * 1024;

/// RAII re-entrancy guard. Every public entry point that touches the
/// transport takes one; while held, nested entry attempts are deflected
/// into the pending-work flags rather than re-running the same loop on
/// the same stack, which is what the source's `entered` counter exists to
/// prevent.
struct EnteredGuard<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for EnteredGuard<'_> {
    fn drop(&mut self) {
        let d = self.depth.get();
        debug_assert!(d > 0, "entered counter underflow");
        self.depth.set(d - 1);
    }
}

/// Default read-want threshold: fire `on_read` as soon as any byte has
/// arrived, i.e. behave like a plain per-chunk callback until the caller
/// raises it with [`IoCtx::with_rdwant`].
const DEFAULT_RDWANT: usize = 1;

#[derive(Default)]
struct Callbacks {
    on_read: Option<Box<dyn FnMut(&mut ReadBufferChain) + Send>>,
    on_error: Option<Box<dyn FnMut(&IoCtxError) + Send>>,
    on_flush_done: Option<Box<dyn FnMut() + Send>>,
    /// Fired on every writable edge while `wwant()` is in effect, before the
    /// ring is drained onto the transport — the caller's chance to top the
    /// ring off via `put_ex` with whatever it has ready to send.
    on_flush_ready: Option<Box<dyn FnMut(&mut IoCtx) + Send>>,
}

pub struct IoCtx {
    mode: IoMode,
    state: CtxState,
    entered: Cell<u32>,
    pending_read: Cell<bool>,
    pending_write: Cell<bool>,
    /// Latched first error (§9: "senderr"). Once set, it is never
    /// overwritten — the first failure is the one that explains the close.
    error: Option<IoCtxError>,
    want_write: bool,
    rdwant: usize,
    rdb: ReadBufferChain,
    wbuf: RingBuffer,
    callbacks: Callbacks,
}

impl IoCtx {
    pub fn new(mode: IoMode) -> Self {
        Self {
            mode,
            state: CtxState::Active,
            entered: Cell::new(0),
            pending_read: Cell::new(false),
            pending_write: Cell::new(false),
            error: None,
            want_write: false,
            rdwant: DEFAULT_RDWANT,
            rdb: ReadBufferChain::new(),
            wbuf: RingBuffer::new(),
            callbacks: Callbacks::default(),
        }
    }

    /// Set the read-want threshold: `on_read` only fires once at least
    /// `n` bytes have accumulated in the read chain since the callback last
    /// consumed them.
    pub fn with_rdwant(mut self, n: usize) -> Self {
        self.rdwant = n.max(1);
        self
    }

    pub fn mode(&self) -> IoMode {
        self.mode
    }

    pub fn state(&self) -> CtxState {
        self.state
    }

    pub fn error(&self) -> Option<&IoCtxError> {
        self.error.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state == CtxState::Active
    }

    pub fn want_write(&self) -> bool {
        self.want_write
    }

    pub fn on_read(mut self, f: impl FnMut(&mut ReadBufferChain) + Send + 'static) -> Self {
        self.callbacks.on_read = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&IoCtxError) + Send + 'static) -> Self {
        self.callbacks.on_error = Some(Box::new(f));
        self
    }

    pub fn on_flush_done(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.callbacks.on_flush_done = Some(Box::new(f));
        self
    }

    /// Fired on every writable edge while write-want is in effect, before
    /// the output ring is drained — the callback's job is to call
    /// [`Self::put_ex`] with whatever is ready to go out.
    pub fn on_flush_ready(mut self, f: impl FnMut(&mut IoCtx) + Send + 'static) -> Self {
        self.callbacks.on_flush_ready = Some(Box::new(f));
        self
    }

    /// Queue bytes for output. Does not itself request write readiness —
    /// call [`Self::wwant`] for that. The inverted contract is: `wwant()`
    /// arms `on_flush_ready`, which is invoked on the next writable edge,
    /// and it's from inside that callback (or any time beforehand) that the
    /// caller is expected to call `put_ex`.
    pub fn put_ex(&mut self, data: &[u8]) {
        if !self.is_active() {
            return;
        }
        self.wbuf.push(data);
    }

    /// Request write readiness: arms `on_flush_ready` to fire on the next
    /// writable edge. Idempotent.
    pub fn wwant(&mut self) {
        if self.is_active() {
            self.want_write = true;
        }
    }

    fn fire_flush_ready(&mut self) {
        if let Some(mut cb) = self.callbacks.on_flush_ready.take() {
            cb(self);
            self.callbacks.on_flush_ready = Some(cb);
        }
    }

    fn enter(&self) -> (EnteredGuard<'_>, bool) {
        let prev = self.entered.get();
        self.entered.set(prev + 1);
        (EnteredGuard { depth: &self.entered }, prev == 0)
    }

    /// Latch the first fatal error, fire the error callback, and detach.
    /// A context that already has a latched error or is already detached
    /// ignores later calls — the first failure wins.
    pub fn senderr(&mut self, err: IoCtxError) {
        if self.error.is_some() || self.state == CtxState::Detached {
            return;
        }
        self.error = Some(err);
        self.state = CtxState::Detached;
        if let Some(cb) = self.callbacks.on_error.as_mut() {
            cb(self.error.as_ref().expect("just set"));
        }
    }

    /// Detach the context without necessarily treating it as an error —
    /// the caller (e.g. a pipeline shutting its connection down on
    /// purpose) chooses whether that counts as a failure.
    pub fn close_ex(&mut self) {
        self.state = CtxState::Detached;
    }

    // ---- event-mode driving -------------------------------------------

    /// Drain as many bytes as the transport has ready, dispatching
    /// `on_read` after each chunk, until it would block or fails. Valid
    /// only in [`IoMode::Event`].
    pub fn pump_readable(&mut self, transport: &mut dyn RawTransport) {
        debug_assert_eq!(self.mode, IoMode::Event);
        let (_guard, outermost) = self.enter();
        if !outermost {
            self.pending_read.set(true);
            tracing::trace!("deferred re-entrant pump_readable");
            return;
        }
        self.do_pump_readable(transport);
        self.drain_pending(transport);
    }

    /// Drain the output ring onto the transport until it would block, the
    /// ring empties (firing `on_flush_done`), or it fails. Valid only in
    /// [`IoMode::Event`].
    pub fn pump_writable(&mut self, transport: &mut dyn RawTransport) {
        debug_assert_eq!(self.mode, IoMode::Event);
        let (_guard, outermost) = self.enter();
        if !outermost {
            self.pending_write.set(true);
            tracing::trace!("deferred re-entrant pump_writable");
            return;
        }
        self.do_pump_writable(transport);
        self.drain_pending(transport);
    }

    fn drain_pending(&mut self, transport: &mut dyn RawTransport) {
        loop {
            if self.pending_read.replace(false) {
                self.do_pump_readable(transport);
                continue;
            }
            if self.pending_write.replace(false) {
                self.do_pump_writable(transport);
                continue;
            }
            break;
        }
    }

    fn do_pump_readable(&mut self, transport: &mut dyn RawTransport) {
        if !self.is_active() {
            return;
        }
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            match transport.try_read(&mut scratch) {
                Ok(0) => {
                    self.senderr(IoCtxError::Shutdown);
                    return;
                }
                Ok(n) => {
                    self.rdb.extend(&scratch[..n]);
                    if self.rdb.len() >= self.rdwant {
                        if let Some(cb) = self.callbacks.on_read.as_mut() {
                            cb(&mut self.rdb);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    self.senderr(IoCtxError::Network(e.to_string()));
                    return;
                }
            }
        }
    }

    fn do_pump_writable(&mut self, transport: &mut dyn RawTransport) {
        if !self.is_active() {
            return;
        }
        if self.want_write {
            self.fire_flush_ready();
        }
        loop {
            if self.wbuf.is_empty() {
                self.want_write = false;
                if let Some(cb) = self.callbacks.on_flush_done.as_mut() {
                    cb();
                }
                return;
            }
            let slices = self.wbuf.io_slices();
            match transport.try_write_vectored(&slices) {
                Ok(0) => return,
                Ok(n) => {
                    drop(slices);
                    self.wbuf.consume(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    self.senderr(IoCtxError::Network(e.to_string()));
                    return;
                }
            }
        }
    }

    // ---- completion-mode driving ---------------------------------------

    /// Deliver the result of a previously posted read. Valid only in
    /// [`IoMode::Completion`]; the driver is responsible for posting the
    /// next read.
    pub fn on_read_complete(&mut self, result: io::Result<&[u8]>) {
        debug_assert_eq!(self.mode, IoMode::Completion);
        let (_guard, outermost) = self.enter();
        if !outermost {
            tracing::warn!("re-entrant on_read_complete ignored");
            return;
        }
        if !self.is_active() {
            return;
        }
        match result {
            Ok(data) if data.is_empty() => self.senderr(IoCtxError::Shutdown),
            Ok(data) => {
                self.rdb.extend(data);
                if self.rdb.len() >= self.rdwant {
                    if let Some(cb) = self.callbacks.on_read.as_mut() {
                        cb(&mut self.rdb);
                    }
                }
            }
            Err(e) => self.senderr(IoCtxError::Network(e.to_string())),
        }
    }

    /// Deliver the result of a previously posted write of `len` bytes.
    pub fn on_write_complete(&mut self, len: usize, result: io::Result<usize>) {
        debug_assert_eq!(self.mode, IoMode::Completion);
        let (_guard, outermost) = self.enter();
        if !outermost {
            tracing::warn!("re-entrant on_write_complete ignored");
            return;
        }
        if !self.is_active() {
            return;
        }
        match result {
            Ok(n) => {
                self.wbuf.consume(n);
                if self.wbuf.is_empty() && self.want_write {
                    self.fire_flush_ready();
                }
                if n < len || self.wbuf.is_empty() {
                    self.want_write = false;
                    if let Some(cb) = self.callbacks.on_flush_done.as_mut() {
                        cb();
                    }
                }
            }
            Err(e) => self.senderr(IoCtxError::Network(e.to_string())),
        }
    }

    /// Bytes queued for output but not yet handed to the transport.
    pub fn pending_write_bytes(&self) -> usize {
        self.wbuf.len()
    }

    pub fn readable_len(&self) -> usize {
        self.rdb.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockTransport {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
        write_would_block_once: bool,
    }

    impl RawTransport for MockTransport {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }

        fn try_write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
            if self.write_would_block_once {
                self.write_would_block_once = false;
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let mut n = 0;
            for b in bufs {
                self.written.extend_from_slice(b);
                n += b.len();
            }
            Ok(n)
        }
    }

    #[test]
    fn pump_readable_delivers_bytes_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut ctx = IoCtx::new(IoMode::Event).on_read(move |rdb| {
            if let Some(chunk) = rdb.contiguous(rdb.len()) {
                seen_clone.lock().unwrap().extend_from_slice(&chunk);
                rdb.consume(chunk.len());
            }
        });
        let mut transport = MockTransport {
            reads: VecDeque::from([Ok(b"hello".to_vec())]),
            ..Default::default()
        };
        ctx.pump_readable(&mut transport);
        assert_eq!(&seen.lock().unwrap()[..], b"hello");
    }

    #[test]
    fn zero_length_read_latches_shutdown() {
        let mut ctx = IoCtx::new(IoMode::Event);
        let mut transport = MockTransport {
            reads: VecDeque::from([Ok(Vec::new())]),
            ..Default::default()
        };
        ctx.pump_readable(&mut transport);
        assert!(matches!(ctx.error(), Some(IoCtxError::Shutdown)));
        assert_eq!(ctx.state(), CtxState::Detached);
    }

    #[test]
    fn put_ex_then_pump_writable_flushes_and_fires_done() {
        let flushed = Arc::new(Mutex::new(false));
        let flushed_clone = flushed.clone();
        let mut ctx = IoCtx::new(IoMode::Event).on_flush_done(move || {
            *flushed_clone.lock().unwrap() = true;
        });
        ctx.put_ex(b"payload");
        ctx.wwant();
        assert!(ctx.want_write());
        let mut transport = MockTransport::default();
        ctx.pump_writable(&mut transport);
        assert_eq!(transport.written, b"payload");
        assert!(*flushed.lock().unwrap());
        assert!(!ctx.want_write());
    }

    #[test]
    fn wwant_without_pending_bytes_invokes_flush_ready_which_supplies_them() {
        let mut ctx = IoCtx::new(IoMode::Event).on_flush_ready(|ctx| {
            ctx.put_ex(b"from-callback");
        });
        ctx.wwant();
        let mut transport = MockTransport::default();
        ctx.pump_writable(&mut transport);
        assert_eq!(transport.written, b"from-callback");
        assert!(!ctx.want_write());
    }

    #[test]
    fn rdwant_holds_on_read_until_threshold_met() {
        let seen = Arc::new(Mutex::new(0usize));
        let seen_clone = seen.clone();
        let mut ctx = IoCtx::new(IoMode::Event)
            .with_rdwant(10)
            .on_read(move |rdb| {
                *seen_clone.lock().unwrap() = rdb.len();
            });
        let mut transport = MockTransport {
            reads: VecDeque::from([Ok(b"abc".to_vec())]),
            ..Default::default()
        };
        ctx.pump_readable(&mut transport);
        assert_eq!(*seen.lock().unwrap(), 0, "below rdwant threshold, on_read must not fire");
        assert_eq!(ctx.readable_len(), 3);

        let mut transport = MockTransport {
            reads: VecDeque::from([Ok(b"defghijk".to_vec())]),
            ..Default::default()
        };
        ctx.pump_readable(&mut transport);
        assert_eq!(*seen.lock().unwrap(), 11, "once accumulated bytes reach rdwant, on_read fires");
    }

    #[test]
    fn senderr_is_latched_once() {
        let mut ctx = IoCtx::new(IoMode::Event);
        ctx.senderr(IoCtxError::Network("first".into()));
        ctx.senderr(IoCtxError::Network("second".into()));
        assert_eq!(ctx.error().unwrap().to_string(), "network error: first");
    }

    #[test]
    fn close_ex_stops_further_pumping() {
        let mut ctx = IoCtx::new(IoMode::Event);
        ctx.close_ex();
        let mut transport = MockTransport {
            reads: VecDeque::from([Ok(b"ignored".to_vec())]),
            ..Default::default()
        };
        ctx.pump_readable(&mut transport);
        assert_eq!(ctx.readable_len(), 0);
    }

    #[test]
    fn completion_mode_read_complete_delivers_bytes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut ctx = IoCtx::new(IoMode::Completion).on_read(move |rdb| {
            if let Some(chunk) = rdb.contiguous(rdb.len()) {
                seen_clone.lock().unwrap().extend_from_slice(&chunk);
                rdb.consume(chunk.len());
            }
        });
        ctx.on_read_complete(Ok(b"via-iocp"));
        assert_eq!(&seen.lock().unwrap()[..], b"via-iocp");
    }

    #[test]
    fn completion_mode_empty_read_is_shutdown() {
        let mut ctx = IoCtx::new(IoMode::Completion);
        ctx.on_read_complete(Ok(&[]));
        assert!(matches!(ctx.error(), Some(IoCtxError::Shutdown)));
    }
}
