//! A concrete event-mode driver over `tokio::net::TcpStream`.
//!
//! This is deliberately the only place in the crate that knows about an
//! actual socket. Everything else — [`crate::ctx::IoCtx`], the buffer
//! machinery — stays transport-agnostic so it can be driven by a mock in
//! tests or, eventually, a completion-mode reactor on platforms where that
//! matters.

use crate::ctx::{CtxState, IoCtx};
use crate::transport::RawTransport;
use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Socket-level tuning applied once before a stream is handed to
/// `run_event_loop`. Keeps callers from pulling in `socket2` themselves
/// just to set `SO_LINGER` ahead of a flush-then-close.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
}

impl TcpSocketConfig {
    pub const fn new() -> Self {
        Self { linger: None }
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    /// Apply via `socket2::SockRef`, which exposes `SO_LINGER` that
    /// `tokio::net::TcpStream` itself does not.
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        SockRef::from(stream).set_linger(self.linger)
    }
}

struct TcpTransport<'a>(&'a TcpStream);

impl RawTransport for TcpTransport<'_> {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }

    fn try_write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.0.try_write_vectored(bufs)
    }
}

/// Drive `ctx` off `stream`'s readiness until the context detaches (either
/// through a latched error or an explicit `close_ex`). Intended to be
/// spawned as its own task per connection, mirroring one pipeline owning
/// one context owning one socket. `socket_config` is applied once before
/// the loop starts.
pub async fn run_event_loop(
    ctx: &mut IoCtx,
    stream: &TcpStream,
    socket_config: TcpSocketConfig,
) -> io::Result<()> {
    socket_config.apply(stream)?;
    loop {
        if ctx.state() == CtxState::Detached {
            return Ok(());
        }
        let mut transport = TcpTransport(stream);
        if ctx.want_write() {
            tokio::select! {
                r = stream.readable() => {
                    r?;
                    ctx.pump_readable(&mut transport);
                }
                w = stream.writable() => {
                    w?;
                    ctx.pump_writable(&mut transport);
                }
            }
        } else {
            stream.readable().await?;
            ctx.pump_readable(&mut transport);
        }
    }
}
