//! The non-blocking byte-transport contract an event-mode [`crate::IoCtx`]
//! drives. Completion-mode contexts don't need this trait at all — their
//! driver submits operations out of band and reports results directly.

use std::io;

/// A non-blocking duplex byte transport. `WouldBlock` means "try again once
/// the reactor says it's ready"; any other error is fatal and latches the
/// context's error state.
pub trait RawTransport: Send {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize>;
}
