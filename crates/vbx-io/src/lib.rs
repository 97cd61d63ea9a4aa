//! Socket-I/O driver (CTX/IOT, §4.3): a transport-agnostic context that can
//! be driven by either a readiness-based reactor ("event" mode) or a
//! posted-operation reactor ("completion" mode), behind one shared state
//! machine and one callback contract.
//!
//! `IoCtx` itself never touches a socket. It is handed bytes and readiness
//! notifications by a driver (see [`tokio_driver`]) and only ever decides
//! *what* to do with them — buffer, dispatch to a callback, or latch an
//! error. This mirrors the source design note that the context's
//! re-entrancy guard and error latch must behave identically regardless of
//! which reactor personality is driving it.

pub mod ctx;
pub mod mode;
pub mod tokio_driver;
pub mod transport;

pub use ctx::{CtxState, IoCtx};
pub use mode::IoMode;
pub use tokio_driver::TcpSocketConfig;
pub use transport::RawTransport;
