//! The cluster configuration monitor (§3, §4.1, §8): a priority chain of
//! [`Provider`]s polled in order, a pure [`ConfigMonitor`] state machine
//! that decides acceptance and cycling without touching a clock, and a
//! [`driver::ConfmonHandle`] that drives that state machine with real
//! timers on a single-threaded tokio runtime.

pub mod driver;
pub mod events;
pub mod monitor;
pub mod provider;

pub use driver::ConfmonHandle;
pub use events::{ConfigListener, MonitorEvent};
pub use monitor::{ConfigMonitor, NextProviderOutcome, ProviderFailedOutcome};
pub use provider::Provider;
