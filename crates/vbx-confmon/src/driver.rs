//! A thin tokio wrapper around [`ConfigMonitor`] (§5). The monitor itself
//! takes no clock and blocks on nothing; this module is the only place
//! that actually calls `tokio::time::sleep`, and the only place a
//! `dyn Clock` other than a test's `ManualClock` gets used.
//!
//! Per §5 the monitor runs single-threaded and cooperatively — `ConfmonHandle`
//! is `Rc`-based, not `Arc`, and is meant to live on one `LocalSet`.

use crate::monitor::{ConfigMonitor, NextProviderOutcome, ProviderFailedOutcome};
use crate::provider::Provider;
use crate::events::ConfigListener;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use vbx_core::{Clock, ConfigInfo, ConfmonError, MonitorSettings};

/// Shared handle onto a running monitor. Cheap to clone — clones all share
/// the same underlying state, the way callers hand a handle to each
/// provider so its fetch-completion callback can report back in.
#[derive(Clone)]
pub struct ConfmonHandle {
    monitor: Rc<RefCell<ConfigMonitor>>,
    clock: Arc<dyn Clock>,
}

impl ConfmonHandle {
    pub fn new(settings: MonitorSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            monitor: Rc::new(RefCell::new(ConfigMonitor::new(settings))),
            clock,
        }
    }

    pub fn add_provider(&self, provider: Box<dyn Provider>) -> usize {
        self.monitor.borrow_mut().add_provider(provider)
    }

    pub fn add_listener(&self, listener: Box<dyn ConfigListener>) {
        self.monitor.borrow_mut().add_listener(listener);
    }

    pub fn current_config(&self) -> Option<Arc<ConfigInfo>> {
        self.monitor.borrow().current_config().cloned()
    }

    fn now_ms(&self) -> u64 {
        self.clock.now().0
    }

    /// Start a cycle (waiting out any `grace_next_cycle` remainder) and run
    /// the first step. Returns the step's outcome; a `Refreshing` result
    /// means the caller should expect `report_success`/`report_failure` to
    /// be called later once the polled provider's fetch completes.
    pub async fn run_cycle(&self) -> Option<NextProviderOutcome> {
        let delay = self.monitor.borrow_mut().start(self.now_ms())?;
        if delay > 0 {
            trace!(delay_ms = delay, "waiting out grace_next_cycle before starting");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Some(self.monitor.borrow_mut().do_next_provider(self.now_ms()))
    }

    /// Report a provider's successful fetch. Mirrors
    /// `ConfigMonitor::provider_success` with the wall clock filled in.
    pub fn report_success(&self, provider_idx: usize, info: Arc<ConfigInfo>) {
        let now = self.now_ms();
        self.monitor.borrow_mut().provider_success(provider_idx, info, now);
    }

    /// Report a provider's failed fetch, then — if the chain hasn't been
    /// exhausted — wait out `grace_next_provider` and advance to the next
    /// provider automatically.
    pub async fn report_failure(&self, provider_idx: usize, reason: Option<ConfmonError>) {
        let now = self.now_ms();
        let outcome = self.monitor.borrow_mut().provider_failed(provider_idx, reason, now);
        if let ProviderFailedOutcome::RetryAfter(delay_ms) = outcome {
            trace!(delay_ms, "waiting out grace_next_provider before next provider");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let now = self.now_ms();
            self.monitor.borrow_mut().do_next_provider(now);
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.monitor.borrow().is_refreshing()
    }
}
