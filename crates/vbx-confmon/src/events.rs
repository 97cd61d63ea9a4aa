//! Events the monitor publishes to its listeners (§6).

use std::sync::Arc;
use vbx_core::ConfigInfo;

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A strictly newer configuration was installed.
    GotNewConfig(Arc<ConfigInfo>),
    /// A configuration was seen (from cache or a fresh fetch) but rejected
    /// as not newer than what's already installed.
    GotAnyConfig(Arc<ConfigInfo>),
    /// Every active provider was tried this cycle with no acceptable
    /// config; the cursor has wrapped back to the first provider.
    ProvidersCycled,
    /// The monitor transitioned from refreshing to idle.
    MonitorStopped,
}

/// A sink for [`MonitorEvent`]s. `vbx-confmon` ships no listeners of its
/// own — this is the extension point an application hangs its own
/// bookkeeping off of (e.g. rebuilding a command queue's pipelines on
/// `GotNewConfig`).
pub trait ConfigListener: Send {
    fn on_event(&mut self, event: &MonitorEvent);
}
