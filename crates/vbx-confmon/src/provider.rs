//! The configuration-provider interface (§4.4). A provider is a source of
//! cluster topology — CCCP, HTTP streaming, a static file, or a
//! user-injected config — wired into the monitor's priority chain.
//!
//! This crate ships no providers. Wire formats are out of scope (§6); only
//! the contract each provider must satisfy lives here.

use std::sync::Arc;
use vbx_core::config::VbucketConfig;
use vbx_core::config_info::ProviderKind;
use vbx_core::ConfigInfo;

/// One entry in the monitor's priority chain.
pub trait Provider: Send {
    fn kind(&self) -> ProviderKind;

    /// Whether this provider currently participates in the active chain.
    /// Checked at `prepare` time; a disabled provider is paused instead of
    /// polled.
    fn enabled(&self) -> bool {
        true
    }

    /// Kick off an out-of-band fetch. The result reaches the monitor later
    /// through `ConfigMonitor::provider_success`/`provider_failed` — this
    /// method itself never blocks or returns a value.
    fn refresh(&mut self);

    /// A configuration this provider already has on hand without a fetch
    /// (e.g. the last CCCP push, or a static file already read). Checked
    /// before `refresh` is invoked so a cheap cache hit can short-circuit a
    /// network round trip.
    fn get_cached(&self) -> Option<Arc<ConfigInfo>> {
        None
    }

    /// Called when this provider is taken out of the active chain (another
    /// provider produced the config, or the monitor stopped). Providers
    /// that poll or hold a connection should quiesce here.
    fn pause(&mut self) {}

    /// Called whenever any provider's config is installed, including when
    /// a different provider produced it — so e.g. a CCCP provider can learn
    /// the new node list.
    fn config_updated(&mut self, _config: &Arc<dyn VbucketConfig>) {}

    fn shutdown(self: Box<Self>);
}
