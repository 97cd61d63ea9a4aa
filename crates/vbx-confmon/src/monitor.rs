//! The configuration monitor state machine (§4.1, §8). Pure and
//! synchronous: every method that cares about elapsed time takes an
//! explicit `now_ms` rather than reading a clock, so the whole acceptance
//! and cycling algorithm is unit-testable without real timers. `driver.rs`
//! is the only piece that actually waits on a `tokio::time::sleep`.

use crate::events::{ConfigListener, MonitorEvent};
use crate::provider::Provider;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};
use vbx_core::{ConfigInfo, ConfmonError, MonitorSettings};

/// What `do_next_provider` actually did this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextProviderOutcome {
    /// A provider further down the chain already had a usable config
    /// cached; it was installed (or rejected as stale) without a fetch.
    UsedCachedConfig,
    /// No cached config was usable; the current provider's `refresh` was
    /// invoked and the monitor is now waiting on `provider_success`/
    /// `provider_failed`.
    Refreshing,
    /// `prepare()` left no active providers to poll.
    NoActiveProviders,
}

/// What `provider_failed` did with the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailedOutcome {
    /// The report didn't come from the provider currently being polled
    /// (a response that arrived after the monitor already moved on, or
    /// after it stopped) — ignored.
    Ignored,
    /// Advanced to the next provider in the chain; caller should wait this
    /// many milliseconds, then call `do_next_provider` again.
    RetryAfter(u64),
    /// Every active provider failed this cycle; the cursor wrapped and the
    /// monitor stopped.
    ProvidersCycled,
}

/// The priority-chain poller described in §4.1. Owns the providers, the
/// last-installed configuration, and the grace-period bookkeeping that
/// keeps a flapping cluster from being hammered with fetches.
pub struct ConfigMonitor {
    providers: Vec<Box<dyn Provider>>,
    /// Indices into `providers` that passed `enabled()` as of the last
    /// `prepare()` call, in poll order.
    active: Vec<usize>,
    /// Index into `active` of the provider currently being polled.
    cur: usize,
    refreshing: bool,
    config: Option<Arc<ConfigInfo>>,
    listeners: Vec<Box<dyn ConfigListener>>,
    settings: MonitorSettings,
    last_stop_ms: u64,
    last_error: Option<ConfmonError>,
}

impl ConfigMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            providers: Vec::new(),
            active: Vec::new(),
            cur: 0,
            refreshing: false,
            config: None,
            listeners: Vec::new(),
            settings,
            last_stop_ms: 0,
            last_error: None,
        }
    }

    /// Register a provider. Returns its stable index, used by
    /// `provider_success`/`provider_failed` to identify which provider a
    /// report came from.
    pub fn add_provider(&mut self, provider: Box<dyn Provider>) -> usize {
        self.providers.push(provider);
        self.providers.len() - 1
    }

    pub fn add_listener(&mut self, listener: Box<dyn ConfigListener>) {
        self.listeners.push(listener);
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    pub fn current_config(&self) -> Option<&Arc<ConfigInfo>> {
        self.config.as_ref()
    }

    pub fn last_error(&self) -> Option<&ConfmonError> {
        self.last_error.as_ref()
    }

    /// Rebuild the active chain from `providers[i].enabled()`, pausing
    /// providers that dropped out. Called at the start of every cycle, not
    /// just once at construction, since `enabled()` can change at runtime
    /// (e.g. a user disables CCCP after a downgrade).
    fn prepare(&mut self) {
        let mut active = Vec::with_capacity(self.providers.len());
        for (idx, provider) in self.providers.iter_mut().enumerate() {
            if provider.enabled() {
                trace!(provider = ?provider.kind(), "provider enabled");
                active.push(idx);
            } else {
                debug!(provider = ?provider.kind(), "provider disabled, pausing");
                provider.pause();
            }
        }
        self.active = active;
        self.cur = 0;
    }

    fn current_provider_idx(&self) -> Option<usize> {
        self.active.get(self.cur).copied()
    }

    fn emit(&mut self, event: MonitorEvent) {
        for listener in &mut self.listeners {
            listener.on_event(&event);
        }
    }

    /// Begin a refresh cycle. Returns `None` if a cycle is already running
    /// or there are no active providers; otherwise the number of
    /// milliseconds the caller must wait (0 if the cycle can start
    /// immediately) before calling `do_next_provider(now_ms + delay)`.
    pub fn start(&mut self, now_ms: u64) -> Option<u64> {
        if self.refreshing {
            return None;
        }
        self.prepare();
        if self.active.is_empty() {
            return None;
        }
        let elapsed = now_ms.saturating_sub(self.last_stop_ms);
        let grace = self.settings.grace_next_cycle.as_millis() as u64;
        if elapsed < grace {
            return Some(grace - elapsed);
        }
        self.refreshing = true;
        Some(0)
    }

    /// Scan the active chain in priority order (independent of the cursor)
    /// for the first provider with a cached config and try to install it
    /// once. A reject falls through to refreshing whichever provider the
    /// cursor currently points at, exactly like a cache miss would.
    pub fn do_next_provider(&mut self, now_ms: u64) -> NextProviderOutcome {
        if self.active.is_empty() {
            return NextProviderOutcome::NoActiveProviders;
        }
        let cached = self
            .active
            .iter()
            .find_map(|&idx| self.providers[idx].get_cached());
        if let Some(info) = cached {
            debug!(origin = ?info.origin(), "cached config hit");
            if self.install(info, false, now_ms) {
                self.stop(now_ms);
                return NextProviderOutcome::UsedCachedConfig;
            }
        }
        let idx = self.active[self.cur];
        debug!(provider = ?self.providers[idx].kind(), "refresh start");
        self.providers[idx].refresh();
        NextProviderOutcome::Refreshing
    }

    /// A provider's fetch succeeded. Per the source's `provider_success`,
    /// the monitor always stops the cycle afterward regardless of whether
    /// `info` was actually accepted — a successful fetch means the
    /// provider is live, and further polling in this cycle would be
    /// redundant even if the config itself turned out to be stale.
    pub fn provider_success(&mut self, provider_idx: usize, info: Arc<ConfigInfo>, now_ms: u64) {
        if self.current_provider_idx() != Some(provider_idx) {
            trace!(provider_idx, "provider_success from non-current provider, ignored");
            return;
        }
        self.install(info, true, now_ms);
        self.stop(now_ms);
    }

    /// A provider's fetch failed. Ignored if it didn't come from the
    /// provider currently at the cursor (a stale callback from a provider
    /// the monitor already moved past, or one reporting in after the cycle
    /// stopped). Otherwise advances the cursor, cycling and stopping if
    /// that exhausts the chain.
    pub fn provider_failed(
        &mut self,
        provider_idx: usize,
        reason: Option<ConfmonError>,
        now_ms: u64,
    ) -> ProviderFailedOutcome {
        if !self.refreshing || self.current_provider_idx() != Some(provider_idx) {
            trace!(provider_idx, "provider_failed from a non-current provider, ignored");
            return ProviderFailedOutcome::Ignored;
        }
        debug!(provider_idx, reason = ?reason, "provider failed");
        self.last_error = reason;
        self.cur += 1;
        if self.cur >= self.active.len() {
            self.cur = 0;
            debug!("provider chain exhausted, cycling");
            self.emit(MonitorEvent::ProvidersCycled);
            // Routed through `stop()` rather than inlined so the active
            // providers are paused the same way any other stop pauses them.
            self.stop(now_ms);
            ProviderFailedOutcome::ProvidersCycled
        } else {
            let delay_ms = self.settings.grace_next_provider.as_millis() as u64;
            trace!(delay_ms, "advancing to next provider after grace period");
            ProviderFailedOutcome::RetryAfter(delay_ms)
        }
    }

    /// Pause every active provider and mark the cycle stopped. Synchronous
    /// — the source defers this through a timer to dodge reentering the
    /// event loop from inside a provider's own callback, but this state
    /// machine has no event loop of its own to reenter, so there's nothing
    /// to decouple from.
    pub fn stop(&mut self, now_ms: u64) -> bool {
        if !self.refreshing {
            return false;
        }
        for &idx in &self.active {
            self.providers[idx].pause();
        }
        debug!("monitor stopped");
        self.refreshing = false;
        self.last_stop_ms = now_ms;
        self.emit(MonitorEvent::MonitorStopped);
        true
    }

    /// Accept-or-reject algorithm: unconditional accept with nothing
    /// installed yet; otherwise reject if the candidate isn't structurally
    /// different, or isn't strictly newer by `ConfigInfo::compare`. A cache
    /// probe from `do_next_provider` passes `notify_miss = false` — a
    /// rejected cache hit is routine, not news; `provider_success` passes
    /// `true` since a rejected fresh fetch is still worth telling listeners
    /// about.
    fn install(&mut self, info: Arc<ConfigInfo>, notify_miss: bool, _now_ms: u64) -> bool {
        let accepted = match &self.config {
            None => true,
            Some(current) => {
                let structural = info.config().structural_diff(current.config().as_ref());
                structural.changed && ConfigInfo::compare(&info, current) == Ordering::Greater
            }
        };
        if accepted {
            debug!(origin = ?info.origin(), revision = ?info.config().revision(), "new config accepted");
            self.config = Some(info.clone());
            for provider in &mut self.providers {
                provider.config_updated(info.config());
            }
            self.emit(MonitorEvent::GotNewConfig(info));
        } else {
            trace!(origin = ?info.origin(), "candidate config rejected as not newer");
            if notify_miss {
                self.emit(MonitorEvent::GotAnyConfig(info));
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbx_core::config::StructuralDiff;
    use vbx_core::ids::{ServerIndex, VbucketId};
    use vbx_core::ProviderKind;

    #[derive(Debug)]
    struct StubConfig {
        revision: i64,
    }

    impl vbx_core::VbucketConfig for StubConfig {
        fn vbucket_for_key(&self, _key: &[u8]) -> VbucketId {
            VbucketId(0)
        }
        fn server_for_vbucket(&self, _vbucket: VbucketId) -> Option<ServerIndex> {
            Some(ServerIndex(0))
        }
        fn server_count(&self) -> usize {
            1
        }
        fn revision(&self) -> Option<i64> {
            Some(self.revision)
        }
        fn structural_diff(&self, other: &dyn vbx_core::VbucketConfig) -> StructuralDiff {
            if other.revision() == Some(self.revision) {
                StructuralDiff::UNCHANGED
            } else {
                StructuralDiff::CHANGED
            }
        }
    }

    fn info(revision: i64, kind: ProviderKind) -> Arc<ConfigInfo> {
        Arc::new(ConfigInfo::new(Arc::new(StubConfig { revision }), kind))
    }

    struct StubProvider {
        kind: ProviderKind,
        cached: Option<Arc<ConfigInfo>>,
        refreshed: std::cell::Cell<u32>,
    }

    impl StubProvider {
        fn new(kind: ProviderKind) -> Self {
            Self {
                kind,
                cached: None,
                refreshed: std::cell::Cell::new(0),
            }
        }
    }

    impl Provider for StubProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }
        fn refresh(&mut self) {
            self.refreshed.set(self.refreshed.get() + 1);
        }
        fn get_cached(&self) -> Option<Arc<ConfigInfo>> {
            self.cached.clone()
        }
        fn shutdown(self: Box<Self>) {}
    }

    #[test]
    fn start_with_no_providers_returns_none() {
        let mut mon = ConfigMonitor::new(MonitorSettings::default());
        assert_eq!(mon.start(0), None);
    }

    #[test]
    fn do_next_provider_uses_cached_config_without_refresh() {
        let mut mon = ConfigMonitor::new(MonitorSettings::default());
        let mut provider = StubProvider::new(ProviderKind::File);
        provider.cached = Some(info(1, ProviderKind::File));
        mon.add_provider(Box::new(provider));

        assert_eq!(mon.start(0), Some(0));
        let outcome = mon.do_next_provider(0);
        assert_eq!(outcome, NextProviderOutcome::UsedCachedConfig);
        assert!(mon.current_config().is_some());
        assert!(!mon.is_refreshing());
    }

    #[test]
    fn do_next_provider_without_cache_triggers_refresh() {
        let mut mon = ConfigMonitor::new(MonitorSettings::default());
        mon.add_provider(Box::new(StubProvider::new(ProviderKind::Cccp)));
        mon.start(0);
        let outcome = mon.do_next_provider(0);
        assert_eq!(outcome, NextProviderOutcome::Refreshing);
        assert!(mon.is_refreshing());
    }

    #[test]
    fn provider_failed_from_stale_provider_is_ignored() {
        let mut mon = ConfigMonitor::new(MonitorSettings::default());
        mon.add_provider(Box::new(StubProvider::new(ProviderKind::Cccp)));
        mon.add_provider(Box::new(StubProvider::new(ProviderKind::Http)));
        mon.start(0);
        mon.do_next_provider(0);
        // idx 1 is not the current provider (idx 0 is) — ignored.
        let outcome = mon.provider_failed(1, None, 10);
        assert_eq!(outcome, ProviderFailedOutcome::Ignored);
        assert!(mon.is_refreshing());
    }

    #[test]
    fn provider_failed_advances_then_cycles_when_exhausted() {
        let mut mon = ConfigMonitor::new(MonitorSettings::default());
        mon.add_provider(Box::new(StubProvider::new(ProviderKind::Cccp)));
        mon.add_provider(Box::new(StubProvider::new(ProviderKind::Http)));
        mon.start(0);
        mon.do_next_provider(0);

        let outcome = mon.provider_failed(0, None, 10);
        assert_eq!(outcome, ProviderFailedOutcome::RetryAfter(100));
        assert!(mon.is_refreshing());

        mon.do_next_provider(10);
        let outcome = mon.provider_failed(1, None, 20);
        assert_eq!(outcome, ProviderFailedOutcome::ProvidersCycled);
        assert!(!mon.is_refreshing());
    }

    #[test]
    fn provider_success_always_stops_even_when_config_rejected() {
        let mut mon = ConfigMonitor::new(MonitorSettings::default());
        mon.add_provider(Box::new(StubProvider::new(ProviderKind::Cccp)));
        mon.start(0);
        mon.do_next_provider(0);
        mon.provider_success(0, info(1, ProviderKind::Cccp), 5);
        assert!(!mon.is_refreshing());

        // A second cycle reports an older/unchanged revision — rejected,
        // but the monitor still stops rather than continuing to poll.
        mon.start(5);
        mon.do_next_provider(5);
        mon.provider_success(0, info(1, ProviderKind::Cccp), 6);
        assert!(!mon.is_refreshing());
        assert_eq!(mon.current_config().unwrap().comparison_clock(), mon.current_config().unwrap().comparison_clock());
    }

    #[test]
    fn start_honors_grace_next_cycle() {
        let settings = MonitorSettings::default().with_grace_next_cycle(std::time::Duration::from_millis(500));
        let mut mon = ConfigMonitor::new(settings);
        mon.add_provider(Box::new(StubProvider::new(ProviderKind::Cccp)));
        mon.start(0);
        mon.do_next_provider(0);
        mon.provider_failed(0, None, 0); // only provider, cycles immediately

        // Too soon — must wait out the remainder of the grace period.
        assert_eq!(mon.start(100), Some(400));
        // Now enough time has passed.
        assert_eq!(mon.start(500), Some(0));
    }

    #[test]
    fn disabled_provider_is_skipped_and_paused() {
        struct AlwaysDisabled(StubProvider, std::cell::Cell<u32>);
        impl Provider for AlwaysDisabled {
            fn kind(&self) -> ProviderKind {
                self.0.kind()
            }
            fn enabled(&self) -> bool {
                false
            }
            fn refresh(&mut self) {
                self.0.refresh();
            }
            fn pause(&mut self) {
                self.1.set(self.1.get() + 1);
            }
            fn shutdown(self: Box<Self>) {}
        }

        let mut mon = ConfigMonitor::new(MonitorSettings::default());
        mon.add_provider(Box::new(AlwaysDisabled(
            StubProvider::new(ProviderKind::File),
            std::cell::Cell::new(0),
        )));
        mon.add_provider(Box::new(StubProvider::new(ProviderKind::Cccp)));
        mon.start(0);
        let outcome = mon.do_next_provider(0);
        assert_eq!(outcome, NextProviderOutcome::Refreshing);
    }
}
