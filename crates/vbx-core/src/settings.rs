//! Tunables for the configuration monitor (§6, §2a). Centralized here
//! rather than threaded as bare constants so a single `Settings` value can
//! be logged, cloned into tests, and reloaded.

use std::time::Duration;

/// Grace periods the monitor enforces between provider attempts and full
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Minimum time between a `stop()` and the next full provider cycle.
    pub grace_next_cycle: Duration,
    /// Minimum time between consecutive providers within one cycle.
    pub grace_next_provider: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        // Matches the upstream client's documented defaults: a cycle may
        // restart immediately after a provider succeeds, but failed
        // providers are walked no faster than once every 100ms.
        Self {
            grace_next_cycle: Duration::from_millis(0),
            grace_next_provider: Duration::from_millis(100),
        }
    }
}

impl MonitorSettings {
    pub fn with_grace_next_cycle(mut self, grace: Duration) -> Self {
        self.grace_next_cycle = grace;
        self
    }

    pub fn with_grace_next_provider(mut self, grace: Duration) -> Self {
        self.grace_next_provider = grace;
        self
    }
}
