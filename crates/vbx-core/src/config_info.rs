//! `ConfigInfo`: an owned configuration handle plus the bookkeeping needed
//! to order it against rivals from other providers (§3, §4.1).

use crate::config::VbucketConfig;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Which provider produced a `ConfigInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    File,
    Cccp,
    Http,
    User,
}

static NEXT_CLOCK: AtomicU64 = AtomicU64::new(1);

/// A reference-counted, immutable-once-published configuration.
///
/// `Arc<ConfigInfo>` is the reference-counted handle described in §3;
/// cloning bumps the refcount and the underlying [`VbucketConfig`] is never
/// mutated after construction.
#[derive(Debug)]
pub struct ConfigInfo {
    config: Arc<dyn VbucketConfig>,
    origin: ProviderKind,
    /// Monotonic counter assigned at creation, used to order configurations
    /// that don't expose a revision of their own.
    cmp_clock: u64,
}

impl ConfigInfo {
    /// Wrap a freshly parsed configuration, stamping it with the next
    /// comparison clock value. Called by providers, never by the monitor.
    pub fn new(config: Arc<dyn VbucketConfig>, origin: ProviderKind) -> Self {
        let cmp_clock = NEXT_CLOCK.fetch_add(1, AtomicOrdering::Relaxed);
        Self {
            config,
            origin,
            cmp_clock,
        }
    }

    pub fn config(&self) -> &Arc<dyn VbucketConfig> {
        &self.config
    }

    pub fn origin(&self) -> ProviderKind {
        self.origin
    }

    pub fn comparison_clock(&self) -> u64 {
        self.cmp_clock
    }

    /// Order two configurations per §4.1: prefer intrinsic revisions when
    /// both sides expose one, otherwise fall back to comparison clock.
    /// Equal clocks compare equal, which can only happen for `self`
    /// compared with itself (the clock is a strictly increasing counter).
    pub fn compare(a: &ConfigInfo, b: &ConfigInfo) -> Ordering {
        match (a.config.revision(), b.config.revision()) {
            (Some(ra), Some(rb)) => ra.cmp(&rb),
            _ => a.cmp_clock.cmp(&b.cmp_clock),
        }
    }
}
