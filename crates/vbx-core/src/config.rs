//! The cluster configuration contract (§6). The core never parses or
//! constructs these objects itself — providers hand it an `Arc<dyn
//! VbucketConfig>` and the core only ever routes and compares through the
//! trait.

use crate::ids::{ServerIndex, VbucketId};
use std::fmt;

/// Result of comparing two configurations structurally, independent of
/// revision or comparison-clock ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuralDiff {
    /// `false` means "no changes of interest" — the monitor will reject the
    /// candidate even if it otherwise compares newer.
    pub changed: bool,
}

impl StructuralDiff {
    pub const UNCHANGED: StructuralDiff = StructuralDiff { changed: false };
    pub const CHANGED: StructuralDiff = StructuralDiff { changed: true };
}

/// A parsed cluster topology: key→vbucket and vbucket→server-slot maps,
/// plus enough metadata to order rival configurations.
///
/// Implementations are opaque to the core; only this trait's surface is a
/// contract. `vbx-core` ships no implementation — providers own parsing.
pub trait VbucketConfig: fmt::Debug + Send + Sync {
    /// Hash `key` (or an explicit hashkey the caller substitutes) into its
    /// owning vbucket.
    fn vbucket_for_key(&self, key: &[u8]) -> VbucketId;

    /// Map a vbucket to the server slot currently responsible for it.
    /// `None` means the vbucket is unmapped (usually mid-rebalance).
    fn server_for_vbucket(&self, vbucket: VbucketId) -> Option<ServerIndex>;

    /// Number of server slots in this configuration's pipeline array.
    fn server_count(&self) -> usize;

    /// The configuration's intrinsic revision, if the encoded payload
    /// carries one. `None` forces the caller back onto comparison-clock
    /// ordering.
    fn revision(&self) -> Option<i64> {
        None
    }

    /// Structural comparison against another configuration of the same
    /// kind. A `false` result short-circuits adoption in the configuration
    /// monitor's install algorithm even when revision or clock ordering
    /// would otherwise accept `other`.
    fn structural_diff(&self, other: &dyn VbucketConfig) -> StructuralDiff;
}
