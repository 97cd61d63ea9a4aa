//! Shared data model for the vbucket-aware memcached client core.
//!
//! This crate carries the pieces every other `vbx-*` crate needs to agree on:
//! the stable error taxonomy (§7 of the design), the cluster configuration
//! contract (§6), the `ConfigInfo` comparison rule (§4.1), and the small set
//! of tunables (`MonitorSettings`) that drive grace periods in the
//! configuration monitor.

pub mod config;
pub mod config_info;
pub mod error;
pub mod ids;
pub mod settings;
pub mod time;

pub use config::{StructuralDiff, VbucketConfig};
pub use config_info::{ConfigInfo, ProviderKind};
pub use error::{ConfmonError, Error, IoCtxError, McreqError, Result};
pub use ids::{Opaque, ServerIndex, VbucketId};
pub use settings::MonitorSettings;
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
