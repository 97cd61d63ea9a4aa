//! Small newtypes so opaques, vbucket ids, and server slots can't be
//! swapped for each other or for a bare integer by accident.

use std::fmt;

/// 32-bit request correlator echoed back by the server in its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opaque(pub u32);

impl fmt::Display for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A shard id computed deterministically from a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VbucketId(pub u16);

/// A stable integer identifying a physical server in the current
/// configuration; also the index into the command queue's pipeline array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerIndex(pub usize);
