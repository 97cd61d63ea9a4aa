//! Layered error taxonomy.
//!
//! Each subsystem gets its own `thiserror` enum so call sites can match on
//! the failure modes that actually apply to them (a packet allocator never
//! produces a `ConfigFetchFailure`, for instance). [`Error`] is the
//! crate-wide umbrella the rest of the workspace threads through `?`.

/// Stable error kinds surfaced by the memcached request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum McreqError {
    /// The packet allocator or coalescing buffer manager could not satisfy
    /// a reservation.
    #[error("out of memory reserving {requested} bytes in pipeline {server}")]
    OutOfMemory { server: usize, requested: usize },

    /// A response carried an opcode with no registered handler.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A pending request aged past its deadline.
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The vbucket map has no server slot for the computed vbucket.
    #[error("vbucket {vbucket} has no mapped server slot")]
    UnmappedVbucket { vbucket: u16 },
}

/// Stable error kinds surfaced by the socket-I/O driver.
#[derive(Debug, thiserror::Error)]
pub enum IoCtxError {
    /// A read or write syscall failed for a reason other than a clean
    /// shutdown.
    #[error("network error: {0}")]
    Network(String),

    /// The peer closed the connection (a `0`-byte read, or a closed
    /// completion).
    #[error("connection shut down by peer")]
    Shutdown,
}

/// Stable error kinds surfaced by the configuration monitor.
#[derive(Debug, thiserror::Error)]
pub enum ConfmonError {
    /// A single provider's `refresh` failed; the cursor advances to the
    /// next active provider.
    #[error("provider {provider:?} failed to fetch a configuration: {reason}")]
    ConfigFetchFailure {
        provider: crate::config_info::ProviderKind,
        reason: String,
    },

    /// Every active provider was tried in this cycle and none produced an
    /// acceptable configuration.
    #[error("all configuration providers were exhausted")]
    AllProvidersExhausted,
}

/// Crate-wide error enum threading the three subsystem taxonomies plus the
/// kinds that don't belong to any single one of them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Mcreq(#[from] McreqError),

    #[error(transparent)]
    IoCtx(#[from] IoCtxError),

    #[error(transparent)]
    Confmon(#[from] ConfmonError),
}

impl Error {
    /// True for kinds an external retry loop should act on by re-scheduling
    /// the affected work rather than surfacing the error to the end user.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::IoCtx(IoCtxError::Network(_)) | Error::Mcreq(McreqError::Timeout { .. })
        )
    }
}

/// Crate-wide result alias, analogous to `std::io::Result`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
