//! Error types.

use thiserror::Error;

/// Errors surfaced by the coordination store client.
///
/// Contention is not an error: `try_acquire`/`try_extend`/`try_release`
/// return `Ok(false)` when the key is held by someone else. Only genuine
/// connectivity failures end up here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection loss, command timeout, or failure to resolve a writable
    /// node in a sentinel topology.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// Timeout of a single store round trip.
    pub(crate) fn timeout(op: &str) -> Self {
        Self::Unavailable(format!("{op} timed out"))
    }
}

/// Configuration errors, fatal at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed store target URL.
    #[error("Invalid store target: {0}")]
    InvalidTarget(String),

    /// Sentinel targets require a named master group.
    #[error("master_name must be set for sentinel targets")]
    MissingMasterName,

    /// The renewal interval must be strictly less than the lock TTL.
    #[error("renew_interval ({renew_interval:?}) must be less than ttl ({ttl:?})")]
    IntervalNotBelowTtl {
        ttl: std::time::Duration,
        renew_interval: std::time::Duration,
    },

    /// Zero durations make the lease meaningless.
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),
}
