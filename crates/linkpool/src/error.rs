//! Error types for the connection pool, its configuration, and drivers.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced to callers of [`ConnectionPool`](crate::ConnectionPool).
///
/// Per-handle failures (a connect attempt that fails inside the replenisher,
/// a borrowed link the caller reports as broken) are absorbed by the pool and
/// never show up here.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out after {timeout_ms}ms waiting for an idle connection")]
    AcquireTimeout { timeout_ms: u64 },

    #[error("connection pool is shut down")]
    Closed,

    #[error("driver initialization failed: {0}")]
    Init(#[source] DriverError),

    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors reported by a [`Driver`](crate::driver::Driver) or one of its links.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver init: {0}")]
    Init(String),

    #[error("connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("tls: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors produced while loading or validating a [`PoolConfig`](crate::PoolConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for `{key}` on line {line}: {value:?}")]
    InvalidValue {
        key: String,
        line: usize,
        value: String,
    },

    #[error("{0}")]
    Invalid(String),
}
