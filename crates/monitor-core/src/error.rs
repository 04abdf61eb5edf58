//! Error types for call monitoring operations

use thiserror::Error;

/// Errors surfaced by the synchronizer.
///
/// Nothing in this taxonomy is fatal to the process: stream-side failures
/// degrade to a reconnect, snapshot failures are reported to the caller
/// without touching existing state, and malformed frames are dropped where
/// they are decoded.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication expired or rejected")]
    AuthExpired,

    #[error("malformed message: {0}")]
    Decode(String),

    #[error("call not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
