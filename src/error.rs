//! Error handling for the LocalCam discovery core

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
///
/// Only `Cancelled` and `InvalidArgument` surface through the public scan
/// facade. Transient network failures are absorbed where they occur and
/// degrade the affected evidence instead of failing the sweep.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-requested termination
    #[error("scan cancelled")]
    Cancelled,

    /// Invalid scan parameter
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (task join failure)
    #[error("internal error: {0}")]
    Internal(String),
}
