//! Backend error vocabulary
//!
//! Every backend operation reports one of these codes. The set is closed on
//! purpose: upper layers apply retry/failure policy by matching on it, so a
//! backend must never invent a new variant for a driver-specific condition;
//! anything without a dedicated code collapses to [`Error::Io`].

use thiserror::Error;

/// Status codes shared by all backend operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Resource exhaustion while setting an operation up.
    #[error("out of memory")]
    NoMem,

    /// The driver reported contention. Distinct from [`Error::Io`] so
    /// callers may decide to retry.
    #[error("device or resource busy")]
    Busy,

    /// Caller misuse, e.g. a transfer type this backend does not support.
    #[error("invalid parameter")]
    InvalidParam,

    /// Generic driver or OS failure.
    #[error("input/output error")]
    Io,

    /// The operation was aborted. Only surfaces on transfer-specific
    /// operations, via reap-time classification.
    #[error("transfer cancelled")]
    Cancelled,
}

/// Type alias for backend results.
pub type Result<T> = std::result::Result<T, Error>;
