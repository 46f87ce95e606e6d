//! Driver status translation
//!
//! The one mapping from raw driver status codes to the library's closed
//! error vocabulary, applied identically at every call site that surfaces a
//! raw code so upper-layer retry logic sees a stable set. The reap path
//! uses [`classify`] instead, which folds the same codes into a transfer
//! status.

use crate::driver::{Completion, OsStatus};
use usbcore::{Error, TransferStatus};

/// Map a failed driver status to a library error.
pub fn translate(status: OsStatus) -> Error {
    match status {
        OsStatus::NO_MEMORY => Error::NoMem,
        OsStatus::BUSY => Error::Busy,
        OsStatus::OPERATION_ABORTED => Error::Cancelled,
        _ => Error::Io,
    }
}

/// Classify a completed operation's outcome for reap.
///
/// Success carries the byte count. "Operation aborted" becomes `Cancelled`,
/// and only when the driver itself reports it, never inferred from whether
/// cancel was requested. Everything else is a transfer error. Cancelled and
/// failed transfers report zero bytes.
pub fn classify(completion: &Completion) -> (TransferStatus, usize) {
    match completion.status {
        OsStatus::SUCCESS => (TransferStatus::Completed, completion.transferred),
        OsStatus::OPERATION_ABORTED => (TransferStatus::Cancelled, 0),
        _ => (TransferStatus::Error, 0),
    }
}
