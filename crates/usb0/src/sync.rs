//! Synchronous control channel
//!
//! Simple driver operations (descriptor fetch, claim/release, abort) are
//! one blocking request/response exchange. The underlying primitive is
//! still overlapped; this channel starts the request and immediately drives
//! it to completion on the calling thread. The per-call completion state
//! lives inside the [`Operation`] and is released when it drops, on every
//! exit path including errors.

use crate::driver::{Channel, Operation, Request};
use crate::translate::translate;
use usbcore::Result;

/// Perform one blocking control exchange and return the bytes transferred
/// together with the output buffer.
///
/// Failure to even set the request up (the driver could not allocate its
/// completion state) surfaces as `NoMem`. A driver-reported busy condition
/// stays distinct as `Busy` so callers may retry; any other failure
/// collapses to `Io`.
pub(crate) fn sync_control<C: Channel>(
    channel: &C,
    code: u32,
    request: &Request,
    out_len: usize,
) -> Result<(usize, Vec<u8>)> {
    let op = channel
        .start(code, request, vec![0u8; out_len])
        .map_err(translate)?;

    let completion = op.wait();
    if completion.status.is_success() {
        Ok((completion.transferred, completion.buffer))
    } else {
        Err(translate(completion.status))
    }
}
