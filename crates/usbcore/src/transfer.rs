//! Transfer types
//!
//! A [`Transfer`] is a caller-built request descriptor. Submitting it moves
//! it into the backend together with its data buffer; the finished transfer
//! comes back from the backend's reap operation with `status` and
//! `actual_length` filled in and the buffer restored. Because the transfer
//! is moved, its buffer cannot be observed or resubmitted while in flight.

/// Endpoint address bit that selects the IN (device-to-host) direction.
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// Transfer types understood by the portable layer.
///
/// A given backend may support only a subset; unsupported kinds are
/// rejected with `InvalidParam` at submission, before the driver is
/// touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Control transfer (endpoint 0)
    Control,
    /// Bulk transfer
    Bulk,
    /// Interrupt transfer
    Interrupt,
    /// Isochronous transfer
    Isochronous,
}

/// Outcome of a finished transfer, classified at reap time purely from the
/// OS-reported result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// The transfer finished; `actual_length` bytes moved.
    Completed,
    /// The OS reported the operation as aborted.
    Cancelled,
    /// Any other underlying failure.
    Error,
}

/// Completion handler, invoked by reap after the transfer has left the
/// pending set. The handler may legally resubmit the same transfer.
pub type TransferCallback = Box<dyn FnMut(&mut Transfer) + Send>;

/// One asynchronous transfer request.
pub struct Transfer {
    /// Transfer type
    pub kind: TransferKind,
    /// Endpoint address, direction in bit 7
    pub endpoint: u8,
    /// Data buffer. For IN transfers its length is the requested read
    /// length; for OUT transfers it holds the bytes to send.
    pub buffer: Vec<u8>,
    /// Filled at reap time.
    pub status: TransferStatus,
    /// Bytes actually transferred; never more than the requested length.
    /// For reads it marks the valid prefix of `buffer`, which keeps its
    /// submitted length. Filled at reap time.
    pub actual_length: usize,
    /// Optional completion handler.
    pub callback: Option<TransferCallback>,
}

impl Transfer {
    /// Build a bulk transfer for `endpoint` around `buffer`.
    pub fn bulk(endpoint: u8, buffer: Vec<u8>) -> Self {
        Self::new(TransferKind::Bulk, endpoint, buffer)
    }

    /// Build an interrupt transfer for `endpoint` around `buffer`.
    pub fn interrupt(endpoint: u8, buffer: Vec<u8>) -> Self {
        Self::new(TransferKind::Interrupt, endpoint, buffer)
    }

    /// Build a transfer of an arbitrary kind.
    pub fn new(kind: TransferKind, endpoint: u8, buffer: Vec<u8>) -> Self {
        Self {
            kind,
            endpoint,
            buffer,
            status: TransferStatus::Error,
            actual_length: 0,
            callback: None,
        }
    }

    /// Attach a completion handler.
    pub fn with_callback(mut self, callback: TransferCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Whether this transfer reads from the device (bit 7 of the endpoint
    /// address).
    pub fn is_in(&self) -> bool {
        self.endpoint & ENDPOINT_DIR_IN != 0
    }

    /// Requested length in bytes.
    pub fn requested_length(&self) -> usize {
        self.buffer.len()
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("length", &self.buffer.len())
            .field("status", &self.status)
            .field("actual_length", &self.actual_length)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
