//! Downward driver interface
//!
//! Everything the usb0 backend consumes from the kernel driver family lives
//! here: the slot-indexed channel naming convention, the driver control
//! codes, the fixed request header, raw driver status codes, and the
//! overlapped-I/O seam ([`Driver`], [`Channel`], [`Operation`]) that a
//! platform binding implements.
//!
//! The seam keeps native handles opaque and move-only: a channel is owned
//! by exactly one device, an operation by exactly one in-flight record, and
//! neither can be duplicated, only started, waited on, and dropped.

use byteorder::{ByteOrder, LittleEndian};

/// Upper bound of the enumeration address space. Slot 0 is reserved and
/// never probed.
pub const MAX_SLOTS: u16 = 256;

/// Position of a device in the driver's naming scheme. Stable within one
/// enumeration domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub u16);

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Driver channel name for a slot, e.g. `usb0-0012`.
pub fn channel_name(slot: SlotIndex) -> String {
    format!("usb0-{:04}", slot.0)
}

const FILE_DEVICE_UNKNOWN: u32 = 0x22;
const METHOD_BUFFERED: u32 = 0;
const METHOD_IN_DIRECT: u32 = 1;
const METHOD_OUT_DIRECT: u32 = 2;

const fn ctl_code(function: u32, method: u32) -> u32 {
    (FILE_DEVICE_UNKNOWN << 16) | (function << 2) | method
}

/// Fetch a descriptor.
pub const IOCTL_GET_DESCRIPTOR: u32 = ctl_code(0x801, METHOD_BUFFERED);
/// Claim an interface.
pub const IOCTL_CLAIM_INTERFACE: u32 = ctl_code(0x802, METHOD_BUFFERED);
/// Release an interface.
pub const IOCTL_RELEASE_INTERFACE: u32 = ctl_code(0x803, METHOD_BUFFERED);
/// Abort all requests queued on one endpoint.
pub const IOCTL_ABORT_ENDPOINT: u32 = ctl_code(0x804, METHOD_BUFFERED);
/// Bulk or interrupt read (device to host).
pub const IOCTL_BULK_OR_INTERRUPT_READ: u32 = ctl_code(0x805, METHOD_OUT_DIRECT);
/// Bulk or interrupt write (host to device).
pub const IOCTL_BULK_OR_INTERRUPT_WRITE: u32 = ctl_code(0x806, METHOD_IN_DIRECT);

/// Encoded length of a [`Request`] header.
pub const REQUEST_LEN: usize = 12;

/// Fixed-size request header carried by every driver control request.
///
/// The driver copies the header into kernel space at submission, so it does
/// not need to outlive the call that starts the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Request {
    /// Primary parameter: descriptor type, interface number, or endpoint
    /// address, depending on the control code.
    pub value: u32,
    /// Secondary parameter: descriptor index, if any.
    pub index: u32,
    /// Driver-side timeout in milliseconds; 0 = none.
    pub timeout_ms: u32,
}

impl Request {
    /// Header for a descriptor fetch.
    pub fn descriptor(desc_type: u8, desc_index: u8) -> Self {
        Self {
            value: desc_type as u32,
            index: desc_index as u32,
            timeout_ms: 0,
        }
    }

    /// Header for a claim or release of `interface`.
    pub fn interface(interface: u8) -> Self {
        Self {
            value: interface as u32,
            index: 0,
            timeout_ms: 0,
        }
    }

    /// Header for an endpoint-addressed request (transfers, abort).
    pub fn endpoint(endpoint: u8) -> Self {
        Self {
            value: endpoint as u32,
            index: 0,
            timeout_ms: 0,
        }
    }

    /// Little-endian wire form.
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut buf = [0u8; REQUEST_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.value);
        LittleEndian::write_u32(&mut buf[4..8], self.index);
        LittleEndian::write_u32(&mut buf[8..12], self.timeout_ms);
        buf
    }
}

/// Raw driver status code, as reported with a completed or failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsStatus(pub u32);

impl OsStatus {
    pub const SUCCESS: OsStatus = OsStatus(0);
    pub const NO_MEMORY: OsStatus = OsStatus(8);
    pub const GEN_FAILURE: OsStatus = OsStatus(31);
    pub const BUSY: OsStatus = OsStatus(170);
    pub const OPERATION_ABORTED: OsStatus = OsStatus(995);
    pub const IO_PENDING: OsStatus = OsStatus(997);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl std::fmt::Display for OsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "os status {}", self.0)
    }
}

/// Final outcome of one overlapped operation.
#[derive(Debug)]
pub struct Completion {
    /// Driver-reported result.
    pub status: OsStatus,
    /// Bytes transferred; meaningful only when `status` is success.
    pub transferred: usize,
    /// The data buffer handed to [`Channel::start`], given back to the
    /// caller. For reads it holds the received bytes at the front.
    pub buffer: Vec<u8>,
}

/// One in-flight overlapped request.
///
/// Owns its completion signal; dropping the operation releases it on every
/// exit path, completed or not.
pub trait Operation: Send + Sync + 'static {
    /// Block until the driver signals completion and report the outcome.
    ///
    /// Meaningful exactly once per operation. A second call reports
    /// [`OsStatus::GEN_FAILURE`] with an empty buffer.
    fn wait(&self) -> Completion;
}

/// An open driver channel to one device slot.
pub trait Channel: Send + Sync + 'static {
    type Op: Operation;

    /// Begin one overlapped control request.
    ///
    /// `buffer` is the data stage: read target for IN-style requests, bytes
    /// to send for OUT-style requests. Both "the request is pending" and
    /// "the request completed synchronously inline" come back as `Ok`; the
    /// outcome is classified later through [`Operation::wait`]. `Err` means
    /// the request could not be started at all and `buffer` is lost with
    /// the failed attempt.
    fn start(&self, code: u32, request: &Request, buffer: Vec<u8>) -> Result<Self::Op, OsStatus>;
}

/// Cancel-one-operation capability, resolved once at backend init.
pub type CancelIo<C> = Box<dyn Fn(&C, &<C as Channel>::Op) + Send + Sync>;

/// A driver family binding: slot-addressed channel opening plus the
/// optionally available generic cancellation primitive.
pub trait Driver: Send + Sync + 'static {
    type Channel: Channel;

    /// Open the driver channel for `slot`. `None` means no device occupies
    /// the slot; that is not an error.
    fn open(&self, slot: SlotIndex) -> Option<Self::Channel>;

    /// The platform's generic cancel primitive, if it has one. Resolved
    /// exactly once, at backend init; call sites branch on presence rather
    /// than assuming availability.
    fn cancel_io(&self) -> Option<CancelIo<Self::Channel>>;
}
