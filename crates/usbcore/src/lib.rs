//! Portable-layer contract for usbway backends
//!
//! This crate defines the transport-agnostic surface a USB backend presents
//! upward: the closed error vocabulary, the standard device descriptor and
//! its sanitizer, the transfer model, and the [`Backend`] operation table.
//! Concrete backends (one per kernel driver family) live in sibling crates
//! and implement [`Backend`] against their driver's native interface.
//!
//! # Example
//!
//! ```
//! use usbcore::{DeviceDescriptor, Error, Transfer};
//!
//! // Sanitize a raw 18-byte device descriptor fetched from a driver.
//! let raw = [
//!     18, 1, 0x00, 0x02, 0, 0, 0, 64, 0x34, 0x12, 0x78, 0x56, 0x01, 0x00, 1, 2, 3, 1,
//! ];
//! let desc = DeviceDescriptor::sanitize(&raw).unwrap();
//! assert_eq!(desc.vendor_id, 0x1234);
//!
//! // Malformed input rejects the candidate device.
//! assert_eq!(DeviceDescriptor::sanitize(&raw[..4]), Err(Error::InvalidParam));
//!
//! // A bulk IN transfer reading up to 64 bytes from endpoint 1.
//! let transfer = Transfer::bulk(0x81, vec![0; 64]);
//! assert!(transfer.is_in());
//! ```

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod transfer;

pub use backend::{Backend, DeviceHandle};
pub use descriptor::{DESCRIPTOR_TYPE_DEVICE, DEVICE_DESCRIPTOR_LEN, DeviceDescriptor};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use transfer::{ENDPOINT_DIR_IN, Transfer, TransferCallback, TransferKind, TransferStatus};
