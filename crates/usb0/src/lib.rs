//! usb0 driver-family backend
//!
//! Implements the [`usbcore::Backend`] operation table against the usb0
//! kernel driver family: slot-indexed driver channels, overlapped I/O for
//! bulk/interrupt transfers, and a small set of synchronous control
//! requests for everything else.
//!
//! The driver itself is reached through the seam in [`driver`]. This crate
//! ships two bindings, [`devnode::DevNodeDriver`] for per-slot character
//! devices and [`testing::MockDriver`] for driverless tests, and the
//! backend is generic over them.
//!
//! # Example
//!
//! ```
//! use usb0::testing::MockDriver;
//! use usb0::Usb0Backend;
//! use usbcore::{Backend, DeviceHandle, Transfer, TransferStatus};
//!
//! let driver = MockDriver::new();
//! driver.add_slot(1, MockDriver::sample_descriptor(0x1234, 0x5678));
//!
//! let backend = Usb0Backend::new(driver);
//! let devices = backend.device_list().unwrap();
//! assert_eq!(devices.len(), 1);
//!
//! let handle = DeviceHandle::open(&devices[0]);
//! let pending = backend
//!     .submit_transfer(&handle, Transfer::bulk(0x81, vec![0; 64]))
//!     .unwrap();
//! let done = backend.reap_transfer(pending).unwrap();
//! assert_eq!(done.status, TransferStatus::Completed);
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod devnode;
pub mod driver;
pub mod testing;
pub mod translate;

mod sync;

pub use backend::{PendingTransfer, Usb0Backend};
pub use config::Usb0Config;
pub use device::Usb0Device;
pub use driver::{Channel, Completion, Driver, MAX_SLOTS, Operation, OsStatus, SlotIndex};
