//! usb0 device object
//!
//! One [`Usb0Device`] per physical device slot. The device owns the open
//! driver channel (handles and in-flight operations borrow it through the
//! device, never duplicate it) and caches the sanitized device descriptor
//! fetched at discovery. The backend's device set and every enumeration
//! result hold the device behind an `Arc`; the channel closes when the last
//! reference drops.

use crate::driver::{Channel, IOCTL_GET_DESCRIPTOR, Request, SlotIndex};
use crate::sync::sync_control;
use tracing::debug;
use usbcore::{DESCRIPTOR_TYPE_DEVICE, DEVICE_DESCRIPTOR_LEN, DeviceDescriptor, Error, Result};

/// A discovered device on the usb0 driver family.
pub struct Usb0Device<C> {
    slot: SlotIndex,
    channel: C,
    descriptor: DeviceDescriptor,
}

impl<C: Channel> Usb0Device<C> {
    /// Build the device object for a newly discovered slot.
    ///
    /// Fetches and sanitizes the device descriptor over `channel`. On any
    /// failure the channel is dropped with the error; a candidate that
    /// cannot produce a valid descriptor never becomes visible.
    pub(crate) fn discover(slot: SlotIndex, channel: C) -> Result<Self> {
        let descriptor = fetch_device_descriptor(&channel)?;
        debug!(
            slot = slot.0,
            "discovered device {:04x}:{:04x}",
            descriptor.vendor_id, descriptor.product_id
        );
        Ok(Self {
            slot,
            channel,
            descriptor,
        })
    }

    /// The device's slot index.
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// The cached, sanitized device descriptor.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// The device's driver channel. Crate-private: the channel never leaves
    /// the device's ownership.
    pub(crate) fn channel(&self) -> &C {
        &self.channel
    }
}

impl<C> std::fmt::Debug for Usb0Device<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Usb0Device")
            .field("slot", &self.slot)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Fetch the 18-byte device descriptor through the synchronous control
/// channel. A short read is a driver failure, not a short descriptor.
pub(crate) fn fetch_device_descriptor<C: Channel>(channel: &C) -> Result<DeviceDescriptor> {
    let request = Request::descriptor(DESCRIPTOR_TYPE_DEVICE, 0);
    let (transferred, buffer) = sync_control(
        channel,
        IOCTL_GET_DESCRIPTOR,
        &request,
        DEVICE_DESCRIPTOR_LEN,
    )?;
    if transferred != DEVICE_DESCRIPTOR_LEN {
        return Err(Error::Io);
    }
    DeviceDescriptor::sanitize(&buffer[..transferred])
}
