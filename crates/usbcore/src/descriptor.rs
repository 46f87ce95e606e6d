//! Standard USB device descriptor
//!
//! Backends fetch the raw 18-byte device descriptor over their driver
//! channel and hand it to [`DeviceDescriptor::sanitize`] before caching it.
//! Malformed input rejects the whole candidate device, so the checks here
//! are strict.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Wire length of a standard device descriptor.
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

/// `bDescriptorType` value for a device descriptor.
pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;

/// Validated standard USB device descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB specification release number (BCD, e.g. 0x0200)
    pub bcd_usb: u16,
    /// USB device class
    pub class: u8,
    /// USB device subclass
    pub subclass: u8,
    /// USB device protocol
    pub protocol: u8,
    /// Maximum packet size for endpoint 0
    pub max_packet_size_0: u8,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Device release number (BCD)
    pub bcd_device: u16,
    /// Index of the manufacturer string descriptor (0 = none)
    pub manufacturer_index: u8,
    /// Index of the product string descriptor (0 = none)
    pub product_index: u8,
    /// Index of the serial number string descriptor (0 = none)
    pub serial_number_index: u8,
    /// Number of configurations
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// Validate and decode a raw device descriptor.
    ///
    /// Rejects input that is not exactly [`DEVICE_DESCRIPTOR_LEN`] bytes,
    /// carries the wrong self-reported length, or is not a device
    /// descriptor at all.
    pub fn sanitize(raw: &[u8]) -> Result<Self> {
        if raw.len() != DEVICE_DESCRIPTOR_LEN {
            return Err(Error::InvalidParam);
        }
        if raw[0] as usize != DEVICE_DESCRIPTOR_LEN {
            return Err(Error::InvalidParam);
        }
        if raw[1] != DESCRIPTOR_TYPE_DEVICE {
            return Err(Error::InvalidParam);
        }

        Ok(Self {
            bcd_usb: LittleEndian::read_u16(&raw[2..4]),
            class: raw[4],
            subclass: raw[5],
            protocol: raw[6],
            max_packet_size_0: raw[7],
            vendor_id: LittleEndian::read_u16(&raw[8..10]),
            product_id: LittleEndian::read_u16(&raw[10..12]),
            bcd_device: LittleEndian::read_u16(&raw[12..14]),
            manufacturer_index: raw[14],
            product_index: raw[15],
            serial_number_index: raw[16],
            num_configurations: raw[17],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A plausible full-speed device: VID 0x1234, PID 0x5678.
    pub fn sample_raw() -> [u8; DEVICE_DESCRIPTOR_LEN] {
        [
            18, 1, // bLength, bDescriptorType
            0x00, 0x02, // bcdUSB 2.00
            0x00, 0x00, 0x00, // class, subclass, protocol
            64, // bMaxPacketSize0
            0x34, 0x12, // idVendor
            0x78, 0x56, // idProduct
            0x01, 0x00, // bcdDevice
            1, 2, 3, // string indices
            1, // bNumConfigurations
        ]
    }

    #[test]
    fn test_sanitize_valid_descriptor() {
        let desc = DeviceDescriptor::sanitize(&sample_raw()).unwrap();
        assert_eq!(desc.bcd_usb, 0x0200);
        assert_eq!(desc.vendor_id, 0x1234);
        assert_eq!(desc.product_id, 0x5678);
        assert_eq!(desc.max_packet_size_0, 64);
        assert_eq!(desc.num_configurations, 1);
    }

    #[test]
    fn test_sanitize_rejects_short_input() {
        let raw = sample_raw();
        assert_eq!(
            DeviceDescriptor::sanitize(&raw[..17]),
            Err(Error::InvalidParam)
        );
    }

    #[test]
    fn test_sanitize_rejects_wrong_blength() {
        let mut raw = sample_raw();
        raw[0] = 9;
        assert_eq!(DeviceDescriptor::sanitize(&raw), Err(Error::InvalidParam));
    }

    #[test]
    fn test_sanitize_rejects_wrong_type() {
        let mut raw = sample_raw();
        raw[1] = 0x02; // configuration descriptor
        assert_eq!(DeviceDescriptor::sanitize(&raw), Err(Error::InvalidParam));
    }
}
