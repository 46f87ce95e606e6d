//! Backend operation table
//!
//! A backend is one driver family's implementation of the fixed operation
//! set the portable layer drives: enumerate, claim/release, submit, cancel,
//! reap. Backend construction is the init step; dropping the backend is the
//! exit step and releases anything resolved at init.
//!
//! Operations a backend does not have (a separate device open/close step,
//! set-configuration) are represented as methods returning `None`. The
//! portable layer treats `None` as "unsupported by this backend", never as
//! an error.

use crate::error::Result;
use crate::transfer::Transfer;
use std::sync::Arc;

/// An opened-for-use view of a device.
///
/// The handle references the device; it does not own the device's driver
/// channel (the device does). Dropping the handle drops one device
/// reference and nothing else.
#[derive(Debug)]
pub struct DeviceHandle<D> {
    device: Arc<D>,
}

impl<D> DeviceHandle<D> {
    /// Open a handle onto `device`.
    pub fn open(device: &Arc<D>) -> Self {
        Self {
            device: Arc::clone(device),
        }
    }

    /// The device this handle refers to.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

impl<D> Clone for DeviceHandle<D> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
        }
    }
}

/// The fixed operation table every backend implements.
///
/// All operations run to completion on the calling thread. Only
/// `reap_transfer` (and, internally, synchronous driver round trips) may
/// block; `submit_transfer` never blocks beyond the initial kernel-call
/// return. Distinct transfers may be submitted, cancelled, and reaped
/// concurrently from different threads.
pub trait Backend: Send + Sync {
    /// This backend's device representation.
    type Device;

    /// Move-only token for one submitted, not-yet-reaped transfer.
    ///
    /// Reap consumes the token, so reaping the same transfer twice is
    /// unrepresentable.
    type Pending;

    /// Produce the list of currently visible devices, reusing existing
    /// device objects for slots that are still present. Entries are
    /// additional references; dropping them releases those references.
    fn device_list(&self) -> Result<Vec<Arc<Self::Device>>>;

    /// Claim `interface` on the device behind `handle`. Stateless round
    /// trip; the backend caches nothing about interface ownership.
    fn claim_interface(&self, handle: &DeviceHandle<Self::Device>, interface: u8) -> Result<()>;

    /// Release `interface` on the device behind `handle`.
    fn release_interface(&self, handle: &DeviceHandle<Self::Device>, interface: u8) -> Result<()>;

    /// Start `transfer` asynchronously on the device behind `handle`.
    ///
    /// On success the transfer (buffer included) is owned by the backend
    /// until the returned token is reaped; exactly one pending-set entry
    /// exists for it. On error the transfer is consumed and never
    /// registered.
    fn submit_transfer(
        &self,
        handle: &DeviceHandle<Self::Device>,
        transfer: Transfer,
    ) -> Result<Self::Pending>;

    /// Best-effort cancellation of one in-flight transfer. Never blocks
    /// waiting for the transfer to actually finish, and reports success
    /// even if the transfer had already completed naturally; the race is
    /// resolved by reap-time classification.
    fn cancel_transfer(&self, pending: &Self::Pending) -> Result<()>;

    /// Block until the transfer behind `pending` completes, classify the
    /// outcome, remove it from the pending set, run its completion
    /// callback, and hand the finished transfer back.
    ///
    /// Must be called exactly once per successful submission, even after
    /// cancellation; skipping it leaks the in-flight OS resources.
    fn reap_transfer(&self, pending: Self::Pending) -> Result<Transfer>;

    /// Optional separate device-open step. `None` = this backend has no
    /// such step and [`DeviceHandle::open`] alone suffices.
    fn open_device(&self, _device: &Arc<Self::Device>) -> Option<Result<()>> {
        None
    }

    /// Optional separate device-close step.
    fn close_device(&self, _device: &Arc<Self::Device>) -> Option<()> {
        None
    }

    /// Optional set-configuration operation.
    fn set_configuration(&self, _device: &Arc<Self::Device>, _value: u8) -> Option<Result<()>> {
        None
    }
}
