//! The usb0 backend
//!
//! [`Usb0Backend`] is the per-library-instance context: it owns the driver
//! binding, the cancel primitive resolved once at init, the known-device
//! set, and the pending set of in-flight transfers. Construction is the
//! backend's init step; drop is its exit step and releases everything
//! resolved at init.
//!
//! All operations take `&self`. The two shared sets are individually
//! locked, and no lock is held across a blocking driver wait, so distinct
//! transfers can be submitted, cancelled, and reaped concurrently from
//! different threads. The caller serializes traffic per transfer; the
//! move-only [`PendingTransfer`] token makes double-reap unrepresentable.

use crate::config::Usb0Config;
use crate::device::Usb0Device;
use crate::driver::{
    CancelIo, Channel, Driver, IOCTL_ABORT_ENDPOINT, IOCTL_BULK_OR_INTERRUPT_READ,
    IOCTL_BULK_OR_INTERRUPT_WRITE, IOCTL_CLAIM_INTERFACE, IOCTL_RELEASE_INTERFACE, Operation,
    Request, SlotIndex,
};
use crate::sync::sync_control;
use crate::translate::{classify, translate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use usbcore::{Backend, DeviceHandle, Error, Result, Transfer, TransferKind};

/// Move-only token for one submitted, not-yet-reaped transfer.
///
/// Deliberately neither `Clone` nor `Copy`: reap consumes it, so each
/// submission is reaped at most once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PendingTransfer {
    seq: u64,
}

/// Backend-private state for one in-flight transfer.
struct InFlight<D: Driver> {
    /// The native operation, shared with concurrent cancellation.
    op: Arc<<D::Channel as Channel>::Op>,
    /// Keeps the device (and its channel) alive while the driver may still
    /// touch the transfer.
    device: Arc<Usb0Device<D::Channel>>,
    endpoint: u8,
    transfer: Transfer,
}

/// Backend for the usb0 driver family.
pub struct Usb0Backend<D: Driver> {
    driver: D,
    /// Generic cancel-one-operation primitive, resolved once at init.
    /// Absent on platforms without one; cancellation then falls back to the
    /// driver's abort-endpoint request.
    cancel_io: Option<CancelIo<D::Channel>>,
    config: Usb0Config,
    /// Known-device set. One reference per entry; enumeration hands out
    /// additional references.
    devices: Mutex<Vec<Arc<Usb0Device<D::Channel>>>>,
    /// Pending set of in-flight transfers, keyed by submission sequence.
    pending: Mutex<HashMap<u64, InFlight<D>>>,
    next_seq: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<D: Driver> Usb0Backend<D> {
    /// Initialize the backend with default configuration.
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, Usb0Config::default())
    }

    /// Initialize the backend. Resolves the driver's optional cancel
    /// primitive exactly once, here.
    pub fn with_config(driver: D, config: Usb0Config) -> Self {
        let cancel_io = driver.cancel_io();
        info!(
            max_slots = config.max_slots,
            cancel_io = cancel_io.is_some(),
            "usb0 backend initialized"
        );
        Self {
            driver,
            cancel_io,
            config,
            devices: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Number of transfers currently in flight. Diagnostic.
    pub fn pending_transfers(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Number of devices in the known-device set. Diagnostic.
    pub fn known_devices(&self) -> usize {
        lock(&self.devices).len()
    }
}

impl<D: Driver> Backend for Usb0Backend<D> {
    type Device = Usb0Device<D::Channel>;
    type Pending = PendingTransfer;

    /// Scan the bounded slot range in strictly increasing order and
    /// reconcile against the known-device set.
    ///
    /// A slot that fails to open is absent, not an error. A slot matching a
    /// known entry is re-referenced, never recreated, and the fresh channel
    /// is closed; the cached one stays authoritative. A new slot becomes
    /// visible only with a valid, sanitized descriptor; failed candidates
    /// are discarded whole, channel included. Result order follows scan
    /// order, so unchanged device presence yields identical lists.
    fn device_list(&self) -> Result<Vec<Arc<Self::Device>>> {
        let mut result = Vec::new();

        // Slot 0 is reserved by convention and never probed.
        for slot in 1..self.config.max_slots {
            let slot = SlotIndex(slot);
            let Some(channel) = self.driver.open(slot) else {
                continue;
            };

            if let Some(existing) = lock(&self.devices).iter().find(|d| d.slot() == slot) {
                result.push(Arc::clone(existing));
                continue; // fresh channel drops here
            }

            // Descriptor round trip runs without holding the set lock.
            match Usb0Device::discover(slot, channel) {
                Ok(device) => {
                    let mut known = lock(&self.devices);
                    // A concurrent scan may have discovered the slot first;
                    // the device is never duplicated.
                    if let Some(existing) = known.iter().find(|d| d.slot() == slot) {
                        result.push(Arc::clone(existing));
                    } else {
                        let device = Arc::new(device);
                        known.push(Arc::clone(&device));
                        result.push(device);
                    }
                }
                Err(err) => {
                    debug!(slot = slot.0, %err, "skipping slot, descriptor unusable");
                }
            }
        }

        debug!(count = result.len(), "enumeration complete");
        Ok(result)
    }

    fn claim_interface(&self, handle: &DeviceHandle<Self::Device>, interface: u8) -> Result<()> {
        let mut request = Request::interface(interface);
        request.timeout_ms = self.config.control_timeout_ms;
        sync_control(
            handle.device().channel(),
            IOCTL_CLAIM_INTERFACE,
            &request,
            0,
        )?;
        debug!(slot = handle.device().slot().0, interface, "claimed interface");
        Ok(())
    }

    fn release_interface(&self, handle: &DeviceHandle<Self::Device>, interface: u8) -> Result<()> {
        let mut request = Request::interface(interface);
        request.timeout_ms = self.config.control_timeout_ms;
        sync_control(
            handle.device().channel(),
            IOCTL_RELEASE_INTERFACE,
            &request,
            0,
        )?;
        debug!(
            slot = handle.device().slot().0,
            interface, "released interface"
        );
        Ok(())
    }

    /// Start one non-blocking bulk or interrupt request. Both "pending" and
    /// "completed synchronously inline" register the transfer in the
    /// pending set; classification is deferred to reap either way. A hard
    /// immediate failure never registers anything.
    fn submit_transfer(
        &self,
        handle: &DeviceHandle<Self::Device>,
        mut transfer: Transfer,
    ) -> Result<PendingTransfer> {
        match transfer.kind {
            TransferKind::Bulk | TransferKind::Interrupt => {}
            _ => return Err(Error::InvalidParam),
        }

        // Bit 7 of the endpoint address selects read vs write.
        let code = if transfer.is_in() {
            IOCTL_BULK_OR_INTERRUPT_READ
        } else {
            IOCTL_BULK_OR_INTERRUPT_WRITE
        };
        let request = Request::endpoint(transfer.endpoint);

        let device = Arc::clone(handle.device());
        let endpoint = transfer.endpoint;
        let requested = transfer.buffer.len();
        let buffer = std::mem::take(&mut transfer.buffer);

        // Each submission starts a fresh operation, so its completion
        // signal begins unsignaled.
        let op = device
            .channel()
            .start(code, &request, buffer)
            .map_err(|status| {
                warn!(endpoint, %status, "transfer submission failed");
                translate(status)
            })?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let record = InFlight {
            op: Arc::new(op),
            device,
            endpoint,
            transfer,
        };
        lock(&self.pending).insert(seq, record);
        debug!(seq, endpoint, requested, "transfer submitted");
        Ok(PendingTransfer { seq })
    }

    /// Best-effort cancellation. Uses the init-time cancel primitive when
    /// present, targeting this one operation; otherwise falls back to the
    /// driver's abort-endpoint request. Never waits for the cancelled
    /// transfer to finish and always reports success: the transfer may
    /// already have completed naturally, and reap classifies purely from
    /// the driver-reported outcome.
    fn cancel_transfer(&self, pending: &PendingTransfer) -> Result<()> {
        let (device, op, endpoint) = {
            let records = lock(&self.pending);
            match records.get(&pending.seq) {
                Some(record) => (
                    Arc::clone(&record.device),
                    Arc::clone(&record.op),
                    record.endpoint,
                ),
                // Already reaped or never attached: no-op success.
                None => return Ok(()),
            }
        };

        if let Some(cancel_io) = &self.cancel_io {
            cancel_io(device.channel(), &*op);
            debug!(seq = pending.seq, endpoint, "cancel requested");
        } else {
            // Fallback aborts everything queued on the endpoint; result
            // deliberately ignored, reap settles the outcome.
            let request = Request::endpoint(endpoint);
            let _ = sync_control(device.channel(), IOCTL_ABORT_ENDPOINT, &request, 0);
            debug!(seq = pending.seq, endpoint, "abort-endpoint fallback requested");
        }
        Ok(())
    }

    /// Block until the operation completes, classify from the
    /// driver-reported outcome, remove the record from the pending set, run
    /// the completion callback, and hand the finished transfer back.
    fn reap_transfer(&self, pending: PendingTransfer) -> Result<Transfer> {
        let op = {
            let records = lock(&self.pending);
            match records.get(&pending.seq) {
                Some(record) => Arc::clone(&record.op),
                None => return Err(Error::InvalidParam),
            }
        };

        // Block with no lock held; other transfers keep flowing.
        let completion = op.wait();

        let record = lock(&self.pending)
            .remove(&pending.seq)
            .ok_or(Error::InvalidParam)?;

        let (status, actual_length) = classify(&completion);
        let mut transfer = record.transfer;
        transfer.buffer = completion.buffer;
        transfer.status = status;
        // Never report more than the caller requested.
        transfer.actual_length = actual_length.min(transfer.buffer.len());
        debug!(
            seq = pending.seq,
            ?status,
            actual_length = transfer.actual_length,
            "transfer reaped"
        );

        // The record left the pending set above, so the callback may
        // legally resubmit this transfer.
        if let Some(mut callback) = transfer.callback.take() {
            callback(&mut transfer);
            transfer.callback = Some(callback);
        }
        Ok(transfer)
    }
}

impl<D: Driver> Drop for Usb0Backend<D> {
    fn drop(&mut self) {
        let in_flight = lock(&self.pending).len();
        if in_flight > 0 {
            warn!(in_flight, "backend dropped with transfers still in flight");
        }
        info!("usb0 backend shut down");
    }
}
