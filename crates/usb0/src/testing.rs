//! Test utilities for the usb0 backend
//!
//! Provides [`MockDriver`], a scriptable in-memory implementation of the
//! downward driver seam, used by this crate's test suites and available to
//! dependents that need a driverless backend to test against.
//!
//! # Example
//!
//! ```
//! use usb0::testing::MockDriver;
//! use usb0::driver::{Driver, SlotIndex};
//!
//! let driver = MockDriver::new();
//! driver.add_slot(3, MockDriver::sample_descriptor(0x1234, 0x5678));
//!
//! assert!(driver.open(SlotIndex(3)).is_some());
//! assert!(driver.open(SlotIndex(4)).is_none()); // empty slot
//! ```

use crate::driver::{
    CancelIo, Channel, Completion, Driver, IOCTL_ABORT_ENDPOINT, IOCTL_BULK_OR_INTERRUPT_READ,
    IOCTL_BULK_OR_INTERRUPT_WRITE, IOCTL_CLAIM_INTERFACE, IOCTL_GET_DESCRIPTOR,
    IOCTL_RELEASE_INTERFACE, Operation, OsStatus, Request, SlotIndex,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Scripted behavior for one bulk/interrupt submission on an endpoint.
#[derive(Debug, Clone)]
pub enum TransferScript {
    /// Complete synchronously inline. For reads, `data` is copied into the
    /// caller's buffer (truncated to fit); for writes, the full buffer
    /// counts as sent and `data` is ignored.
    Complete(Vec<u8>),
    /// Stay in flight until aborted or finished with
    /// [`MockDriver::complete_pending`].
    Hang,
    /// Complete synchronously inline with a failure status.
    Fail(OsStatus),
    /// Refuse to start at all.
    Reject(OsStatus),
}

#[derive(Default)]
struct SlotState {
    descriptor: Vec<u8>,
    claim_failure: Option<OsStatus>,
    scripts: HashMap<u8, VecDeque<TransferScript>>,
    in_flight: HashMap<u8, Vec<Arc<OpInner>>>,
    written: HashMap<u8, Vec<Vec<u8>>>,
}

struct MockBus {
    slots: Mutex<HashMap<u16, SlotState>>,
    start_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct OpState {
    done: Option<(OsStatus, usize)>,
    buffer: Option<Vec<u8>>,
    is_read: bool,
}

struct OpInner {
    state: Mutex<OpState>,
    cond: Condvar,
}

impl OpInner {
    fn new(buffer: Vec<u8>, is_read: bool) -> Self {
        Self {
            state: Mutex::new(OpState {
                done: None,
                buffer: Some(buffer),
                is_read,
            }),
            cond: Condvar::new(),
        }
    }

    /// First completion wins; later attempts are ignored.
    fn complete(&self, status: OsStatus, transferred: usize, data: Option<&[u8]>) {
        let mut state = lock(&self.state);
        if state.done.is_some() {
            return;
        }
        if let (Some(data), Some(buffer)) = (data, state.buffer.as_mut()) {
            let n = data.len().min(buffer.len());
            buffer[..n].copy_from_slice(&data[..n]);
        }
        state.done = Some((status, transferred));
        self.cond.notify_all();
    }

    fn is_done(&self) -> bool {
        lock(&self.state).done.is_some()
    }
}

/// One in-flight mock operation.
pub struct MockOp {
    inner: Arc<OpInner>,
}

impl MockOp {
    /// What the platform cancel primitive does: abort this one operation.
    pub fn abort(&self) {
        self.inner.complete(OsStatus::OPERATION_ABORTED, 0, None);
    }
}

impl Operation for MockOp {
    fn wait(&self) -> Completion {
        let mut state = lock(&self.inner.state);
        while state.done.is_none() {
            state = self
                .inner
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        let (status, transferred) = match state.done {
            Some(done) => done,
            None => unreachable!(),
        };
        match state.buffer.take() {
            Some(buffer) => Completion {
                status,
                transferred,
                buffer,
            },
            // Waited twice: the buffer is gone.
            None => Completion {
                status: OsStatus::GEN_FAILURE,
                transferred: 0,
                buffer: Vec::new(),
            },
        }
    }
}

/// An open mock channel to one slot.
pub struct MockChannel {
    slot: u16,
    bus: Arc<MockBus>,
}

impl Channel for MockChannel {
    type Op = MockOp;

    fn start(&self, code: u32, request: &Request, buffer: Vec<u8>) -> Result<MockOp, OsStatus> {
        self.bus.start_calls.fetch_add(1, Ordering::Relaxed);
        let mut slots = lock(&self.bus.slots);
        let slot = slots.get_mut(&self.slot).ok_or(OsStatus::GEN_FAILURE)?;

        match code {
            IOCTL_GET_DESCRIPTOR => {
                let data = slot.descriptor.clone();
                let n = data.len().min(buffer.len());
                let inner = Arc::new(OpInner::new(buffer, true));
                inner.complete(OsStatus::SUCCESS, n, Some(&data));
                Ok(MockOp { inner })
            }

            IOCTL_CLAIM_INTERFACE | IOCTL_RELEASE_INTERFACE => {
                let inner = Arc::new(OpInner::new(buffer, false));
                match slot.claim_failure {
                    Some(status) => inner.complete(status, 0, None),
                    None => inner.complete(OsStatus::SUCCESS, 0, None),
                }
                Ok(MockOp { inner })
            }

            IOCTL_ABORT_ENDPOINT => {
                let endpoint = request.value as u8;
                if let Some(ops) = slot.in_flight.get_mut(&endpoint) {
                    for op in ops.drain(..) {
                        op.complete(OsStatus::OPERATION_ABORTED, 0, None);
                    }
                }
                let inner = Arc::new(OpInner::new(buffer, false));
                inner.complete(OsStatus::SUCCESS, 0, None);
                Ok(MockOp { inner })
            }

            IOCTL_BULK_OR_INTERRUPT_READ | IOCTL_BULK_OR_INTERRUPT_WRITE => {
                let is_read = code == IOCTL_BULK_OR_INTERRUPT_READ;
                let endpoint = request.value as u8;
                let script = slot
                    .scripts
                    .get_mut(&endpoint)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or(TransferScript::Complete(Vec::new()));

                if let TransferScript::Reject(status) = script {
                    return Err(status);
                }
                if !is_read {
                    slot.written.entry(endpoint).or_default().push(buffer.clone());
                }

                let requested = buffer.len();
                let inner = Arc::new(OpInner::new(buffer, is_read));
                match script {
                    TransferScript::Reject(_) => unreachable!(),
                    TransferScript::Complete(data) => {
                        if is_read {
                            let n = data.len().min(requested);
                            inner.complete(OsStatus::SUCCESS, n, Some(&data));
                        } else {
                            inner.complete(OsStatus::SUCCESS, requested, None);
                        }
                    }
                    TransferScript::Fail(status) => inner.complete(status, 0, None),
                    TransferScript::Hang => {
                        slot.in_flight
                            .entry(endpoint)
                            .or_default()
                            .push(Arc::clone(&inner));
                    }
                }
                Ok(MockOp { inner })
            }

            _ => Err(OsStatus::GEN_FAILURE),
        }
    }
}

/// Scriptable in-memory driver.
///
/// Clone handles share the same bus, so a test can keep one clone for
/// scripting while the backend owns another.
#[derive(Clone)]
pub struct MockDriver {
    bus: Arc<MockBus>,
    provide_cancel_io: bool,
}

impl MockDriver {
    /// A driver without a generic cancel primitive; cancellation goes
    /// through the abort-endpoint fallback.
    pub fn new() -> Self {
        Self {
            bus: Arc::new(MockBus {
                slots: Mutex::new(HashMap::new()),
                start_calls: AtomicUsize::new(0),
            }),
            provide_cancel_io: false,
        }
    }

    /// A driver that resolves a cancel-one-operation primitive at init.
    pub fn with_cancel_io() -> Self {
        Self {
            provide_cancel_io: true,
            ..Self::new()
        }
    }

    /// A valid 18-byte device descriptor for `vendor_id`/`product_id`.
    pub fn sample_descriptor(vendor_id: u16, product_id: u16) -> Vec<u8> {
        let [vid_lo, vid_hi] = vendor_id.to_le_bytes();
        let [pid_lo, pid_hi] = product_id.to_le_bytes();
        vec![
            18, 1, 0x00, 0x02, 0, 0, 0, 64, vid_lo, vid_hi, pid_lo, pid_hi, 0x01, 0x00, 1, 2, 3, 1,
        ]
    }

    /// Occupy `slot` with a device reporting `descriptor`.
    pub fn add_slot(&self, slot: u16, descriptor: Vec<u8>) {
        lock(&self.bus.slots).insert(
            slot,
            SlotState {
                descriptor,
                ..SlotState::default()
            },
        );
    }

    /// Unplug the device at `slot`; later opens fail.
    pub fn remove_slot(&self, slot: u16) {
        lock(&self.bus.slots).remove(&slot);
    }

    /// Make claim/release requests on `slot` fail with `status`.
    pub fn fail_claims(&self, slot: u16, status: OsStatus) {
        if let Some(state) = lock(&self.bus.slots).get_mut(&slot) {
            state.claim_failure = Some(status);
        }
    }

    /// Queue a script for the next submission on `slot`/`endpoint`.
    pub fn script_transfer(&self, slot: u16, endpoint: u8, script: TransferScript) {
        if let Some(state) = lock(&self.bus.slots).get_mut(&slot) {
            state.scripts.entry(endpoint).or_default().push_back(script);
        }
    }

    /// Finish the oldest hanging operation on `slot`/`endpoint` with
    /// `data`. Returns false if nothing was hanging.
    pub fn complete_pending(&self, slot: u16, endpoint: u8, data: &[u8]) -> bool {
        let inner = {
            let mut slots = lock(&self.bus.slots);
            let Some(state) = slots.get_mut(&slot) else {
                return false;
            };
            let Some(ops) = state.in_flight.get_mut(&endpoint) else {
                return false;
            };
            ops.retain(|op| !op.is_done());
            if ops.is_empty() {
                return false;
            }
            ops.remove(0)
        };
        let is_read = lock(&inner.state).is_read;
        if is_read {
            inner.complete(OsStatus::SUCCESS, data.len(), Some(data));
        } else {
            let requested = lock(&inner.state).buffer.as_ref().map_or(0, Vec::len);
            inner.complete(OsStatus::SUCCESS, requested, None);
        }
        true
    }

    /// Payloads written to `slot`/`endpoint` so far.
    pub fn written(&self, slot: u16, endpoint: u8) -> Vec<Vec<u8>> {
        lock(&self.bus.slots)
            .get(&slot)
            .and_then(|state| state.written.get(&endpoint))
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of `Channel::start` calls seen by the bus.
    pub fn start_calls(&self) -> usize {
        self.bus.start_calls.load(Ordering::Relaxed)
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MockDriver {
    type Channel = MockChannel;

    fn open(&self, slot: SlotIndex) -> Option<MockChannel> {
        if !lock(&self.bus.slots).contains_key(&slot.0) {
            return None;
        }
        Some(MockChannel {
            slot: slot.0,
            bus: Arc::clone(&self.bus),
        })
    }

    fn cancel_io(&self) -> Option<CancelIo<MockChannel>> {
        if self.provide_cancel_io {
            Some(Box::new(|_channel, op| op.abort()))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_only_populated_slots() {
        let driver = MockDriver::new();
        driver.add_slot(2, MockDriver::sample_descriptor(1, 2));
        assert!(driver.open(SlotIndex(2)).is_some());
        assert!(driver.open(SlotIndex(3)).is_none());
    }

    #[test]
    fn test_hanging_op_aborts_via_abort_endpoint() {
        let driver = MockDriver::new();
        driver.add_slot(1, MockDriver::sample_descriptor(1, 2));
        driver.script_transfer(1, 0x81, TransferScript::Hang);
        let channel = driver.open(SlotIndex(1)).unwrap();

        let op = channel
            .start(
                IOCTL_BULK_OR_INTERRUPT_READ,
                &Request::endpoint(0x81),
                vec![0; 8],
            )
            .unwrap();
        channel
            .start(IOCTL_ABORT_ENDPOINT, &Request::endpoint(0x81), Vec::new())
            .unwrap();

        let completion = op.wait();
        assert_eq!(completion.status, OsStatus::OPERATION_ABORTED);
    }

    #[test]
    fn test_complete_pending_fills_read_buffer() {
        let driver = MockDriver::new();
        driver.add_slot(1, MockDriver::sample_descriptor(1, 2));
        driver.script_transfer(1, 0x81, TransferScript::Hang);
        let channel = driver.open(SlotIndex(1)).unwrap();

        let op = channel
            .start(
                IOCTL_BULK_OR_INTERRUPT_READ,
                &Request::endpoint(0x81),
                vec![0; 8],
            )
            .unwrap();
        assert!(driver.complete_pending(1, 0x81, &[0xaa, 0xbb]));

        let completion = op.wait();
        assert_eq!(completion.status, OsStatus::SUCCESS);
        assert_eq!(completion.transferred, 2);
        assert_eq!(&completion.buffer[..2], &[0xaa, 0xbb]);
    }

    #[test]
    fn test_written_payloads_are_captured() {
        let driver = MockDriver::new();
        driver.add_slot(1, MockDriver::sample_descriptor(1, 2));
        let channel = driver.open(SlotIndex(1)).unwrap();

        let op = channel
            .start(
                IOCTL_BULK_OR_INTERRUPT_WRITE,
                &Request::endpoint(0x02),
                vec![1, 2, 3],
            )
            .unwrap();
        let completion = op.wait();
        assert_eq!(completion.transferred, 3);
        assert_eq!(driver.written(1, 0x02), vec![vec![1, 2, 3]]);
    }
}
