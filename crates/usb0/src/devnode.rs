//! Device-node driver binding
//!
//! Talks to a usb0-family driver exposed as per-slot character devices
//! (`<dir>/usb0-0001` …). Each control request is one framed write/read
//! exchange:
//!
//! request: `code u32 | request header | out_len u32 | in_len u32 | in-data`
//! response: `status u32 | transferred u32 | out-data`
//!
//! all little-endian. The node interface is synchronous, so the overlapped
//! contract is kept by running each exchange on its own worker thread;
//! [`Operation::wait`] joins the result. Every exchange opens its own
//! stream to the node, so an abort-endpoint request reaches the driver
//! while a data exchange on the same slot is still blocked. The platform
//! offers no generic cancel-one-operation primitive here; the backend's
//! abort-endpoint fallback is the live cancellation path.

use crate::backend::Usb0Backend;
use crate::config::Usb0Config;
use crate::driver::{
    CancelIo, Channel, Completion, Driver, IOCTL_BULK_OR_INTERRUPT_READ, IOCTL_GET_DESCRIPTOR,
    Operation, OsStatus, Request, SlotIndex, channel_name,
};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use tracing::{debug, warn};

/// Opens one conversation with a slot's node.
///
/// A fresh stream is opened for every exchange, so a later request (an
/// abort included) never queues behind an in-flight one on the same slot.
pub trait NodeOpener: Send + Sync + 'static {
    type Stream: Read + Write + Send + 'static;

    fn open(&self, path: &Path) -> io::Result<Self::Stream>;
}

/// [`NodeOpener`] over the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsNodeOpener;

impl NodeOpener for FsNodeOpener {
    type Stream = File;

    fn open(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(path)
    }
}

/// Driver binding over per-slot device nodes in one directory.
pub struct DevNodeDriver<O: NodeOpener = FsNodeOpener> {
    dir: PathBuf,
    opener: Arc<O>,
}

impl DevNodeDriver<FsNodeOpener> {
    /// A driver rooted at `dir` (typically `/dev`).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_opener(dir, FsNodeOpener)
    }
}

impl<O: NodeOpener> DevNodeDriver<O> {
    /// A driver reaching its nodes through `opener`.
    pub fn with_opener(dir: impl Into<PathBuf>, opener: O) -> Self {
        Self {
            dir: dir.into(),
            opener: Arc::new(opener),
        }
    }
}

impl Usb0Backend<DevNodeDriver> {
    /// Backend over the device-node binding rooted at the configured
    /// node directory.
    pub fn from_config(config: Usb0Config) -> Self {
        let driver = DevNodeDriver::new(config.node_dir.clone());
        Self::with_config(driver, config)
    }
}

impl<O: NodeOpener> Driver for DevNodeDriver<O> {
    type Channel = DevNodeChannel<O>;

    fn open(&self, slot: SlotIndex) -> Option<DevNodeChannel<O>> {
        let path = self.dir.join(channel_name(slot));
        // Probe the node once; a slot without one simply has no device.
        match self.opener.open(&path) {
            Ok(_) => Some(DevNodeChannel {
                path,
                opener: Arc::clone(&self.opener),
            }),
            Err(err) => {
                debug!(slot = slot.0, %err, "slot not present");
                None
            }
        }
    }

    fn cancel_io(&self) -> Option<CancelIo<DevNodeChannel<O>>> {
        None
    }
}

/// Channel to one slot's node.
pub struct DevNodeChannel<O: NodeOpener = FsNodeOpener> {
    path: PathBuf,
    opener: Arc<O>,
}

/// One exchange in flight on a worker thread.
pub struct DevNodeOp {
    result: Mutex<Option<mpsc::Receiver<(OsStatus, usize, Vec<u8>)>>>,
}

impl<O: NodeOpener> Channel for DevNodeChannel<O> {
    type Op = DevNodeOp;

    fn start(&self, code: u32, request: &Request, buffer: Vec<u8>) -> Result<DevNodeOp, OsStatus> {
        let mut stream = match self.opener.open(&self.path) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "node reopen failed");
                return Err(OsStatus::GEN_FAILURE);
            }
        };
        let request = *request;
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name("usb0-devnode-op".to_string())
            .spawn(move || {
                let mut buffer = buffer;
                let (status, transferred) = match exchange(&mut stream, code, &request, &mut buffer)
                {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(%err, "device node exchange failed");
                        (OsStatus::GEN_FAILURE, 0)
                    }
                };
                // Receiver may be gone if the op was dropped unreaped.
                let _ = tx.send((status, transferred, buffer));
            });

        match spawned {
            Ok(_) => Ok(DevNodeOp {
                result: Mutex::new(Some(rx)),
            }),
            // Could not even set the operation up.
            Err(_) => Err(OsStatus::NO_MEMORY),
        }
    }
}

impl Operation for DevNodeOp {
    fn wait(&self) -> Completion {
        let rx = self
            .result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match rx.map(|rx| rx.recv()) {
            Some(Ok((status, transferred, buffer))) => Completion {
                status,
                transferred,
                buffer,
            },
            // Worker died, or waited twice.
            _ => Completion {
                status: OsStatus::GEN_FAILURE,
                transferred: 0,
                buffer: Vec::new(),
            },
        }
    }
}

/// Requests whose data stage flows device-to-host.
fn is_read_style(code: u32) -> bool {
    code == IOCTL_GET_DESCRIPTOR || code == IOCTL_BULK_OR_INTERRUPT_READ
}

fn exchange<S: Read + Write>(
    stream: &mut S,
    code: u32,
    request: &Request,
    buffer: &mut Vec<u8>,
) -> io::Result<(OsStatus, usize)> {
    let read_style = is_read_style(code);

    let mut frame = Vec::with_capacity(24 + buffer.len());
    frame.extend_from_slice(&code.to_le_bytes());
    frame.extend_from_slice(&request.encode());
    let out_len = if read_style { buffer.len() as u32 } else { 0 };
    frame.extend_from_slice(&out_len.to_le_bytes());
    let in_len = if read_style { 0 } else { buffer.len() as u32 };
    frame.extend_from_slice(&in_len.to_le_bytes());
    if !read_style {
        frame.extend_from_slice(buffer);
    }
    stream.write_all(&frame)?;

    let mut head = [0u8; 8];
    stream.read_exact(&mut head)?;
    let status = OsStatus(LittleEndian::read_u32(&head[0..4]));
    let transferred = LittleEndian::read_u32(&head[4..8]) as usize;

    if read_style && status.is_success() {
        let n = transferred.min(buffer.len());
        stream.read_exact(&mut buffer[..n])?;
        // The node sends all `transferred` bytes; consume what the caller
        // did not ask for so the conversation ends cleanly framed.
        let surplus = (transferred - n) as u64;
        if surplus > 0 && io::copy(&mut io::Read::by_ref(&mut *stream).take(surplus), &mut io::sink())? != surplus
        {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }
    Ok((status, transferred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{IOCTL_ABORT_ENDPOINT, IOCTL_BULK_OR_INTERRUPT_WRITE, IOCTL_CLAIM_INTERFACE};
    use crate::testing::MockDriver;
    use std::io::Cursor;
    use std::sync::Condvar;
    use std::time::Duration;
    use usbcore::{Backend, DeviceHandle, Transfer, TransferStatus};

    fn response_bytes(status: OsStatus, transferred: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + payload.len());
        bytes.extend_from_slice(&status.0.to_le_bytes());
        bytes.extend_from_slice(&transferred.to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Serves one canned response and records everything written to it.
    struct FakeStream {
        response: Cursor<Vec<u8>>,
        wrote: Vec<u8>,
    }

    impl FakeStream {
        fn new(response: Vec<u8>) -> Self {
            Self {
                response: Cursor::new(response),
                wrote: Vec::new(),
            }
        }
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.response.read(buf)
        }
    }

    impl Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.wrote.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_node_means_empty_slot() {
        let dir = tempfile::tempdir().unwrap();
        let driver = DevNodeDriver::new(dir.path());
        assert!(driver.open(SlotIndex(1)).is_none());
    }

    #[test]
    fn test_no_generic_cancel_primitive() {
        let driver = DevNodeDriver::new("/dev");
        assert!(driver.cancel_io().is_none());
    }

    #[test]
    fn test_read_style_codes() {
        assert!(is_read_style(IOCTL_GET_DESCRIPTOR));
        assert!(is_read_style(IOCTL_BULK_OR_INTERRUPT_READ));
        assert!(!is_read_style(IOCTL_BULK_OR_INTERRUPT_WRITE));
        assert!(!is_read_style(IOCTL_CLAIM_INTERFACE));
    }

    #[test]
    fn test_read_exchange_frames_request_and_fills_buffer() {
        let payload = [0xde, 0xad, 0xbe, 0xef];
        let mut stream = FakeStream::new(response_bytes(OsStatus::SUCCESS, 4, &payload));
        let request = Request::endpoint(0x81);
        let mut buffer = vec![0u8; 8];

        let (status, transferred) =
            exchange(&mut stream, IOCTL_BULK_OR_INTERRUPT_READ, &request, &mut buffer).unwrap();
        assert_eq!(status, OsStatus::SUCCESS);
        assert_eq!(transferred, 4);
        assert_eq!(&buffer[..4], &payload);

        let mut expected = Vec::new();
        expected.extend_from_slice(&IOCTL_BULK_OR_INTERRUPT_READ.to_le_bytes());
        expected.extend_from_slice(&request.encode());
        expected.extend_from_slice(&8u32.to_le_bytes());
        expected.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(stream.wrote, expected);
    }

    #[test]
    fn test_write_exchange_carries_payload_in_frame() {
        let mut stream = FakeStream::new(response_bytes(OsStatus::SUCCESS, 3, &[]));
        let request = Request::endpoint(0x02);
        let mut buffer = vec![1, 2, 3];

        let (status, transferred) = exchange(
            &mut stream,
            IOCTL_BULK_OR_INTERRUPT_WRITE,
            &request,
            &mut buffer,
        )
        .unwrap();
        assert_eq!(status, OsStatus::SUCCESS);
        assert_eq!(transferred, 3);

        let mut expected = Vec::new();
        expected.extend_from_slice(&IOCTL_BULK_OR_INTERRUPT_WRITE.to_le_bytes());
        expected.extend_from_slice(&request.encode());
        expected.extend_from_slice(&0u32.to_le_bytes());
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(&[1, 2, 3]);
        assert_eq!(stream.wrote, expected);
    }

    #[test]
    fn test_overlong_read_reply_is_drained() {
        let mut stream = FakeStream::new(response_bytes(OsStatus::SUCCESS, 8, &[9u8; 8]));
        let mut buffer = vec![0u8; 4];

        let (status, transferred) = exchange(
            &mut stream,
            IOCTL_BULK_OR_INTERRUPT_READ,
            &Request::endpoint(0x81),
            &mut buffer,
        )
        .unwrap();
        assert_eq!(status, OsStatus::SUCCESS);
        assert_eq!(transferred, 8);
        assert_eq!(buffer, vec![9u8; 4]);
        // The surplus left the stream with the exchange.
        let total = stream.response.get_ref().len() as u64;
        assert_eq!(stream.response.position(), total);
    }

    #[test]
    fn test_truncated_response_is_an_exchange_error() {
        // Less than the 8-byte response head.
        let mut stream = FakeStream::new(vec![0u8; 3]);
        let mut buffer = vec![0u8; 8];
        let result = exchange(
            &mut stream,
            IOCTL_BULK_OR_INTERRUPT_READ,
            &Request::endpoint(0x81),
            &mut buffer,
        );
        assert!(result.is_err());
    }

    /// A read submission parked on the node until aborted.
    struct HangCell {
        endpoint: u8,
        reply: Mutex<Option<Vec<u8>>>,
        cond: Condvar,
    }

    impl HangCell {
        fn wait_reply(&self) -> Vec<u8> {
            let mut reply = self.reply.lock().unwrap();
            loop {
                if let Some(bytes) = reply.take() {
                    return bytes;
                }
                reply = self.cond.wait(reply).unwrap();
            }
        }

        fn fill(&self, bytes: Vec<u8>) {
            *self.reply.lock().unwrap() = Some(bytes);
            self.cond.notify_all();
        }
    }

    /// Shared state of the scripted slot-1 node.
    struct NodeState {
        descriptor: Vec<u8>,
        hung: Mutex<Vec<Arc<HangCell>>>,
    }

    impl NodeState {
        fn hung_reads(&self) -> usize {
            self.hung.lock().unwrap().len()
        }
    }

    /// Opener whose streams answer descriptor fetches, park bulk reads
    /// until an abort-endpoint request releases them, and accept
    /// everything else.
    struct ScriptedOpener {
        node: Arc<NodeState>,
    }

    impl NodeOpener for ScriptedOpener {
        type Stream = ScriptedStream;

        fn open(&self, path: &Path) -> io::Result<ScriptedStream> {
            if path.file_name().and_then(|n| n.to_str()) == Some("usb0-0001") {
                Ok(ScriptedStream {
                    node: Arc::clone(&self.node),
                    incoming: Vec::new(),
                    response: None,
                    hang: None,
                })
            } else {
                Err(io::ErrorKind::NotFound.into())
            }
        }
    }

    struct ScriptedStream {
        node: Arc<NodeState>,
        incoming: Vec<u8>,
        response: Option<Cursor<Vec<u8>>>,
        hang: Option<Arc<HangCell>>,
    }

    impl ScriptedStream {
        fn process(&mut self, frame: &[u8]) {
            let code = LittleEndian::read_u32(&frame[0..4]);
            let value = LittleEndian::read_u32(&frame[4..8]) as u8;
            let out_len = LittleEndian::read_u32(&frame[16..20]) as usize;
            match code {
                IOCTL_GET_DESCRIPTOR => {
                    let n = self.node.descriptor.len().min(out_len);
                    let payload = self.node.descriptor[..n].to_vec();
                    self.response = Some(Cursor::new(response_bytes(
                        OsStatus::SUCCESS,
                        n as u32,
                        &payload,
                    )));
                }
                IOCTL_BULK_OR_INTERRUPT_READ => {
                    let cell = Arc::new(HangCell {
                        endpoint: value,
                        reply: Mutex::new(None),
                        cond: Condvar::new(),
                    });
                    self.node.hung.lock().unwrap().push(Arc::clone(&cell));
                    self.hang = Some(cell);
                }
                IOCTL_ABORT_ENDPOINT => {
                    let mut hung = self.node.hung.lock().unwrap();
                    let mut kept = Vec::new();
                    for cell in hung.drain(..) {
                        if cell.endpoint == value {
                            cell.fill(response_bytes(OsStatus::OPERATION_ABORTED, 0, &[]));
                        } else {
                            kept.push(cell);
                        }
                    }
                    *hung = kept;
                    drop(hung);
                    self.response = Some(Cursor::new(response_bytes(OsStatus::SUCCESS, 0, &[])));
                }
                _ => {
                    self.response = Some(Cursor::new(response_bytes(OsStatus::SUCCESS, 0, &[])));
                }
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.response.is_none() {
                if let Some(cell) = self.hang.take() {
                    let reply = cell.wait_reply();
                    self.response = Some(Cursor::new(reply));
                }
            }
            match &mut self.response {
                Some(cursor) => cursor.read(buf),
                None => Ok(0),
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.incoming.extend_from_slice(buf);
            if self.incoming.len() >= 24 {
                let in_len = LittleEndian::read_u32(&self.incoming[20..24]) as usize;
                if self.incoming.len() >= 24 + in_len {
                    let frame: Vec<u8> = self.incoming.drain(..24 + in_len).collect();
                    self.process(&frame);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_abort_fallback_proceeds_while_exchange_hangs() {
        let node = Arc::new(NodeState {
            descriptor: MockDriver::sample_descriptor(0x1234, 0x5678),
            hung: Mutex::new(Vec::new()),
        });
        let driver = DevNodeDriver::with_opener(
            "nodes",
            ScriptedOpener {
                node: Arc::clone(&node),
            },
        );
        let config = Usb0Config {
            max_slots: 4,
            ..Usb0Config::default()
        };
        let backend = Arc::new(Usb0Backend::with_config(driver, config));

        let devices = backend.device_list().unwrap();
        assert_eq!(devices.len(), 1);
        let handle = DeviceHandle::open(&devices[0]);

        let pending = backend
            .submit_transfer(&handle, Transfer::bulk(0x81, vec![0; 16]))
            .unwrap();

        // The worker parks the read shortly after submission.
        for _ in 0..200 {
            if node.hung_reads() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(node.hung_reads(), 1);

        // Cancellation must come back promptly even though the data
        // exchange is still blocked on the node.
        let (tx, rx) = mpsc::channel();
        let cancel_backend = Arc::clone(&backend);
        thread::spawn(move || {
            let result = cancel_backend.cancel_transfer(&pending);
            let _ = tx.send((result, pending));
        });
        let (result, pending) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("cancellation stalled behind the hung exchange");
        assert_eq!(result, Ok(()));

        let done = backend.reap_transfer(pending).unwrap();
        assert_eq!(done.status, TransferStatus::Cancelled);
        assert_eq!(done.actual_length, 0);
    }
}
