//! Packet transport: timeout-bounded, cancellable transfers
//!
//! ```text
//!   lock channel ─► arm event ─► begin transfer ─┬─ completed now ──────────┐
//!                                                └─ pending ─► wait(timeout)│
//!                                                      │ timed out          │
//!                                                      ▼                    ▼
//!                                         cancel + disarm, unlock     take result, unlock
//!                                              Ok(None)               Ok(Some(n)) / Err
//! ```
//!
//! Each instance owns one channel per direction. A channel's mutex is held
//! from submission until the transfer has completed or been cancelled, so at
//! most one read and one write are outstanding per instance.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::overlapped::{Overlapped, WaitStatus};
use crate::platform::HidHandle;
use crate::protocol::{self, FRAMING_LEN};
use crate::types::{Completion, Direction, Submitted};

/// Result of a packet operation: `Some(n)` bytes moved, `None` on timeout
pub type PacketResult = Result<Option<usize>, TransportError>;

/// Map a packet result to the classic integer convention
///
/// `n` on success, `0` on timeout, `-1` on any error.
pub fn status_code(result: &PacketResult) -> i32 {
    match result {
        Ok(Some(n)) => i32::try_from(*n).unwrap_or(i32::MAX),
        Ok(None) => 0,
        Err(_) => -1,
    }
}

/// Treat a timeout as an error, for callers that need the transfer to happen
pub fn require_transfer(result: PacketResult) -> Result<usize, TransportError> {
    result?.ok_or(TransportError::Timeout)
}

/// One direction's lock and completion event
pub struct Channel {
    direction: Direction,
    lock: Mutex<()>,
    overlapped: Arc<Overlapped>,
}

impl Channel {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            lock: Mutex::new(()),
            overlapped: Overlapped::new(),
        }
    }

    /// Whether a transfer currently holds this channel
    pub fn is_busy(&self) -> bool {
        self.lock.is_locked()
    }

    /// Receive one packet into `buf`, dropping the framing byte
    pub fn recv(&self, handle: &dyn HidHandle, buf: &mut [u8], timeout: Duration) -> PacketResult {
        let guard = self.lock.lock();
        let ticket = self.overlapped.arm();
        let submitted = handle.begin_read(buf.len() + FRAMING_LEN, ticket);
        let completion = self.finish(handle, submitted, timeout);
        drop(guard);

        let Some(completion) = completion? else {
            return Ok(None);
        };
        if completion.transferred == 0 {
            warn!("Read completed with zero bytes");
            return Err(TransportError::ZeroLengthTransfer);
        }
        let payload = protocol::unframe_report(&completion.data, completion.transferred, buf.len());
        buf[..payload.len()].copy_from_slice(payload);
        trace!("Received {} bytes: {}", payload.len(), protocol::hex_dump(payload));
        Ok(Some(payload.len()))
    }

    /// Send one packet, prefixed with report id 0
    pub fn send(&self, handle: &dyn HidHandle, data: &[u8], timeout: Duration) -> PacketResult {
        let staged = protocol::frame_report(data);

        let guard = self.lock.lock();
        let ticket = self.overlapped.arm();
        trace!("Sending {} bytes: {}", data.len(), protocol::hex_dump(data));
        let submitted = handle.begin_write(staged, ticket);
        let completion = self.finish(handle, submitted, timeout);
        drop(guard);

        let Some(completion) = completion? else {
            return Ok(None);
        };
        if completion.transferred == 0 {
            warn!("Write completed with zero bytes");
            return Err(TransportError::ZeroLengthTransfer);
        }
        let sent = (completion.transferred - FRAMING_LEN).min(data.len());
        if sent < data.len() {
            debug!("Short write: {} of {} bytes", sent, data.len());
        }
        Ok(Some(sent))
    }

    /// Wait out a submitted transfer; cancels it on timeout
    ///
    /// Must be called with the channel lock held.
    fn finish(
        &self,
        handle: &dyn HidHandle,
        submitted: Result<Submitted, TransportError>,
        timeout: Duration,
    ) -> Result<Option<Completion>, TransportError> {
        match submitted {
            Ok(Submitted::Completed(completion)) => {
                self.overlapped.disarm();
                Ok(Some(completion))
            }
            Ok(Submitted::Pending) => match self.overlapped.wait(timeout) {
                WaitStatus::Signaled => match self.overlapped.take() {
                    Some(result) => result.map(Some),
                    None => Err(TransportError::Internal(
                        "completion signaled without a result".into(),
                    )),
                },
                WaitStatus::TimedOut => {
                    debug!("{:?} transfer timed out after {:?}, cancelling", self.direction, timeout);
                    handle.cancel(self.direction);
                    self.overlapped.disarm();
                    Ok(None)
                }
            },
            Err(e) => {
                warn!("{:?} transfer failed to start: {}", self.direction, e);
                self.overlapped.disarm();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockPlatform};
    use crate::platform::HidPlatform;

    fn echo_handle() -> (Arc<crate::mock::MockDevice>, Arc<dyn HidHandle>) {
        let platform = MockPlatform::new();
        let device = platform.attach(MockDevice::new(0x16C0, 0x0486, 0xFFAB, 0x0200).with_echo());
        let handle = platform.open(&device.interface()).unwrap();
        (device, handle)
    }

    #[test]
    fn test_status_code() {
        assert_eq!(status_code(&Ok(Some(64))), 64);
        assert_eq!(status_code(&Ok(None)), 0);
        assert_eq!(status_code(&Err(TransportError::Disconnected)), -1);
    }

    #[test]
    fn test_send_then_recv_echo() {
        let (_device, handle) = echo_handle();
        let reader = Channel::new(Direction::In);
        let writer = Channel::new(Direction::Out);

        let payload: Vec<u8> = (0..64).collect();
        let sent = writer.send(&*handle, &payload, Duration::from_millis(100));
        assert_eq!(sent.unwrap(), Some(64));

        let mut buf = [0u8; 64];
        let got = reader.recv(&*handle, &mut buf, Duration::from_millis(100));
        assert_eq!(got.unwrap(), Some(64));
        assert_eq!(&buf[..], &payload[..]);
    }

    #[test]
    fn test_recv_timeout_cancels() {
        let (device, handle) = echo_handle();
        let reader = Channel::new(Direction::In);
        let mut buf = [0u8; 64];

        let got = reader.recv(&*handle, &mut buf, Duration::from_millis(20));
        assert_eq!(got.unwrap(), None);
        assert_eq!(device.cancel_count(Direction::In), 1);
        assert!(!device.has_pending_read());
        assert!(!reader.is_busy());
    }

    #[test]
    fn test_recv_clamps_to_buffer() {
        let (device, handle) = echo_handle();
        let reader = Channel::new(Direction::In);
        device.push_input(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut buf = [0u8; 4];
        let got = reader.recv(&*handle, &mut buf, Duration::from_millis(50));
        assert_eq!(got.unwrap(), Some(4));
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_length_read_is_error() {
        let (device, handle) = echo_handle();
        let reader = Channel::new(Direction::In);
        device.push_raw_input(Vec::new());

        let mut buf = [0u8; 8];
        let got = reader.recv(&*handle, &mut buf, Duration::from_millis(50));
        assert!(matches!(got, Err(TransportError::ZeroLengthTransfer)));
    }

    #[test]
    fn test_short_write_reported() {
        let platform = MockPlatform::new();
        let device = platform.attach(MockDevice::new(1, 1, 0, 0).with_short_writes(10));
        let handle = platform.open(&device.interface()).unwrap();
        let writer = Channel::new(Direction::Out);

        let got = writer.send(&*handle, &[0xAA; 32], Duration::from_millis(50));
        assert_eq!(got.unwrap(), Some(9));
    }

    #[test]
    fn test_stalled_write_times_out() {
        let platform = MockPlatform::new();
        let device = platform.attach(MockDevice::new(1, 1, 0, 0).with_stalled_writes());
        let handle = platform.open(&device.interface()).unwrap();
        let writer = Channel::new(Direction::Out);

        let got = writer.send(&*handle, &[1, 2, 3], Duration::from_millis(20));
        assert_eq!(got.unwrap(), None);
        assert_eq!(device.cancel_count(Direction::Out), 1);
        assert_eq!(device.cancel_count(Direction::In), 0);
    }

    #[test]
    fn test_closed_handle_fails_to_start() {
        let (_device, handle) = echo_handle();
        handle.close();
        let reader = Channel::new(Direction::In);
        let mut buf = [0u8; 8];
        let got = reader.recv(&*handle, &mut buf, Duration::from_millis(20));
        assert!(matches!(got, Err(TransportError::Disconnected)));
    }

    #[test]
    fn test_zero_length_write_is_error() {
        let platform = MockPlatform::new();
        let device = platform.attach(MockDevice::new(1, 1, 0, 0).with_short_writes(0));
        let handle = platform.open(&device.interface()).unwrap();
        let writer = Channel::new(Direction::Out);

        let got = writer.send(&*handle, &[1, 2, 3], Duration::from_millis(50));
        assert!(matches!(got, Err(TransportError::ZeroLengthTransfer)));
        assert_eq!(status_code(&got), -1);
    }

    #[test]
    fn test_late_write_completion_ignored() {
        let platform = MockPlatform::new();
        let device = platform.attach(MockDevice::new(1, 1, 0, 0).with_stalled_writes());
        let handle = platform.open(&device.interface()).unwrap();
        let writer = Channel::new(Direction::Out);

        assert_eq!(writer.send(&*handle, &[1; 8], Duration::from_millis(20)).unwrap(), None);
        device.set_stalled_writes(false);
        // the cancelled write finishing now cannot satisfy anything
        assert_eq!(device.finish_stalled_writes(), 0);

        let got = writer.send(&*handle, &[2; 4], Duration::from_millis(50));
        assert_eq!(got.unwrap(), Some(4));
    }

    #[test]
    fn test_require_transfer() {
        assert_eq!(require_transfer(Ok(Some(3))).unwrap(), 3);
        assert!(matches!(require_transfer(Ok(None)), Err(TransportError::Timeout)));
        assert!(matches!(
            require_transfer(Err(TransportError::Disconnected)),
            Err(TransportError::Disconnected)
        ));
    }
}
