//! In-memory HID platform
//!
//! `MockPlatform` hosts simulated raw HID devices so the transport can be
//! exercised without hardware: by the test suites, and by the CLI's `--mock`
//! loopback mode. Devices can echo writes back as input reports, stall
//! writes, report short transfers, or fail individual enumeration steps.
//! Like a real OS write, a stalled write survives `cancel` and can still
//! complete later through its (by then stale) ticket.

use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::TransportError;
use crate::overlapped::Ticket;
use crate::platform::{HidHandle, HidPlatform};
use crate::protocol;
use crate::types::{
    Attributes, Capabilities, Completion, Direction, HidInterfaceInfo, Submitted,
};

/// Simulated host with a list of attached devices
#[derive(Default)]
pub struct MockPlatform {
    devices: Mutex<Vec<Arc<MockDevice>>>,
    fail_enumeration: AtomicBool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform with one echoing device using the PJRC raw HID ids
    pub fn loopback() -> Self {
        let platform = Self::new();
        platform.attach(
            MockDevice::new(
                protocol::teensy::VENDOR_ID,
                protocol::teensy::PRODUCT_ID,
                protocol::teensy::USAGE_PAGE,
                protocol::teensy::USAGE,
            )
            .with_echo(),
        );
        platform
    }

    /// Plug in a device; it is listed after every device attached before it
    ///
    /// Devices without a path get a fresh one.
    pub fn attach(&self, mut device: MockDevice) -> Arc<MockDevice> {
        let mut devices = self.devices.lock();
        if device.path.as_bytes().is_empty() {
            device.path = CString::new(format!("mock:{}", devices.len())).unwrap_or_default();
        }
        let device = Arc::new(device);
        devices.push(Arc::clone(&device));
        device
    }

    /// Unplug every device
    pub fn detach_all(&self) {
        self.devices.lock().clear();
    }

    /// Make `interfaces()` fail as if the host device list were unavailable
    pub fn set_enumeration_failure(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    pub fn devices(&self) -> Vec<Arc<MockDevice>> {
        self.devices.lock().clone()
    }
}

impl HidPlatform for MockPlatform {
    fn interfaces(&self) -> Result<Vec<HidInterfaceInfo>, TransportError> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(TransportError::HidError("device list unavailable".into()));
        }
        Ok(self.devices.lock().iter().map(|d| d.interface()).collect())
    }

    fn open(&self, interface: &HidInterfaceInfo) -> Result<Arc<dyn HidHandle>, TransportError> {
        let path = interface.path.as_c_str();
        let device = self
            .devices
            .lock()
            .iter()
            .find(|d| {
                d.path.as_c_str() == path
                    && d.usage_page == interface.usage_page
                    && d.usage == interface.usage
            })
            .cloned()
            .ok_or_else(|| TransportError::HidError(format!("no device at {:?}", path)))?;
        if device.fail_open {
            return Err(TransportError::HidPermissionDenied(format!(
                "open {:?}",
                path
            )));
        }
        device.state.lock().opens += 1;
        Ok(Arc::new(MockHandle {
            device,
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[derive(Default)]
struct MockState {
    /// Input reports waiting to be read, framing byte included
    inbound: VecDeque<Vec<u8>>,
    pending_read: Option<(usize, Ticket)>,
    /// Stalled writes with their length; cancel leaves them in flight
    stalled_writes: Vec<(usize, Ticket)>,
    /// Payloads written by the host, framing byte removed
    written: Vec<Vec<u8>>,
    reads_started: usize,
    cancels_in: usize,
    cancels_out: usize,
    opens: usize,
    closes: usize,
}

/// A simulated raw HID device
pub struct MockDevice {
    path: CString,
    vendor_id: u16,
    product_id: u16,
    usage_page: u16,
    usage: u16,
    echo: bool,
    stall_writes: AtomicBool,
    short_write: Option<usize>,
    fail_open: bool,
    fail_attributes: bool,
    fail_capabilities: bool,
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new(vendor_id: u16, product_id: u16, usage_page: u16, usage: u16) -> Self {
        Self {
            path: CString::default(),
            vendor_id,
            product_id,
            usage_page,
            usage,
            echo: false,
            stall_writes: AtomicBool::new(false),
            short_write: None,
            fail_open: false,
            fail_attributes: false,
            fail_capabilities: false,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Every written report comes back as an input report
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Writes never complete on their own
    pub fn with_stalled_writes(mut self) -> Self {
        *self.stall_writes.get_mut() = true;
        self
    }

    /// Another top-level collection of the device `sibling` belongs to
    ///
    /// Both are listed separately but open through the same path.
    pub fn sharing_path_with(mut self, sibling: &MockDevice) -> Self {
        self.path = sibling.path.clone();
        self
    }

    /// Writes report at most `transferred` bytes (framing byte included)
    pub fn with_short_writes(mut self, transferred: usize) -> Self {
        self.short_write = Some(transferred);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_attributes(mut self) -> Self {
        self.fail_attributes = true;
        self
    }

    pub fn failing_capabilities(mut self) -> Self {
        self.fail_capabilities = true;
        self
    }

    pub fn path(&self) -> &CStr {
        &self.path
    }

    /// The device as the platform lists it
    pub fn interface(&self) -> HidInterfaceInfo {
        HidInterfaceInfo {
            path: self.path.clone(),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            usage_page: self.usage_page,
            usage: self.usage,
            interface_number: 0,
            serial: None,
            product_name: Some("Mock Raw HID".into()),
        }
    }

    /// Start or stop stalling writes issued from now on
    pub fn set_stalled_writes(&self, stall: bool) {
        self.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// Let every stalled write finish, cancelled ones included
    ///
    /// Returns how many completions were accepted by a still-current ticket.
    pub fn finish_stalled_writes(&self) -> usize {
        let stalled = std::mem::take(&mut self.state.lock().stalled_writes);
        stalled
            .into_iter()
            .map(|(len, ticket)| ticket.complete(Ok(Completion::write(len))))
            .filter(|accepted| *accepted)
            .count()
    }

    pub fn stalled_write_count(&self) -> usize {
        self.state.lock().stalled_writes.len()
    }

    /// Queue an input report carrying `payload` behind report id 0
    pub fn push_input(&self, payload: &[u8]) {
        self.deliver(protocol::frame_report(payload));
    }

    /// Queue an input report exactly as the platform would stage it
    pub fn push_raw_input(&self, staged: Vec<u8>) {
        self.deliver(staged);
    }

    /// Payloads the host has written so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    pub fn reads_started(&self) -> usize {
        self.state.lock().reads_started
    }

    pub fn has_pending_read(&self) -> bool {
        self.state.lock().pending_read.is_some()
    }

    pub fn cancel_count(&self, direction: Direction) -> usize {
        let state = self.state.lock();
        match direction {
            Direction::In => state.cancels_in,
            Direction::Out => state.cancels_out,
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    fn deliver(&self, mut report: Vec<u8>) {
        let mut state = self.state.lock();
        match state.pending_read.take() {
            Some((len, ticket)) => {
                report.truncate(len);
                ticket.complete(Ok(Completion::read(report)));
            }
            None => state.inbound.push_back(report),
        }
    }
}

/// An open handle onto a [`MockDevice`]
struct MockHandle {
    device: Arc<MockDevice>,
    closed: AtomicBool,
}

impl MockHandle {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }
}

impl HidHandle for MockHandle {
    fn attributes(&self) -> Result<Attributes, TransportError> {
        self.ensure_open()?;
        if self.device.fail_attributes {
            return Err(TransportError::HidError("attributes unavailable".into()));
        }
        Ok(Attributes {
            vendor_id: self.device.vendor_id,
            product_id: self.device.product_id,
        })
    }

    fn capabilities(&self) -> Result<Capabilities, TransportError> {
        self.ensure_open()?;
        if self.device.fail_capabilities {
            return Err(TransportError::HidError("no report descriptor".into()));
        }
        Ok(Capabilities {
            usage_page: self.device.usage_page,
            usage: self.device.usage,
        })
    }

    fn begin_read(&self, len: usize, ticket: Ticket) -> Result<Submitted, TransportError> {
        self.ensure_open()?;
        let mut state = self.device.state.lock();
        state.reads_started += 1;
        match state.inbound.pop_front() {
            Some(mut report) => {
                report.truncate(len);
                Ok(Submitted::Completed(Completion::read(report)))
            }
            None => {
                state.pending_read = Some((len, ticket));
                Ok(Submitted::Pending)
            }
        }
    }

    fn begin_write(&self, data: Vec<u8>, ticket: Ticket) -> Result<Submitted, TransportError> {
        self.ensure_open()?;
        let transferred = {
            let mut state = self.device.state.lock();
            if self.device.stall_writes.load(Ordering::SeqCst) {
                state.stalled_writes.push((data.len(), ticket));
                return Ok(Submitted::Pending);
            }
            state
                .written
                .push(data.get(protocol::FRAMING_LEN..).unwrap_or_default().to_vec());
            self.device
                .short_write
                .map_or(data.len(), |limit| limit.min(data.len()))
        };
        if self.device.echo {
            self.device.deliver(data);
        }
        Ok(Submitted::Completed(Completion::write(transferred)))
    }

    fn cancel(&self, direction: Direction) {
        let mut state = self.device.state.lock();
        match direction {
            Direction::In => {
                state.pending_read = None;
                state.cancels_in += 1;
            }
            Direction::Out => state.cancels_out += 1,
        }
        debug!("Mock {:?} cancelled {:?}", self.device.path, direction);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.device.state.lock();
        state.pending_read = None;
        state.stalled_writes.clear();
        state.closes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlapped::Overlapped;

    #[test]
    fn test_attach_assigns_distinct_paths() {
        let platform = MockPlatform::new();
        let a = platform.attach(MockDevice::new(1, 1, 0, 0));
        let b = platform.attach(MockDevice::new(1, 1, 0, 0));
        assert_ne!(a.path(), b.path());
        assert_eq!(platform.interfaces().unwrap().len(), 2);
    }

    #[test]
    fn test_enumeration_failure() {
        let platform = MockPlatform::loopback();
        platform.set_enumeration_failure(true);
        assert!(platform.interfaces().is_err());
    }

    #[test]
    fn test_pending_read_completed_by_input() {
        let platform = MockPlatform::new();
        let device = platform.attach(MockDevice::new(1, 1, 0, 0));
        let handle = platform.open(&device.interface()).unwrap();
        let ov = Overlapped::new();

        let submitted = handle.begin_read(65, ov.arm()).unwrap();
        assert!(matches!(submitted, Submitted::Pending));
        device.push_input(&[9, 8, 7]);
        let completion = ov.take().unwrap().unwrap();
        assert_eq!(completion.data, vec![0, 9, 8, 7]);
    }

    #[test]
    fn test_echo_roundtrip_is_immediate() {
        let platform = MockPlatform::loopback();
        let device = platform.devices().remove(0);
        let handle = platform.open(&device.interface()).unwrap();
        let ov = Overlapped::new();

        let write = handle.begin_write(vec![0, 1, 2], ov.arm()).unwrap();
        assert!(matches!(write, Submitted::Completed(c) if c.transferred == 3));
        let read = handle.begin_read(65, ov.arm()).unwrap();
        assert!(matches!(read, Submitted::Completed(c) if c.data == vec![0, 1, 2]));
        assert_eq!(device.written(), vec![vec![1, 2]]);
    }

    #[test]
    fn test_closed_handle_rejects_transfers() {
        let platform = MockPlatform::loopback();
        let device = platform.devices().remove(0);
        let handle = platform.open(&device.interface()).unwrap();
        handle.close();
        handle.close();
        assert_eq!(device.close_count(), 1);
        assert!(matches!(
            handle.begin_read(8, Overlapped::new().arm()),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_cancelled_write_completes_late_and_is_dropped() {
        let platform = MockPlatform::new();
        let device = platform.attach(MockDevice::new(1, 1, 0, 0).with_stalled_writes());
        let handle = platform.open(&device.interface()).unwrap();
        let ov = Overlapped::new();

        let write = handle.begin_write(vec![0, 1, 2], ov.arm()).unwrap();
        assert!(matches!(write, Submitted::Pending));
        handle.cancel(Direction::Out);
        ov.disarm();
        assert_eq!(device.stalled_write_count(), 1);

        assert_eq!(device.finish_stalled_writes(), 0);
        assert!(ov.take().is_none());
    }

    #[test]
    fn test_collections_sharing_a_path() {
        let platform = MockPlatform::new();
        let keyboard = platform.attach(MockDevice::new(1, 1, 0x0001, 0x0006));
        let raw = platform.attach(MockDevice::new(1, 1, 0xFFAB, 0x0200).sharing_path_with(&keyboard));
        assert_eq!(keyboard.path(), raw.path());

        let handle = platform.open(&raw.interface()).unwrap();
        let caps = handle.capabilities().unwrap();
        assert_eq!((caps.usage_page, caps.usage), (0xFFAB, 0x0200));
        assert_eq!(raw.open_count(), 1);
        assert_eq!(keyboard.open_count(), 0);
    }
}
