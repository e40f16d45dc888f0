//! hidapi-backed platform
//!
//! hidapi only offers blocking reads with a timeout, so pending transfers run
//! on a short-lived worker thread per direction. A read worker polls
//! `read_timeout` in small slices and checks its cancel flag between slices;
//! cancelling a read raises the flag and joins the worker, so the read is gone
//! before the caller's channel lock is released.
//!
//! Writes cannot be interrupted once they reach the OS. Each handle therefore
//! opens the path twice: a stalled write only holds the write device, and a
//! cancelled write worker is detached rather than joined. Its late completion
//! carries a stale ticket and is dropped.
//!
//! hidapi strips the report-id byte of unnumbered input reports. Reads stage
//! the payload behind a zero byte so completions keep the raw framing.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::overlapped::Ticket;
use crate::platform::{HidHandle, HidPlatform};
use crate::protocol::{timing, FRAMING_LEN};
use crate::types::{
    Attributes, Capabilities, Completion, Direction, HidInterfaceInfo, Submitted,
};

type SharedDevice = Arc<Mutex<Option<HidDevice>>>;

/// Host HID access through hidapi
pub struct HidapiPlatform {
    api: Mutex<HidApi>,
    poll_interval: Duration,
}

impl HidapiPlatform {
    pub fn new() -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Mutex::new(api),
            poll_interval: Duration::from_millis(timing::POLL_INTERVAL_MS),
        })
    }

    /// Set the read poll slice (default 10ms)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }
}

impl HidPlatform for HidapiPlatform {
    fn interfaces(&self) -> Result<Vec<HidInterfaceInfo>, TransportError> {
        let mut api = self.api.lock();
        api.refresh_devices()?;
        let interfaces: Vec<_> = api
            .device_list()
            .map(|info| HidInterfaceInfo {
                path: info.path().to_owned(),
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                usage_page: info.usage_page(),
                usage: info.usage(),
                interface_number: info.interface_number(),
                serial: info.serial_number().map(|s| s.to_string()),
                product_name: info.product_string().map(|s| s.to_string()),
            })
            .collect();
        debug!("hidapi listed {} interfaces", interfaces.len());
        Ok(interfaces)
    }

    fn open(&self, interface: &HidInterfaceInfo) -> Result<Arc<dyn HidHandle>, TransportError> {
        let api = self.api.lock();
        let reader = api.open_path(&interface.path)?;
        let writer = api.open_path(&interface.path)?;
        Ok(Arc::new(HidapiHandle::new(
            reader,
            writer,
            interface,
            self.poll_interval,
        )))
    }

    fn name(&self) -> &'static str {
        "hidapi"
    }
}

struct Worker {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Raise the cancel flag and wait for the thread to exit
    fn stop(self) {
        self.cancel.store(true, Ordering::Release);
        if self.thread.join().is_err() {
            warn!("HID transfer worker panicked");
        }
    }

    /// Raise the cancel flag and let the thread finish on its own
    fn detach(self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn retire(self, direction: Direction) {
        match direction {
            Direction::In => self.stop(),
            Direction::Out => self.detach(),
        }
    }
}

/// An open hidapi device
pub struct HidapiHandle {
    reader: SharedDevice,
    /// Separate device for OUT reports; taken on close
    writer: Mutex<Option<SharedDevice>>,
    path: CString,
    /// Usage of the collection this handle was opened for
    capabilities: Capabilities,
    poll_ms: i32,
    read_worker: Mutex<Option<Worker>>,
    write_worker: Mutex<Option<Worker>>,
}

impl HidapiHandle {
    fn new(
        reader: HidDevice,
        writer: HidDevice,
        interface: &HidInterfaceInfo,
        poll_interval: Duration,
    ) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(reader))),
            writer: Mutex::new(Some(Arc::new(Mutex::new(Some(writer))))),
            path: interface.path.clone(),
            capabilities: Capabilities {
                usage_page: interface.usage_page,
                usage: interface.usage,
            },
            poll_ms: i32::try_from(poll_interval.as_millis()).unwrap_or(i32::MAX),
            read_worker: Mutex::new(None),
            write_worker: Mutex::new(None),
        }
    }

    fn worker_slot(&self, direction: Direction) -> &Mutex<Option<Worker>> {
        match direction {
            Direction::In => &self.read_worker,
            Direction::Out => &self.write_worker,
        }
    }

    fn spawn<F>(&self, direction: Direction, job: F) -> Result<(), TransportError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let mut slot = self.worker_slot(direction).lock();
        if let Some(previous) = slot.take() {
            previous.retire(direction);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let name = match direction {
            Direction::In => "rawhid-read",
            Direction::Out => "rawhid-write",
        };
        let thread = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || job(flag))?;
        *slot = Some(Worker { cancel, thread });
        Ok(())
    }
}

fn read_worker(
    device: SharedDevice,
    cancel: Arc<AtomicBool>,
    mut buf: Vec<u8>,
    poll_ms: i32,
    ticket: Ticket,
) {
    while !cancel.load(Ordering::Acquire) {
        let guard = device.lock();
        let Some(dev) = guard.as_ref() else {
            ticket.complete(Err(TransportError::Disconnected));
            return;
        };
        match dev.read_timeout(&mut buf[FRAMING_LEN..], poll_ms) {
            Ok(0) => {}
            Ok(n) => {
                drop(guard);
                buf.truncate(n + FRAMING_LEN);
                ticket.complete(Ok(Completion::read(buf)));
                return;
            }
            Err(e) => {
                drop(guard);
                warn!("HID read failed: {}", e);
                ticket.complete(Err(e.into()));
                return;
            }
        }
    }
    trace!("Read worker cancelled");
}

fn write_worker(device: SharedDevice, cancel: Arc<AtomicBool>, data: Vec<u8>, ticket: Ticket) {
    // May wait here behind an earlier write that was cancelled but is still in the OS
    let guard = device.lock();
    if cancel.load(Ordering::Acquire) {
        trace!("Write worker cancelled before writing");
        return;
    }
    let result = match guard.as_ref() {
        Some(dev) => dev.write(&data).map(Completion::write).map_err(|e| {
            warn!("HID write failed: {}", e);
            TransportError::from(e)
        }),
        None => Err(TransportError::Disconnected),
    };
    drop(guard);
    if !ticket.complete(result) {
        debug!("Late write completion dropped");
    }
}

impl HidHandle for HidapiHandle {
    fn attributes(&self) -> Result<Attributes, TransportError> {
        let device = self.reader.lock();
        let dev = device.as_ref().ok_or(TransportError::Disconnected)?;
        let info = dev.get_device_info()?;
        Ok(Attributes {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
        })
    }

    fn capabilities(&self) -> Result<Capabilities, TransportError> {
        // hidraw reports only the first collection through the open device
        if self.reader.lock().is_none() {
            return Err(TransportError::Disconnected);
        }
        Ok(self.capabilities)
    }

    fn begin_read(&self, len: usize, ticket: Ticket) -> Result<Submitted, TransportError> {
        let mut buf = vec![0u8; len.max(FRAMING_LEN)];
        {
            let device = self.reader.lock();
            let dev = device.as_ref().ok_or(TransportError::Disconnected)?;
            // Non-blocking attempt first: data already queued completes synchronously
            let n = dev.read_timeout(&mut buf[FRAMING_LEN..], 0)?;
            if n > 0 {
                buf.truncate(n + FRAMING_LEN);
                return Ok(Submitted::Completed(Completion::read(buf)));
            }
        }

        let device = Arc::clone(&self.reader);
        let poll_ms = self.poll_ms;
        self.spawn(Direction::In, move |cancel| {
            read_worker(device, cancel, buf, poll_ms, ticket)
        })?;
        Ok(Submitted::Pending)
    }

    fn begin_write(&self, data: Vec<u8>, ticket: Ticket) -> Result<Submitted, TransportError> {
        let device = self
            .writer
            .lock()
            .clone()
            .ok_or(TransportError::Disconnected)?;
        self.spawn(Direction::Out, move |cancel| {
            write_worker(device, cancel, data, ticket)
        })?;
        Ok(Submitted::Pending)
    }

    fn cancel(&self, direction: Direction) {
        if let Some(worker) = self.worker_slot(direction).lock().take() {
            debug!("Cancelling {:?} transfer on {:?}", direction, self.path);
            worker.retire(direction);
        }
    }

    fn close(&self) {
        self.cancel(Direction::In);
        self.cancel(Direction::Out);
        // A detached write worker keeps its clone until the OS returns
        let writer = self.writer.lock().take();
        if self.reader.lock().take().is_some() || writer.is_some() {
            debug!("Closed {:?}", self.path);
        }
    }
}

impl Drop for HidapiHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // requires a HID subsystem
    fn test_list_interfaces() {
        let platform = HidapiPlatform::new().unwrap();
        let result = platform.interfaces();
        assert!(result.is_ok());
    }
}
