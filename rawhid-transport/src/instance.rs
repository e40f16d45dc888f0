//! Device groups opened under one (vendor, product) filter

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::TransportError;
use crate::platform::HidHandle;
use crate::transport::Channel;
use crate::types::{Direction, InstanceKey};

/// Whether a device slot can still carry transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Open,
    Closed,
}

/// One opened device in an instance's list
///
/// Closed records keep their slot so the indices of later devices stay put.
pub struct DeviceHandle {
    handle: Arc<dyn HidHandle>,
    state: DeviceState,
}

impl DeviceHandle {
    fn new(handle: Arc<dyn HidHandle>) -> Self {
        Self {
            handle,
            state: DeviceState::Open,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == DeviceState::Open
    }

    fn close(&mut self) {
        if self.is_open() {
            self.handle.close();
            self.state = DeviceState::Closed;
        }
    }
}

/// Read and write channels shared by every device of an instance
pub struct Channels {
    pub reader: Channel,
    pub writer: Channel,
}

impl Channels {
    fn new() -> Self {
        Self {
            reader: Channel::new(Direction::In),
            writer: Channel::new(Direction::Out),
        }
    }
}

/// All devices currently open for one filter pair
pub struct Instance {
    key: InstanceKey,
    devices: RwLock<Vec<DeviceHandle>>,
    channels: OnceLock<Channels>,
}

impl Instance {
    pub fn new(key: InstanceKey) -> Self {
        Self {
            key,
            devices: RwLock::new(Vec::new()),
            channels: OnceLock::new(),
        }
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    /// Allocate the read/write channels on first use; later calls are no-ops
    pub fn ensure_channels(&self) -> &Channels {
        self.channels.get_or_init(|| {
            debug!(
                "Allocating channels for {:04X}:{:04X}",
                self.key.vendor_id, self.key.product_id
            );
            Channels::new()
        })
    }

    pub fn channels(&self) -> Option<&Channels> {
        self.channels.get()
    }

    /// Close every device and empty the list
    pub fn clear_devices(&self) {
        let mut devices = self.devices.write();
        if devices.is_empty() {
            return;
        }
        debug!(
            "Releasing {} device(s) of {:04X}:{:04X}",
            devices.len(),
            self.key.vendor_id,
            self.key.product_id
        );
        for device in devices.iter_mut() {
            device.close();
        }
        devices.clear();
    }

    /// Append an opened device, returning its index
    pub fn push_device(&self, handle: Arc<dyn HidHandle>) -> usize {
        let mut devices = self.devices.write();
        devices.push(DeviceHandle::new(handle));
        devices.len() - 1
    }

    /// Handle of the open device at `index`
    pub fn open_handle(&self, index: usize) -> Result<Arc<dyn HidHandle>, TransportError> {
        let devices = self.devices.read();
        let device = devices
            .get(index)
            .ok_or(TransportError::DeviceNotFound(index))?;
        if !device.is_open() {
            return Err(TransportError::DeviceNotOpen(index));
        }
        Ok(Arc::clone(&device.handle))
    }

    /// Close the device at `index`; returns false if absent or already closed
    pub fn close_device(&self, index: usize) -> bool {
        let mut devices = self.devices.write();
        match devices.get_mut(index) {
            Some(device) if device.is_open() => {
                device.close();
                true
            }
            _ => false,
        }
    }

    pub fn device_state(&self, index: usize) -> Option<DeviceState> {
        self.devices.read().get(index).map(DeviceHandle::state)
    }

    /// Number of slots, closed ones included
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    pub fn open_count(&self) -> usize {
        self.devices.read().iter().filter(|d| d.is_open()).count()
    }
}
