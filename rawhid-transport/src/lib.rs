//! Packet transport for generic (raw) USB HID devices
//!
//! Opens every HID interface matching a vendor/product (and optionally usage
//! page/usage) filter and exchanges fixed-size packets with them:
//!
//! - `open` groups the matching devices under their filter pair (an instance)
//! - `recv` / `send` block up to a timeout and report success, timeout or error
//! - `close` releases one device without renumbering the others
//!
//! ```text
//!   RawHid ── InstanceRegistry ── Instance ──┬── [DeviceHandle; n]
//!                                            ├── reader Channel (lock + event)
//!                                            └── writer Channel (lock + event)
//!      │
//!      └── HidPlatform (hidapi, mock) ── HidHandle
//! ```
//!
//! All recvs of one instance are serialized, as are all sends; a recv and a
//! send may run at the same time.

pub mod config;
pub mod discovery;
pub mod error;
pub mod hidapi_platform;
pub mod instance;
pub mod mock;
pub mod overlapped;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod types;

pub use config::TransportConfig;
pub use discovery::{DeviceEnumerator, SkipReason};
pub use error::TransportError;
pub use hidapi_platform::HidapiPlatform;
pub use instance::{DeviceState, Instance};
pub use mock::{MockDevice, MockPlatform};
pub use overlapped::{Overlapped, Ticket, WaitStatus};
pub use platform::{HidHandle, HidPlatform};
pub use protocol::MAX_PACKET;
pub use registry::InstanceRegistry;
pub use transport::{require_transfer, status_code, PacketResult};
pub use types::{
    Attributes, Capabilities, Completion, DeviceFilter, Direction, HidInterfaceInfo,
    InstanceKey, Submitted,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// Raw HID packet API
///
/// Owns the instance registry; dropping it closes every opened device.
/// `open` replaces an instance's device list, so callers must not run it
/// concurrently with `recv`/`send` on the same filter pair: in-flight
/// transfers on the replaced handles fail.
pub struct RawHid {
    platform: Arc<dyn HidPlatform>,
    registry: InstanceRegistry,
    config: TransportConfig,
}

impl RawHid {
    /// Use the host's HID devices through hidapi
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Result<Self, TransportError> {
        let platform = HidapiPlatform::new()?.with_poll_interval(config.poll_interval());
        Ok(Self::with_platform_and_config(Arc::new(platform), config))
    }

    /// Use a custom platform backend
    pub fn with_platform(platform: Arc<dyn HidPlatform>) -> Self {
        Self::with_platform_and_config(platform, TransportConfig::default())
    }

    pub fn with_platform_and_config(platform: Arc<dyn HidPlatform>, config: TransportConfig) -> Self {
        Self {
            platform,
            registry: InstanceRegistry::new(config.registry_capacity),
            config,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn platform_name(&self) -> &'static str {
        self.platform.name()
    }

    /// List every present HID interface without opening it
    pub fn list_interfaces(&self) -> Result<Vec<HidInterfaceInfo>, TransportError> {
        DeviceEnumerator::new(&*self.platform).list()
    }

    /// Open up to `max_count` devices matching `filter`
    ///
    /// Any devices previously opened under the same (vendor, product) pair are
    /// closed first and their indices become invalid. Returns the number of
    /// devices opened; fails only when a new filter pair does not fit in the
    /// registry.
    pub fn open(&self, max_count: usize, filter: &DeviceFilter) -> Result<usize, TransportError> {
        let instance = self
            .registry
            .lookup_or_register(filter.key())
            .ok_or(TransportError::RegistryFull(self.registry.capacity()))?;
        Ok(DeviceEnumerator::new(&*self.platform).populate(&instance, filter, max_count))
    }

    /// Receive one packet into `buf` (at most `buf.len()` payload bytes)
    ///
    /// Returns `Ok(Some(n))` with the payload length, `Ok(None)` if nothing
    /// arrived within `timeout`.
    pub fn recv(
        &self,
        vendor_id: i32,
        product_id: i32,
        index: usize,
        buf: &mut [u8],
        timeout: Duration,
    ) -> PacketResult {
        protocol::check_packet_len(buf.len(), self.config.packet_limit())?;
        let (instance, handle) = self.resolve(vendor_id, product_id, index)?;
        instance
            .ensure_channels()
            .reader
            .recv(&*handle, buf, timeout)
    }

    /// Send one packet
    ///
    /// Returns `Ok(Some(n))` with the payload bytes written (`buf.len()` unless
    /// the device took a short transfer), `Ok(None)` on timeout.
    pub fn send(
        &self,
        vendor_id: i32,
        product_id: i32,
        index: usize,
        buf: &[u8],
        timeout: Duration,
    ) -> PacketResult {
        protocol::check_packet_len(buf.len(), self.config.packet_limit())?;
        let (instance, handle) = self.resolve(vendor_id, product_id, index)?;
        instance
            .ensure_channels()
            .writer
            .send(&*handle, buf, timeout)
    }

    /// Close one device; unknown or already closed indices are ignored
    pub fn close(&self, vendor_id: i32, product_id: i32, index: usize) {
        let key = InstanceKey::new(vendor_id, product_id);
        let closed = self
            .registry
            .lookup(key)
            .is_some_and(|instance| instance.close_device(index));
        if closed {
            debug!("Closed device {} of {:04X}:{:04X}", index, vendor_id, product_id);
        } else {
            debug!(
                "Close of {:04X}:{:04X} index {} ignored: not open",
                vendor_id, product_id, index
            );
        }
    }

    /// Number of open devices under a filter pair
    pub fn open_count(&self, vendor_id: i32, product_id: i32) -> usize {
        self.registry
            .lookup(InstanceKey::new(vendor_id, product_id))
            .map_or(0, |instance| instance.open_count())
    }

    /// Close everything and forget all filter pairs
    pub fn close_all(&self) {
        self.registry.clear();
    }

    fn resolve(
        &self,
        vendor_id: i32,
        product_id: i32,
        index: usize,
    ) -> Result<(Arc<Instance>, Arc<dyn HidHandle>), TransportError> {
        let instance = self
            .registry
            .lookup(InstanceKey::new(vendor_id, product_id))
            .ok_or(TransportError::InstanceNotFound {
                vendor_id,
                product_id,
            })?;
        let handle = instance.open_handle(index)?;
        Ok((instance, handle))
    }
}

impl Drop for RawHid {
    fn drop(&mut self) {
        self.registry.clear();
    }
}
