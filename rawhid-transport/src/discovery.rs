//! Device enumeration and matching

use std::collections::HashSet;
use std::ffi::CString;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::instance::Instance;
use crate::platform::{HidHandle, HidPlatform};
use crate::types::{DeviceFilter, HidInterfaceInfo};

/// Why a candidate interface was passed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OpenFailed,
    AttributesUnavailable,
    IdMismatch,
    CapabilitiesUnavailable,
    UsageMismatch,
    /// Another collection listed under the same path was already opened
    PathAlreadyOpen,
}

/// Opens every present interface that matches a [`DeviceFilter`]
pub struct DeviceEnumerator<'a> {
    platform: &'a dyn HidPlatform,
}

impl<'a> DeviceEnumerator<'a> {
    pub fn new(platform: &'a dyn HidPlatform) -> Self {
        Self { platform }
    }

    /// Replace `instance`'s device list with up to `max_count` matching devices
    ///
    /// Existing devices are closed first, even when `max_count` is zero.
    /// Per-candidate failures only skip that candidate; if the platform cannot
    /// list interfaces at all the instance is left empty and 0 is returned.
    /// A path is opened at most once even when several of its collections
    /// are listed and match.
    pub fn populate(&self, instance: &Instance, filter: &DeviceFilter, max_count: usize) -> usize {
        instance.clear_devices();
        if max_count < 1 {
            return 0;
        }
        instance.ensure_channels();

        let candidates = match self.platform.interfaces() {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("{} backend could not list HID interfaces: {}", self.platform.name(), e);
                return 0;
            }
        };

        let mut count = 0;
        let mut opened: HashSet<CString> = HashSet::new();
        for candidate in &candidates {
            let checked = if opened.contains(&candidate.path) {
                Err(SkipReason::PathAlreadyOpen)
            } else {
                self.try_open(candidate, filter)
            };
            match checked {
                Ok(handle) => {
                    opened.insert(candidate.path.clone());
                    let index = instance.push_device(handle);
                    debug!(
                        "Opened {:04X}:{:04X} page={:04X} usage={:04X} as index {}",
                        candidate.vendor_id,
                        candidate.product_id,
                        candidate.usage_page,
                        candidate.usage,
                        index
                    );
                    count += 1;
                    if count >= max_count {
                        break;
                    }
                }
                Err(reason) => {
                    debug!("Skipping {:?}: {:?}", candidate.path, reason);
                }
            }
        }

        info!(
            "Opened {} device(s) for filter {:04X}:{:04X} page={:04X} usage={:04X}",
            count, filter.vendor_id, filter.product_id, filter.usage_page, filter.usage
        );
        count
    }

    /// Open one candidate and check it against `filter`
    ///
    /// The handle is released on every rejection path.
    fn try_open(
        &self,
        candidate: &HidInterfaceInfo,
        filter: &DeviceFilter,
    ) -> Result<Arc<dyn HidHandle>, SkipReason> {
        let handle = self.platform.open(candidate).map_err(|e| {
            debug!("Open failed for {:?}: {}", candidate.path, e);
            SkipReason::OpenFailed
        })?;

        let verdict = check_handle(&*handle, filter);
        if let Err(reason) = verdict {
            handle.close();
            return Err(reason);
        }
        Ok(handle)
    }

    /// List present interfaces without opening them
    pub fn list(&self) -> Result<Vec<HidInterfaceInfo>, TransportError> {
        self.platform.interfaces()
    }
}

fn check_handle(handle: &dyn HidHandle, filter: &DeviceFilter) -> Result<(), SkipReason> {
    let attrs = handle
        .attributes()
        .map_err(|_| SkipReason::AttributesUnavailable)?;
    if !filter.matches_ids(&attrs) {
        return Err(SkipReason::IdMismatch);
    }
    let caps = handle
        .capabilities()
        .map_err(|_| SkipReason::CapabilitiesUnavailable)?;
    if !filter.matches_usage(&caps) {
        return Err(SkipReason::UsageMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockPlatform};
    use crate::types::InstanceKey;

    const VID: u16 = 0x16C0;
    const PID: u16 = 0x0486;

    fn raw(vid: u16, pid: u16) -> MockDevice {
        MockDevice::new(vid, pid, 0xFFAB, 0x0200)
    }

    #[test]
    fn test_matches_in_enumeration_order() {
        let platform = MockPlatform::new();
        let other = platform.attach(raw(0x1234, 0x5678));
        let first = platform.attach(raw(VID, PID));
        let second = platform.attach(raw(VID, PID));
        let instance = Instance::new(InstanceKey::new(VID as i32, PID as i32));

        let filter = DeviceFilter::new(VID as i32, PID as i32);
        let count = DeviceEnumerator::new(&platform).populate(&instance, &filter, 10);

        assert_eq!(count, 2);
        assert_eq!(instance.device_count(), 2);
        // the non-matching device was released after probing
        assert_eq!(other.open_count(), 1);
        assert_eq!(other.close_count(), 1);
        assert_eq!(first.close_count(), 0);
        assert_eq!(second.close_count(), 0);
    }

    #[test]
    fn test_stops_at_max_count() {
        let platform = MockPlatform::new();
        platform.attach(raw(VID, PID));
        let late = platform.attach(raw(VID, PID));
        let instance = Instance::new(InstanceKey::new(-1, -1));

        let count = DeviceEnumerator::new(&platform).populate(&instance, &DeviceFilter::any(), 1);
        assert_eq!(count, 1);
        assert_eq!(late.open_count(), 0);
    }

    #[test]
    fn test_zero_max_count_still_clears() {
        let platform = MockPlatform::new();
        let device = platform.attach(raw(VID, PID));
        let instance = Instance::new(InstanceKey::new(-1, -1));
        let enumerator = DeviceEnumerator::new(&platform);

        assert_eq!(enumerator.populate(&instance, &DeviceFilter::any(), 4), 1);
        assert_eq!(enumerator.populate(&instance, &DeviceFilter::any(), 0), 0);
        assert_eq!(instance.device_count(), 0);
        assert_eq!(device.close_count(), 1);
        assert!(instance.channels().is_some());
    }

    #[test]
    fn test_zero_max_count_does_not_allocate_channels() {
        let platform = MockPlatform::loopback();
        let instance = Instance::new(InstanceKey::new(-1, -1));
        DeviceEnumerator::new(&platform).populate(&instance, &DeviceFilter::any(), 0);
        assert!(instance.channels().is_none());
    }

    #[test]
    fn test_failing_candidates_are_skipped() {
        let platform = MockPlatform::new();
        platform.attach(raw(VID, PID).failing_open());
        let no_attrs = platform.attach(raw(VID, PID).failing_attributes());
        let no_caps = platform.attach(raw(VID, PID).failing_capabilities());
        platform.attach(raw(VID, PID));
        let instance = Instance::new(InstanceKey::new(VID as i32, PID as i32));

        let filter = DeviceFilter::new(VID as i32, PID as i32);
        let count = DeviceEnumerator::new(&platform).populate(&instance, &filter, 10);

        assert_eq!(count, 1);
        assert_eq!(no_attrs.close_count(), 1);
        assert_eq!(no_caps.close_count(), 1);
    }

    #[test]
    fn test_usage_filter_applied() {
        let platform = MockPlatform::new();
        platform.attach(MockDevice::new(VID, PID, 0x0001, 0x0006));
        let raw_hid = platform.attach(MockDevice::new(VID, PID, 0xFFAB, 0x0200));
        let instance = Instance::new(InstanceKey::new(VID as i32, PID as i32));

        let filter = DeviceFilter::new(VID as i32, PID as i32).with_usage(0xFFAB, 0x0200);
        let count = DeviceEnumerator::new(&platform).populate(&instance, &filter, 10);

        assert_eq!(count, 1);
        assert_eq!(raw_hid.close_count(), 0);
    }

    #[test]
    fn test_list_failure_yields_zero() {
        let platform = MockPlatform::loopback();
        platform.set_enumeration_failure(true);
        let instance = Instance::new(InstanceKey::new(-1, -1));

        let count = DeviceEnumerator::new(&platform).populate(&instance, &DeviceFilter::any(), 3);
        assert_eq!(count, 0);
        assert_eq!(instance.device_count(), 0);
    }

    #[test]
    fn test_shared_path_opened_once() {
        let platform = MockPlatform::new();
        let keyboard = platform.attach(MockDevice::new(VID, PID, 0x0001, 0x0006));
        let raw_hid = platform.attach(raw(VID, PID).sharing_path_with(&keyboard));
        let enumerator = DeviceEnumerator::new(&platform);

        // both collections match "any usage" but the device is opened once
        let any = Instance::new(InstanceKey::new(VID as i32, PID as i32));
        let filter = DeviceFilter::new(VID as i32, PID as i32);
        assert_eq!(enumerator.populate(&any, &filter, 10), 1);
        assert_eq!(any.device_count(), 1);
        assert_eq!(raw_hid.open_count(), 0);

        // a usage filter picks the second collection of the shared path
        let usage = Instance::new(InstanceKey::new(-1, -1));
        let filter = DeviceFilter::any().with_usage(0xFFAB, 0x0200);
        assert_eq!(enumerator.populate(&usage, &filter, 10), 1);
        assert_eq!(raw_hid.open_count(), 1);
        assert_eq!(raw_hid.close_count(), 0);
    }
}
