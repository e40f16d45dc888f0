//! Common types for transport layer

use std::ffi::CString;

use serde::{Deserialize, Serialize};

/// Registry key: the literal (vendor, product) filter pair passed to `open`
///
/// Two calls that mean the same thing but encode "any" differently (0 vs -1)
/// produce different keys and therefore different instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub vendor_id: i32,
    pub product_id: i32,
}

impl InstanceKey {
    pub const fn new(vendor_id: i32, product_id: i32) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

/// Device selection filter for `open`
///
/// A non-positive field matches any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    pub vendor_id: i32,
    pub product_id: i32,
    pub usage_page: i32,
    pub usage: i32,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::any()
    }
}

impl DeviceFilter {
    /// Filter matching every HID interface
    pub const fn any() -> Self {
        Self {
            vendor_id: -1,
            product_id: -1,
            usage_page: -1,
            usage: -1,
        }
    }

    /// Filter on vendor/product id, any usage
    pub const fn new(vendor_id: i32, product_id: i32) -> Self {
        Self {
            vendor_id,
            product_id,
            usage_page: -1,
            usage: -1,
        }
    }

    /// Restrict to a top-level usage page and usage
    pub const fn with_usage(mut self, usage_page: i32, usage: i32) -> Self {
        self.usage_page = usage_page;
        self.usage = usage;
        self
    }

    /// Registry key for this filter
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.vendor_id, self.product_id)
    }

    pub fn matches_ids(&self, attrs: &Attributes) -> bool {
        field_matches(self.vendor_id, attrs.vendor_id)
            && field_matches(self.product_id, attrs.product_id)
    }

    pub fn matches_usage(&self, caps: &Capabilities) -> bool {
        field_matches(self.usage_page, caps.usage_page) && field_matches(self.usage, caps.usage)
    }
}

fn field_matches(filter: i32, actual: u16) -> bool {
    filter <= 0 || filter == i32::from(actual)
}

/// Vendor/product id reported by an opened handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Top-level collection usage reported by an opened handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub usage_page: u16,
    pub usage: u16,
}

/// A HID interface as listed by the platform, before opening
#[derive(Debug, Clone, Serialize)]
pub struct HidInterfaceInfo {
    /// Platform path used to open the interface
    #[serde(serialize_with = "serialize_path")]
    pub path: CString,
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
    pub interface_number: i32,
    /// Serial number if available
    pub serial: Option<String>,
    /// Product name if available
    pub product_name: Option<String>,
}

fn serialize_path<S: serde::Serializer>(path: &CString, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&path.to_string_lossy())
}

/// Transfer direction; each direction has its own lock, event and cancel scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host (recv)
    In,
    /// Host to device (send)
    Out,
}

/// Result of a finished asynchronous transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Bytes moved, framing byte included
    pub transferred: usize,
    /// Staged bytes for reads (framing byte first); empty for writes
    pub data: Vec<u8>,
}

impl Completion {
    pub fn read(data: Vec<u8>) -> Self {
        Self {
            transferred: data.len(),
            data,
        }
    }

    pub fn write(transferred: usize) -> Self {
        Self {
            transferred,
            data: Vec::new(),
        }
    }
}

/// How a platform accepted a transfer request
#[derive(Debug)]
pub enum Submitted {
    /// The transfer finished synchronously
    Completed(Completion),
    /// The transfer is in flight; its ticket will be completed later
    Pending,
}
