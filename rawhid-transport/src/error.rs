//! Transport error types

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    // Configuration errors (rejected before any I/O)
    #[error("Packet too large: {len} bytes exceeds the {max} byte limit")]
    PacketTooLarge { len: usize, max: usize },

    #[error("No open instance for filter {vendor_id:#06X}:{product_id:#06X}")]
    InstanceNotFound { vendor_id: i32, product_id: i32 },

    #[error("No device at index {0}")]
    DeviceNotFound(usize),

    #[error("Device at index {0} is not open")]
    DeviceNotOpen(usize),

    #[error("Instance registry is full ({0} filter pairs)")]
    RegistryFull(usize),

    // Transfer errors
    #[error("Device disconnected")]
    Disconnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("Transfer completed with zero bytes")]
    ZeroLengthTransfer,

    // HID-specific errors
    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// True for errors raised by argument or state validation, before any I/O was issued
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::PacketTooLarge { .. }
                | Self::InstanceNotFound { .. }
                | Self::DeviceNotFound(_)
                | Self::DeviceNotOpen(_)
                | Self::RegistryFull(_)
        )
    }
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") {
            TransportError::HidPermissionDenied(msg)
        } else {
            TransportError::HidError(msg)
        }
    }
}
