//! Raw HID framing constants and helpers
//!
//! Every transfer carries one leading report-id byte. Raw HID devices use
//! unnumbered reports, so sends always carry report id 0 and receives drop
//! whatever leading byte the platform delivered.

/// Largest payload accepted by `recv`/`send`
pub const MAX_PACKET: usize = 512;

/// Report id used for unnumbered reports
pub const REPORT_ID_NONE: u8 = 0;

/// Bytes of framing in front of every payload
pub const FRAMING_LEN: usize = 1;

/// Default number of distinct filter pairs the registry can hold
pub const DEFAULT_REGISTRY_CAPACITY: usize = 10;

/// hidapi backend timing
pub mod timing {
    /// Slice length for each `read_timeout` poll while a read is pending (ms)
    pub const POLL_INTERVAL_MS: u64 = 10;
}

/// Well-known ids used by the PJRC raw HID example firmware
pub mod teensy {
    pub const VENDOR_ID: u16 = 0x16C0;
    pub const PRODUCT_ID: u16 = 0x0486;
    /// Vendor-defined usage page of the raw HID collection
    pub const USAGE_PAGE: u16 = 0xFFAB;
    pub const USAGE: u16 = 0x0200;
}

/// Build the staging buffer for an outgoing packet: `[0x00] [payload...]`
pub fn frame_report(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + FRAMING_LEN);
    buf.push(REPORT_ID_NONE);
    buf.extend_from_slice(payload);
    buf
}

/// Strip the framing byte from a completed read and clamp to `max_len`
///
/// `transferred` is the byte count the platform reported; the returned slice
/// never extends past the bytes actually present in `staged`.
pub fn unframe_report(staged: &[u8], transferred: usize, max_len: usize) -> &[u8] {
    let end = transferred.min(staged.len());
    if end <= FRAMING_LEN {
        return &[];
    }
    let payload = &staged[FRAMING_LEN..end];
    &payload[..payload.len().min(max_len)]
}

/// Check a payload length against the staging capacity
pub fn check_packet_len(len: usize, max_packet: usize) -> Result<(), crate::TransportError> {
    let limit = max_packet.min(MAX_PACKET);
    let staged = len.saturating_add(FRAMING_LEN);
    if staged > limit + FRAMING_LEN {
        return Err(crate::TransportError::PacketTooLarge { len, max: limit });
    }
    Ok(())
}

/// Format bytes as a spaced hex dump (used by trace logging and the CLI)
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
