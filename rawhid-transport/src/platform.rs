//! Host HID platform abstraction
//!
//! The transport core only needs a small capability surface from the host:
//! list the present HID interfaces, open one of them, ask an open handle for
//! its ids and top-level usage, and run asynchronous transfers that can be
//! cancelled per direction. Backends implement these two traits.

use std::sync::Arc;

use crate::error::TransportError;
use crate::overlapped::Ticket;
use crate::types::{Attributes, Capabilities, Direction, HidInterfaceInfo, Submitted};

/// Device discovery and opening
pub trait HidPlatform: Send + Sync {
    /// List currently present HID interfaces, in enumeration order
    fn interfaces(&self) -> Result<Vec<HidInterfaceInfo>, TransportError>;

    /// Open a listed interface for shared read/write with asynchronous transfers
    ///
    /// Several collections of one device may share a path; the handle answers
    /// `capabilities` for the collection `interface` describes.
    fn open(&self, interface: &HidInterfaceInfo) -> Result<Arc<dyn HidHandle>, TransportError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// An open HID interface
pub trait HidHandle: Send + Sync {
    /// Query vendor and product id
    fn attributes(&self) -> Result<Attributes, TransportError>;

    /// Query the top-level collection's usage page and usage
    fn capabilities(&self) -> Result<Capabilities, TransportError>;

    /// Start reading up to `len` bytes (framing byte included)
    ///
    /// Returns [`Submitted::Completed`] when data was already available;
    /// otherwise the backend completes `ticket` when the read finishes.
    fn begin_read(&self, len: usize, ticket: Ticket) -> Result<Submitted, TransportError>;

    /// Start writing `data` (framing byte included)
    fn begin_write(&self, data: Vec<u8>, ticket: Ticket) -> Result<Submitted, TransportError>;

    /// Cancel the pending transfer in `direction`
    ///
    /// Must not block beyond stopping a pending read. A write already handed
    /// to the OS may still finish afterwards; its ticket is stale by then and
    /// the completion is dropped.
    fn cancel(&self, direction: Direction);

    /// Release the underlying OS handle; later transfers fail with `Disconnected`
    fn close(&self);
}
