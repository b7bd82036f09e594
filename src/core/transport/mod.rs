//! Transport layer
//!
//! The connection manager only sees two seams:
//! - [`Transport`]: one port handle that can be opened, read and closed
//! - [`PortProvider`]: where handles come from (manual selection, previously
//!   authorized ports, hot-plug notifications)
//!
//! The serial implementation lives in [`serial`]; tests drive the manager
//! through an in-memory mock.

mod hotplug;
mod serial;

#[cfg(test)]
pub(crate) mod mock;

pub use hotplug::{HotplugMonitor, DEFAULT_POLL_INTERVAL};
pub use serial::{list_usb_ports, SerialPortProvider, SerialTransport};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;

use crate::core::registry::format_id;

/// Readable half of an open transport
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Port could not be opened
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port name
        port: String,
        /// Underlying cause
        reason: String,
    },

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation requires an open port
    #[error("Port is not open")]
    NotOpen,

    /// Reader already handed out
    #[error("Port reader is already in use")]
    ReaderLocked,

    /// Read failure
    #[error("Read error: {0}")]
    Read(String),

    /// Close failure
    #[error("Close error: {0}")]
    Close(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of a port as reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PortInfo {
    /// Platform port name (e.g. `/dev/ttyACM0`, `COM3`)
    pub port_name: String,
    /// USB vendor id
    pub vendor_id: Option<u16>,
    /// USB product id
    pub product_id: Option<u16>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl PortInfo {
    /// Port without USB identity
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Port with USB vendor/product ids
    pub fn usb(port_name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            port_name: port_name.into(),
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    /// Vendor and product ids, when both are known
    pub fn usb_ids(&self) -> Option<(u16, u16)> {
        self.vendor_id.zip(self.product_id)
    }

    /// Vendor id in canonical 4-digit form
    pub fn vid_hex(&self) -> Option<String> {
        self.vendor_id.map(format_id)
    }

    /// Product id in canonical 4-digit form
    pub fn pid_hex(&self) -> Option<String> {
        self.product_id.map(format_id)
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.usb_ids() {
            Some((vid, pid)) => write!(f, "{} ({}:{})", self.port_name, format_id(vid), format_id(pid)),
            None => write!(f, "{}", self.port_name),
        }
    }
}

/// Out-of-band port notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A port appeared
    Added(PortInfo),
    /// A port disappeared
    Removed(PortInfo),
}

/// One port handle
///
/// Handles are owned by one task at a time, so only `Send` is required.
#[async_trait]
pub trait Transport: Send {
    /// Port identity
    fn info(&self) -> &PortInfo;

    /// Whether the port is currently open
    fn is_open(&self) -> bool;

    /// Open the port
    async fn open(&mut self, baud_rate: u32) -> Result<(), TransportError>;

    /// Take the read side of the open port
    ///
    /// Only one reader exists per open; a second call fails with
    /// [`TransportError::ReaderLocked`].
    fn take_reader(&mut self) -> Result<ByteStream, TransportError>;

    /// Close the port
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Source of port handles
#[async_trait]
pub trait PortProvider: Send + Sync {
    /// Port chosen for a manual connection
    async fn request_port(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Ports the host already allows us to open without asking
    async fn authorized_ports(&self) -> Result<Vec<Box<dyn Transport>>, TransportError>;

    /// Hot-plug notifications, when the platform provides them
    fn hotplug(&self) -> Option<broadcast::Receiver<PortEvent>> {
        None
    }
}
