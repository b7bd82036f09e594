//! Serial port transport implementation

use super::{ByteStream, HotplugMonitor, PortEvent, PortInfo, PortProvider, Transport, TransportError};
use async_trait::async_trait;
use serialport::{SerialPortInfo, SerialPortType};
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Serial port transport
///
/// The stream is split on open: the read half goes to the connection's
/// read loop, the write half stays here so the port lives until `close`.
pub struct SerialTransport {
    info: PortInfo,
    reader: Option<ReadHalf<SerialStream>>,
    writer: Option<WriteHalf<SerialStream>>,
}

impl SerialTransport {
    /// Handle for a port; nothing is opened yet
    pub fn new(info: PortInfo) -> Self {
        Self {
            info,
            reader: None,
            writer: None,
        }
    }

    fn map_open_error(&self, e: serialport::Error) -> TransportError {
        let port = self.info.port_name.clone();
        match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(port),
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(port)
            }
            _ => TransportError::OpenFailed {
                port,
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn info(&self) -> &PortInfo {
        &self.info
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    async fn open(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        let stream = tokio_serial::new(&self.info.port_name, baud_rate)
            .open_native_async()
            .map_err(|e| self.map_open_error(e))?;

        let (reader, writer) = tokio::io::split(stream);
        self.reader = Some(reader);
        self.writer = Some(writer);

        tracing::debug!(port = %self.info.port_name, baud_rate, "Serial port opened");
        Ok(())
    }

    fn take_reader(&mut self) -> Result<ByteStream, TransportError> {
        if self.writer.is_none() {
            return Err(TransportError::NotOpen);
        }
        self.reader
            .take()
            .map(|reader| Box::new(reader) as ByteStream)
            .ok_or(TransportError::ReaderLocked)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.reader = None;
        match self.writer.take() {
            Some(_) => {
                tracing::debug!(port = %self.info.port_name, "Serial port closed");
                Ok(())
            }
            None => Err(TransportError::NotOpen),
        }
    }
}

fn port_info(port: SerialPortInfo) -> PortInfo {
    match port.port_type {
        SerialPortType::UsbPort(usb) => PortInfo {
            port_name: port.port_name,
            vendor_id: Some(usb.vid),
            product_id: Some(usb.pid),
            manufacturer: usb.manufacturer,
            product: usb.product,
        },
        _ => PortInfo::new(port.port_name),
    }
}

/// List serial ports that report a USB identity
pub fn list_usb_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::Io(e.into()))?;
    Ok(ports
        .into_iter()
        .map(port_info)
        .filter(|info| info.usb_ids().is_some())
        .collect())
}

/// Serial port source backed by the platform port list
///
/// Every enumerated USB serial port counts as authorized. A manual request
/// opens the configured port name or, failing that, the first USB port.
#[derive(Default)]
pub struct SerialPortProvider {
    port_name: Option<String>,
    monitor: Option<HotplugMonitor>,
}

impl SerialPortProvider {
    /// Provider without a fixed port
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `port_name` for manual connections
    #[must_use]
    pub fn with_port(mut self, port_name: impl Into<String>) -> Self {
        self.port_name = Some(port_name.into());
        self
    }

    /// Poll the port list for hot-plug events
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_hotplug(mut self, interval: Duration) -> Self {
        self.monitor = Some(HotplugMonitor::start(interval, || {
            list_usb_ports().unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Port enumeration failed");
                Vec::new()
            })
        }));
        self
    }
}

#[async_trait]
impl PortProvider for SerialPortProvider {
    async fn request_port(&self) -> Result<Box<dyn Transport>, TransportError> {
        let ports = list_usb_ports()?;
        let info = match &self.port_name {
            Some(name) => ports
                .into_iter()
                .find(|p| &p.port_name == name)
                .unwrap_or_else(|| PortInfo::new(name.clone())),
            None => ports
                .into_iter()
                .next()
                .ok_or_else(|| TransportError::PortNotFound("no USB serial port available".to_string()))?,
        };
        Ok(Box::new(SerialTransport::new(info)))
    }

    async fn authorized_ports(&self) -> Result<Vec<Box<dyn Transport>>, TransportError> {
        Ok(list_usb_ports()?
            .into_iter()
            .map(|info| Box::new(SerialTransport::new(info)) as Box<dyn Transport>)
            .collect())
    }

    fn hotplug(&self) -> Option<broadcast::Receiver<PortEvent>> {
        self.monitor.as_ref().map(HotplugMonitor::subscribe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_port_info_from_usb() {
        let info = port_info(SerialPortInfo {
            port_name: "/dev/ttyACM0".to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x0c2e,
                pid: 0x0b61,
                serial_number: None,
                manufacturer: Some("Honeywell".to_string()),
                product: None,
            }),
        });
        assert_eq!(info.usb_ids(), Some((0x0c2e, 0x0b61)));
        assert_eq!(info.manufacturer.as_deref(), Some("Honeywell"));
    }

    #[test]
    fn test_port_info_without_usb() {
        let info = port_info(SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::Unknown,
        });
        assert_eq!(info, PortInfo::new("/dev/ttyS0"));
    }

    #[tokio::test]
    async fn test_unopened_transport() {
        let mut transport = SerialTransport::new(PortInfo::new("/dev/null-scanner"));
        assert!(!transport.is_open());
        assert!(matches!(transport.take_reader(), Err(TransportError::NotOpen)));
        assert!(matches!(transport.close().await, Err(TransportError::NotOpen)));
    }
}
