//! In-memory transport for connection tests

use super::{ByteStream, PortEvent, PortInfo, PortProvider, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How a mock port behaves when opened
#[derive(Debug, Clone)]
pub(crate) struct MockPort {
    pub info: PortInfo,
    pub fail_open: bool,
    pub open_delay: Duration,
    /// Reader fails with this message instead of carrying data
    pub read_error: Option<String>,
}

impl MockPort {
    pub fn new(info: PortInfo) -> Self {
        Self {
            info,
            fail_open: false,
            open_delay: Duration::ZERO,
            read_error: None,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn read_error(mut self, message: &str) -> Self {
        self.read_error = Some(message.to_string());
        self
    }
}

/// Counters shared by every transport a provider hands out
#[derive(Debug, Default)]
pub(crate) struct MockStats {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub live: AtomicUsize,
    pub opened_at: Mutex<Vec<Instant>>,
    pub closed_at: Mutex<Vec<Instant>>,
    /// Device-side ends of open ports, by port name
    pub devices: Mutex<HashMap<String, DuplexStream>>,
}

impl MockStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockTransport {
    port: MockPort,
    open: bool,
    reader: Option<ByteStream>,
    stats: Arc<MockStats>,
}

impl MockTransport {
    pub fn new(port: MockPort, stats: Arc<MockStats>) -> Self {
        Self {
            port,
            open: false,
            reader: None,
            stats,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn info(&self) -> &PortInfo {
        &self.port.info
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self, _baud_rate: u32) -> Result<(), TransportError> {
        if !self.port.open_delay.is_zero() {
            tokio::time::sleep(self.port.open_delay).await;
        }
        if self.port.fail_open {
            return Err(TransportError::OpenFailed {
                port: self.port.info.port_name.clone(),
                reason: "device busy".to_string(),
            });
        }

        self.reader = Some(match &self.port.read_error {
            Some(message) => Box::new(
                tokio_test::io::Builder::new()
                    .wait(Duration::from_millis(10))
                    .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, message.clone()))
                    .build(),
            ),
            None => {
                let (host, device) = tokio::io::duplex(1024);
                self.stats
                    .devices
                    .lock()
                    .insert(self.port.info.port_name.clone(), device);
                Box::new(host)
            }
        });
        self.open = true;
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        self.stats.opened_at.lock().push(Instant::now());
        Ok(())
    }

    fn take_reader(&mut self) -> Result<ByteStream, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.reader.take().ok_or(TransportError::ReaderLocked)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.open = false;
        self.reader = None;
        self.stats.devices.lock().remove(&self.port.info.port_name);
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
        self.stats.closed_at.lock().push(Instant::now());
        Ok(())
    }
}

/// Provider over a fixed set of mock ports
///
/// `request_port` hands out the first port; `authorized_ports` all of them.
pub(crate) struct MockPortProvider {
    ports: Mutex<Vec<MockPort>>,
    pub stats: Arc<MockStats>,
    events: broadcast::Sender<PortEvent>,
}

impl MockPortProvider {
    pub fn new(ports: Vec<MockPort>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            ports: Mutex::new(ports),
            stats: Arc::new(MockStats::default()),
            events,
        }
    }

    pub fn set_ports(&self, ports: Vec<MockPort>) {
        *self.ports.lock() = ports;
    }

    pub fn emit(&self, event: PortEvent) {
        let _ = self.events.send(event);
    }

    /// Device-side end of an open port
    pub fn device(&self, port_name: &str) -> Option<DuplexStream> {
        self.stats.devices.lock().remove(port_name)
    }
}

#[async_trait]
impl PortProvider for MockPortProvider {
    async fn request_port(&self) -> Result<Box<dyn Transport>, TransportError> {
        let port = self
            .ports
            .lock()
            .first()
            .cloned()
            .ok_or_else(|| TransportError::PortNotFound("no port selected".to_string()))?;
        Ok(Box::new(MockTransport::new(port, self.stats.clone())))
    }

    async fn authorized_ports(&self) -> Result<Vec<Box<dyn Transport>>, TransportError> {
        Ok(self
            .ports
            .lock()
            .iter()
            .cloned()
            .map(|port| Box::new(MockTransport::new(port, self.stats.clone())) as Box<dyn Transport>)
            .collect())
    }

    fn hotplug(&self) -> Option<broadcast::Receiver<PortEvent>> {
        Some(self.events.subscribe())
    }
}
