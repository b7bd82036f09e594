//! Auto-connect support
//!
//! Configuration for the reconnect poll loop, the single-shot timer that
//! paces it, and the filter deciding which enumerated ports are worth
//! opening.

use crate::config::{ScannerConfig, ScannerSettings};
use crate::core::registry::DeviceRegistry;
use crate::core::transport::Transport;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Auto-connect configuration
///
/// Mutable at runtime; a change applies to the next connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoConnectConfig {
    /// Baud rate used when opening a port
    pub baud_rate: u32,
    /// Silence that ends a frame
    pub inter_byte_timeout: Duration,
    /// Delay between detection cycles
    pub reconnect_delay: Duration,
    /// Poll loop enabled
    pub auto_connect_enabled: bool,
}

impl Default for AutoConnectConfig {
    fn default() -> Self {
        Self::from_parts(&ScannerConfig::default(), &ScannerSettings::default())
    }
}

impl AutoConnectConfig {
    /// Combine the runtime configuration file with persisted settings
    pub fn from_parts(scanner: &ScannerConfig, settings: &ScannerSettings) -> Self {
        Self {
            baud_rate: scanner.baud_rate,
            inter_byte_timeout: Duration::from_millis(scanner.inter_byte_timeout_ms),
            reconnect_delay: Duration::from_millis(scanner.reconnect_delay_ms),
            auto_connect_enabled: settings.auto_connect_enabled,
        }
    }
}

struct Pending {
    id: u64,
    handle: JoinHandle<()>,
}

/// Single pending delayed task with cancel
///
/// Scheduling replaces (and aborts) whatever was pending. A task that has
/// fired removes itself from the slot before running, so `cancel` never
/// aborts a cycle halfway through.
#[derive(Default)]
pub struct ReconnectTimer {
    slot: Arc<Mutex<Option<Pending>>>,
    next_id: AtomicU64,
}

impl ReconnectTimer {
    /// Create an idle timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any pending task
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot.clone();

        // Held across spawn so the task cannot check the slot before it is filled
        let mut pending = self.slot.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = slot.lock();
                if pending.as_ref().map(|p| p.id) != Some(id) {
                    return;
                }
                pending.take();
            }
            task.await;
        });

        if let Some(previous) = pending.replace(Pending { id, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop the pending task, if any
    pub fn cancel(&self) -> bool {
        match self.slot.lock().take() {
            Some(previous) => {
                previous.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a task is waiting to fire
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Pick the first port worth auto-connecting to
///
/// A candidate must report USB ids known to the registry and must not
/// already be open.
pub fn select_candidate(candidates: Vec<Box<dyn Transport>>, registry: &DeviceRegistry) -> Option<Box<dyn Transport>> {
    candidates.into_iter().find(|transport| {
        let known = transport
            .info()
            .usb_ids()
            .is_some_and(|(vid, pid)| registry.lookup_ids(vid, pid).is_some());
        known && !transport.is_open()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::mock::{MockPort, MockPortProvider};
    use crate::core::transport::{PortInfo, PortProvider};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_config_from_parts() {
        let settings = ScannerSettings {
            auto_connect_enabled: true,
            ..ScannerSettings::default()
        };
        let config = AutoConnectConfig::from_parts(&ScannerConfig::default(), &settings);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.inter_byte_timeout, Duration::from_millis(100));
        assert_eq!(config.reconnect_delay, Duration::from_millis(3000));
        assert!(config.auto_connect_enabled);
        assert!(!AutoConnectConfig::default().auto_connect_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let timer = ReconnectTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        timer.schedule(Duration::from_secs(3), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending() {
        let timer = ReconnectTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = fired.clone();
            timer.schedule(Duration::from_secs(1), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let timer = ReconnectTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        timer.schedule(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_select_candidate_filters() {
        let mut registry = DeviceRegistry::new();
        registry.add_user_device("ABCD", "0001").unwrap();

        let provider = MockPortProvider::new(vec![
            MockPort::new(PortInfo::new("/dev/ttyS0")),
            MockPort::new(PortInfo::usb("/dev/ttyUSB0", 0xdead, 0xbeef)),
            MockPort::new(PortInfo::usb("/dev/ttyACM0", 0x1a86, 0x5723)),
            MockPort::new(PortInfo::usb("/dev/ttyACM1", 0xabcd, 0x0001)),
        ]);

        let ports = provider.authorized_ports().await.unwrap();
        let chosen = select_candidate(ports, &registry).unwrap();
        assert_eq!(chosen.info().port_name, "/dev/ttyACM0");

        provider.set_ports(vec![
            MockPort::new(PortInfo::usb("/dev/ttyUSB0", 0xdead, 0xbeef)),
            MockPort::new(PortInfo::usb("/dev/ttyACM1", 0xabcd, 0x0001)),
        ]);
        let ports = provider.authorized_ports().await.unwrap();
        let chosen = select_candidate(ports, &registry).unwrap();
        assert_eq!(chosen.info().port_name, "/dev/ttyACM1");

        let ports = provider.authorized_ports().await.unwrap();
        assert!(select_candidate(ports, &DeviceRegistry::new()).is_none());
    }

    #[tokio::test]
    async fn test_select_candidate_skips_open_ports() {
        let provider = MockPortProvider::new(vec![MockPort::new(PortInfo::usb("COM3", 0x1a86, 0x5723))]);
        let mut ports = provider.authorized_ports().await.unwrap();
        ports[0].open(9600).await.unwrap();

        assert!(select_candidate(ports, &DeviceRegistry::new()).is_none());
    }
}
