//! Polling hot-plug monitor
//!
//! Serial APIs rarely deliver attach/detach notifications portably, so the
//! monitor diffs the port list on an interval and broadcasts the changes.

use super::{PortEvent, PortInfo};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default interval between port list scans
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Monitor for serial ports appearing and disappearing
pub struct HotplugMonitor {
    events: broadcast::Sender<PortEvent>,
    cancel: CancellationToken,
    known_ports: Arc<RwLock<Vec<PortInfo>>>,
}

impl HotplugMonitor {
    /// Start polling `list` every `interval`
    ///
    /// The first listing is taken immediately and seeds the known set, so
    /// ports already present at start-up are not reported as added.
    pub fn start<F>(interval: Duration, list: F) -> Self
    where
        F: Fn() -> Vec<PortInfo> + Send + 'static,
    {
        let (events, _) = broadcast::channel(64);
        let cancel = CancellationToken::new();
        let known_ports = Arc::new(RwLock::new(list()));

        let tx = events.clone();
        let token = cancel.clone();
        let known = known_ports.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let current = list();
                        let previous = std::mem::replace(&mut *known.write(), current.clone());

                        for port in current.iter().filter(|p| !contains(&previous, p)) {
                            info!(port = %port.port_name, "Serial port detected");
                            let _ = tx.send(PortEvent::Added(port.clone()));
                        }
                        for port in previous.iter().filter(|p| !contains(&current, p)) {
                            info!(port = %port.port_name, "Serial port removed");
                            let _ = tx.send(PortEvent::Removed(port.clone()));
                        }
                    }
                }
            }
        });

        Self {
            events,
            cancel,
            known_ports,
        }
    }

    /// Receive future port events
    pub fn subscribe(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }

    /// Ports seen by the last scan
    pub fn known_ports(&self) -> Vec<PortInfo> {
        self.known_ports.read().clone()
    }

    /// Stop polling
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn contains(ports: &[PortInfo], port: &PortInfo) -> bool {
    ports.iter().any(|p| p.port_name == port.port_name)
}
