//! Scanner connection management
//!
//! [`ConnectionManager`] owns the single port handle, runs the read loop that
//! turns bytes into parsed scans, drives the auto-connect poll loop and
//! publishes [`ScannerEvent`]s to subscribers.
//!
//! All port operations (connect, disconnect, detection cycles, hot-plug
//! handling) serialize on one async lock, so a `disconnect` issued while a
//! port is still opening waits for the open to resolve and then tears it
//! down.

mod events;
mod reader;
mod state;

pub use events::{ConnectionKind, ScanData, ScannerEvent, StatusUpdate};
pub use reader::{read_frames, ReadExit};
pub use state::{ConnectionState, ConnectionStateMachine, InvalidTransition, StateTransition};

use crate::config::{MemorySettingsStore, ScannerConfig, ScannerSettings, SettingsStore};
use crate::core::error::ScannerError;
use crate::core::framing::Frame;
use crate::core::history::ScanHistory;
use crate::core::parser::{FrameParser, NoopParser};
use crate::core::registry::{format_id, DeviceDescriptor, DeviceRegistry, DeviceTable, RegistryError};
use crate::core::transport::{ByteStream, PortEvent, PortInfo, PortProvider, Transport};
use crate::utils::autoconnect::{select_candidate, AutoConnectConfig, ReconnectTimer};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait between releasing the reader and closing the port
///
/// Some serial stacks fail to close while a read is still being torn down;
/// the value is empirical.
pub const DEFAULT_CLOSE_SETTLE_DELAY: Duration = Duration::from_millis(1000);

const EVENT_CAPACITY: usize = 256;

/// How a connection attempt was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Manual,
    Auto,
}

/// Port handles guarded by the operation lock
#[derive(Default)]
struct Link {
    /// Open port with a running read loop
    transport: Option<Box<dyn Transport>>,
    /// Port whose read loop failed; closed before the next attempt
    stale: Option<Box<dyn Transport>>,
    /// Bumped for every established connection
    epoch: u64,
}

struct ActiveReader {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    epoch: u64,
}

struct Shared {
    provider: Arc<dyn PortProvider>,
    parser: Arc<dyn FrameParser>,
    store: Arc<dyn SettingsStore>,
    config: RwLock<AutoConnectConfig>,
    registry: RwLock<DeviceRegistry>,
    state: RwLock<ConnectionStateMachine>,
    link: tokio::sync::Mutex<Link>,
    reader: Mutex<Option<ActiveReader>>,
    timer: ReconnectTimer,
    history: Mutex<ScanHistory>,
    events: broadcast::Sender<ScannerEvent>,
    close_settle_delay: Duration,
}

impl Shared {
    fn transition(&self, to: ConnectionState, reason: &str) {
        if let Err(e) = self.state.write().transition(to, Some(reason)) {
            warn!(error = %e, reason, "Rejected connection state change");
        }
    }

    fn emit(&self, event: ScannerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn status(&self, update: StatusUpdate) {
        info!(status = %update.message, kind = ?update.kind, "Scanner status");
        self.emit(ScannerEvent::Status(update));
    }

    fn persist(&self) {
        let settings = ScannerSettings {
            auto_connect_enabled: self.config.read().auto_connect_enabled,
            user_devices: self.registry.read().user_devices().clone(),
        };
        if let Err(e) = self.store.save(&settings) {
            warn!(error = %e, "Failed to persist scanner settings");
        }
    }

    /// "{device or vendor or 'device'} (VID:xxxx, PID:xxxx)"
    fn describe(&self, info: &PortInfo) -> String {
        let vid = info.vendor_id.map(format_id).unwrap_or_default();
        let pid = info.product_id.map(format_id).unwrap_or_default();
        let registry = self.registry.read();
        let name = registry
            .lookup(&vid, &pid)
            .map(|d| d.device_name)
            .or_else(|| registry.vendor_name(&vid))
            .unwrap_or_else(|| "device".to_string());
        format!("{name} (VID:{vid}, PID:{pid})")
    }

    fn publish_frame(&self, frame: Frame) {
        let parsed = self.parser.parse_frame(&frame);
        debug!(kind = ?parsed.result.kind(), text = %parsed.text, "Scan parsed");
        let scan = ScanData::from(parsed);
        self.history.lock().push(scan.clone());
        self.emit(ScannerEvent::Data(scan));
    }
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    provider: Arc<dyn PortProvider>,
    parser: Arc<dyn FrameParser>,
    store: Arc<dyn SettingsStore>,
    scanner: ScannerConfig,
    close_settle_delay: Option<Duration>,
}

impl ConnectionManagerBuilder {
    /// Frame parser (defaults to [`NoopParser`])
    #[must_use]
    pub fn parser(mut self, parser: Arc<dyn FrameParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Settings persistence (defaults to an in-memory store)
    #[must_use]
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = store;
        self
    }

    /// Baud rate, framing, reconnect timing and settle delay
    #[must_use]
    pub fn scanner_config(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }

    /// Override the post-cancel wait before closing a port
    ///
    /// Takes precedence over `close_settle_delay_ms` from
    /// [`ScannerConfig`], whichever is set first.
    #[must_use]
    pub fn close_settle_delay(mut self, delay: Duration) -> Self {
        self.close_settle_delay = Some(delay);
        self
    }

    /// Load persisted settings and create the manager
    ///
    /// When the provider reports hot-plug events and a tokio runtime is
    /// available, a watcher task is started.
    pub fn build(self) -> ConnectionManager {
        let settings = self.store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load scanner settings, using defaults");
            ScannerSettings::default()
        });
        let config = AutoConnectConfig::from_parts(&self.scanner, &settings);
        let close_settle_delay = self
            .close_settle_delay
            .unwrap_or_else(|| Duration::from_millis(self.scanner.close_settle_delay_ms));
        let registry = DeviceRegistry::with_user_devices(settings.user_devices);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let manager = ConnectionManager {
            shared: Arc::new(Shared {
                provider: self.provider,
                parser: self.parser,
                store: self.store,
                config: RwLock::new(config),
                registry: RwLock::new(registry),
                state: RwLock::new(ConnectionStateMachine::new()),
                link: tokio::sync::Mutex::new(Link::default()),
                reader: Mutex::new(None),
                timer: ReconnectTimer::new(),
                history: Mutex::new(ScanHistory::default()),
                events,
                close_settle_delay,
            }),
        };
        manager.watch_hotplug();
        manager
    }
}

/// Scanner connection manager
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Start building a manager around a port provider
    pub fn builder(provider: Arc<dyn PortProvider>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            provider,
            parser: Arc::new(NoopParser),
            store: Arc::new(MemorySettingsStore::default()),
            scanner: ScannerConfig::default(),
            close_settle_delay: None,
        }
    }

    fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Receive future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScannerEvent> {
        self.shared.events.subscribe()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.read().state()
    }

    /// Recent state transitions
    pub fn state_history(&self) -> Vec<StateTransition> {
        self.shared.state.read().history()
    }

    /// Check if a port is open and being read
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Identity of the open port
    pub async fn connected_port(&self) -> Option<PortInfo> {
        let link = self.shared.link.lock().await;
        link.transport.as_ref().map(|t| t.info().clone())
    }

    // ---- configuration ----

    /// Current configuration
    pub fn config(&self) -> AutoConnectConfig {
        self.shared.config.read().clone()
    }

    /// Baud rate for the next connection
    pub fn set_baud_rate(&self, baud_rate: u32) {
        self.shared.config.write().baud_rate = baud_rate;
    }

    /// Frame silence interval for the next connection
    pub fn set_inter_byte_timeout(&self, timeout: Duration) {
        self.shared.config.write().inter_byte_timeout = timeout;
    }

    /// Delay between detection cycles, from the next scheduling on
    pub fn set_reconnect_delay(&self, delay: Duration) {
        self.shared.config.write().reconnect_delay = delay;
    }

    // ---- devices ----

    /// Snapshot of the device registry
    pub fn registry(&self) -> DeviceRegistry {
        self.shared.registry.read().clone()
    }

    /// Resolve a device by its ids
    pub fn lookup(&self, vid: &str, pid: &str) -> Option<DeviceDescriptor> {
        self.shared.registry.read().lookup(vid, pid)
    }

    /// The user device table
    pub fn user_devices(&self) -> DeviceTable {
        self.shared.registry.read().user_devices().clone()
    }

    /// Merged built-in and user devices
    pub fn all_devices(&self) -> DeviceTable {
        self.shared.registry.read().all_devices()
    }

    /// Add a device to the auto-connect list
    ///
    /// Returns `false` for malformed ids (silently) and for built-in pairs
    /// (with a status message).
    pub fn add_device(&self, vid: &str, pid: &str) -> bool {
        let outcome = self.shared.registry.write().add_user_device(vid, pid);
        match outcome {
            Ok(device) => {
                self.shared.persist();
                self.shared.status(StatusUpdate::info(format!(
                    "Device (VID:0x{}, PID:0x{}) added for auto-connection",
                    device.vendor_id, device.product_id
                )));
                self.shared.emit(ScannerEvent::DevicesUpdated(self.user_devices()));
                true
            }
            Err(e) => {
                self.report_registry_error(e);
                false
            }
        }
    }

    /// Remove a device from the auto-connect list
    pub fn remove_device(&self, vid: &str, pid: &str) -> bool {
        let outcome = self.shared.registry.write().remove_user_device(vid, pid);
        match outcome {
            Ok(()) => {
                self.shared.persist();
                self.shared.status(StatusUpdate::info(format!(
                    "Device (VID:0x{}, PID:0x{}) removed from user devices list",
                    vid.to_ascii_uppercase(),
                    pid.to_ascii_uppercase()
                )));
                self.shared.emit(ScannerEvent::DevicesUpdated(self.user_devices()));
                true
            }
            Err(e) => {
                self.report_registry_error(e);
                false
            }
        }
    }

    fn report_registry_error(&self, error: RegistryError) {
        match error {
            RegistryError::Validation { .. } => debug!(error = %error, "Device id rejected"),
            other => self.shared.status(StatusUpdate::info(other.to_string())),
        }
    }

    // ---- scan history ----

    /// Recent scans, newest first
    pub fn history(&self) -> Vec<ScanData> {
        self.shared.history.lock().newest_first()
    }

    /// Forget recorded scans
    pub fn clear_history(&self) {
        self.shared.history.lock().clear();
    }

    // ---- manual connection ----

    /// Connect to the port chosen by the provider
    ///
    /// An existing connection is torn down first. Failures are also
    /// reported as a status event.
    pub async fn connect(&self) -> Result<(), ScannerError> {
        let mut link = self.shared.link.lock().await;

        if link.transport.is_some() {
            self.teardown(&mut link).await;
            self.shared.transition(ConnectionState::Disconnected, "reconnect requested");
            self.shared.status(StatusUpdate::disconnected("Scanner disconnected"));
        }
        Self::discard_stale(&mut link).await;

        let transport = match self.shared.provider.request_port().await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(error = %e, "No port selected");
                self.shared.status(StatusUpdate::disconnected("Failed to connect to scanner"));
                return Err(e.into());
            }
        };

        self.establish(&mut link, transport, Origin::Manual).await
    }

    /// Release the port
    ///
    /// Cancels the read loop, waits the settle delay, then closes. Close
    /// errors are logged and swallowed.
    pub async fn disconnect(&self) {
        let mut link = self.shared.link.lock().await;
        self.teardown(&mut link).await;
        Self::discard_stale(&mut link).await;

        // Published under the lock so a queued connect cannot be overwritten
        self.shared.transition(ConnectionState::Disconnected, "user disconnect");
        self.shared.status(StatusUpdate::disconnected("Scanner disconnected"));
    }

    // ---- auto-connect ----

    /// Turn the poll loop on, persist the flag and run a cycle now
    pub async fn enable_auto_connect(&self) {
        self.shared.config.write().auto_connect_enabled = true;
        self.shared.persist();
        self.detection_cycle().await;
    }

    /// Turn the poll loop off and persist the flag
    pub fn disable_auto_connect(&self) {
        self.shared.config.write().auto_connect_enabled = false;
        self.shared.timer.cancel();
        self.shared.persist();
    }

    /// Whether the poll loop is enabled
    pub fn auto_connect_enabled(&self) -> bool {
        self.shared.config.read().auto_connect_enabled
    }

    /// Resume the poll loop when it was persisted as enabled
    pub async fn start(&self) {
        if self.auto_connect_enabled() {
            self.detection_cycle().await;
        }
    }

    /// Host came to the foreground: detect right away instead of waiting
    pub async fn became_active(&self) {
        if !self.auto_connect_enabled() {
            return;
        }
        self.shared.timer.cancel();
        self.detection_cycle().await;
    }

    /// Host went to the background: drop the pending cycle
    pub fn became_inactive(&self) {
        if self.shared.timer.cancel() {
            debug!("Pending detection cycle cancelled");
        }
    }

    /// Whether a detection cycle is scheduled
    pub fn reconnect_pending(&self) -> bool {
        self.shared.timer.is_pending()
    }

    fn schedule_cycle(&self, delay: Duration) {
        if !self.auto_connect_enabled() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        self.shared.timer.schedule(delay, async move {
            if let Some(shared) = weak.upgrade() {
                ConnectionManager::from_shared(shared).detection_cycle().await;
            }
        });
        debug!(delay_ms = delay.as_millis() as u64, "Detection cycle scheduled");
    }

    /// One pass of the poll loop
    async fn detection_cycle(&self) {
        let mut link = self.shared.link.lock().await;
        if link.transport.is_some() {
            debug!("Port already open, skipping detection");
            return;
        }
        Self::discard_stale(&mut link).await;
        self.shared.transition(ConnectionState::Reconnecting, "detection cycle");

        let candidates = match self.shared.provider.authorized_ports().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Port enumeration failed");
                Vec::new()
            }
        };
        let candidate = {
            let registry = self.shared.registry.read();
            select_candidate(candidates, &registry)
        };

        let connected = match candidate {
            Some(transport) => self.establish(&mut link, transport, Origin::Auto).await.is_ok(),
            None => {
                debug!("No known scanner attached");
                self.shared.transition(ConnectionState::Disconnected, "no candidates");
                false
            }
        };
        drop(link);

        if !connected {
            let delay = self.shared.config.read().reconnect_delay;
            self.schedule_cycle(delay);
        }
    }

    // ---- port lifecycle ----

    /// Open `transport`, publish it and start its read loop
    async fn establish(
        &self,
        link: &mut Link,
        mut transport: Box<dyn Transport>,
        origin: Origin,
    ) -> Result<(), ScannerError> {
        let config = self.shared.config.read().clone();
        let port = transport.info().port_name.clone();
        self.shared.transition(ConnectionState::Connecting, "opening port");

        let opened = match transport.open(config.baud_rate).await {
            Ok(()) => transport.take_reader(),
            Err(e) => Err(e),
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%port, error = %e, "Failed to open port");
                if transport.is_open() {
                    if let Err(close_err) = transport.close().await {
                        warn!(%port, error = %close_err, "Failed to close partially opened port");
                    }
                }
                self.shared.transition(ConnectionState::Disconnected, "open failed");
                self.shared.status(StatusUpdate::disconnected(match origin {
                    Origin::Manual => "Failed to connect to scanner",
                    Origin::Auto => "Auto-connection error",
                }));
                return Err(e.into());
            }
        };

        let label = self.shared.describe(transport.info());
        link.epoch += 1;
        let epoch = link.epoch;
        link.transport = Some(transport);

        self.shared.transition(ConnectionState::Connected, "port opened");
        self.shared.status(StatusUpdate::connected(match origin {
            Origin::Manual => format!("Connected to {label}"),
            Origin::Auto => format!("Auto-connected to {label}"),
        }));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::run_reader(
            Arc::downgrade(&self.shared),
            stream,
            config.inter_byte_timeout,
            cancel.clone(),
            epoch,
        ));
        *self.shared.reader.lock() = Some(ActiveReader { cancel, handle, epoch });

        info!(%port, baud_rate = config.baud_rate, "Scanner connected");
        Ok(())
    }

    async fn run_reader(
        weak: Weak<Shared>,
        stream: ByteStream,
        timeout: Duration,
        cancel: CancellationToken,
        epoch: u64,
    ) {
        let frames_weak = weak.clone();
        let exit = read_frames(stream, timeout, &cancel, |frame| {
            if let Some(shared) = frames_weak.upgrade() {
                shared.publish_frame(frame);
            }
        })
        .await;

        let status = match exit {
            ReadExit::Cancelled => {
                debug!("Read loop stopped by user");
                return;
            }
            ReadExit::EndOfStream => StatusUpdate::disconnected("Scanner disconnected"),
            ReadExit::Failed(e) => {
                warn!(error = %e, "Scanner read failed");
                StatusUpdate::info(e.to_string())
            }
        };

        let Some(shared) = weak.upgrade() else {
            return;
        };
        {
            let mut reader = shared.reader.lock();
            if reader.as_ref().is_some_and(|r| r.epoch == epoch) {
                reader.take();
            }
        }

        // A concurrent teardown holds the lock and cancels us; let it win
        let mut link = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            link = shared.link.lock() => link,
        };
        if link.epoch != epoch || link.transport.is_none() {
            return;
        }
        link.stale = link.transport.take();
        shared.transition(ConnectionState::Disconnected, "read loop ended");
        shared.status(status);
        drop(link);

        let manager = ConnectionManager::from_shared(shared);
        let delay = manager.config().reconnect_delay;
        manager.schedule_cycle(delay);
    }

    /// Stop the read loop and close the open port
    async fn teardown(&self, link: &mut Link) {
        let reader = self.shared.reader.lock().take();
        if let Some(reader) = reader {
            reader.cancel.cancel();
            if let Err(e) = reader.handle.await {
                warn!(error = %e, "Read loop ended abnormally");
            }
        }

        if let Some(mut transport) = link.transport.take() {
            tokio::time::sleep(self.shared.close_settle_delay).await;
            let port = transport.info().port_name.clone();
            match transport.close().await {
                Ok(()) => info!(%port, "Scanner port closed"),
                Err(e) => warn!(%port, error = %e, "Failed to close port"),
            }
        }
    }

    async fn discard_stale(link: &mut Link) {
        if let Some(mut stale) = link.stale.take() {
            if let Err(e) = stale.close().await {
                debug!(port = %stale.info().port_name, error = %e, "Stale port close failed");
            }
        }
    }

    // ---- hot-plug ----

    fn watch_hotplug(&self) {
        let Some(mut events) = self.shared.provider.hotplug() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, hot-plug events ignored");
            return;
        };

        let weak = Arc::downgrade(&self.shared);
        runtime.spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Hot-plug events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                ConnectionManager::from_shared(shared).on_port_event(event).await;
            }
        });
    }

    async fn on_port_event(&self, event: PortEvent) {
        match event {
            PortEvent::Removed(info) => {
                let mut link = self.shared.link.lock().await;
                let active = link
                    .transport
                    .as_ref()
                    .is_some_and(|t| t.info().port_name == info.port_name);
                if !active {
                    if link.stale.as_ref().is_some_and(|t| t.info().port_name == info.port_name) {
                        Self::discard_stale(&mut link).await;
                    }
                    return;
                }

                info!(port = %info.port_name, "Scanner unplugged");
                self.teardown(&mut link).await;
                self.shared.transition(ConnectionState::Disconnected, "device removed");
                self.shared.status(StatusUpdate::disconnected("Scanner disconnected"));
                drop(link);

                let delay = self.config().reconnect_delay;
                self.schedule_cycle(delay);
            }
            PortEvent::Added(info) => {
                if self.auto_connect_enabled() && self.state() == ConnectionState::Disconnected {
                    debug!(port = %info.port_name, "Port added, running detection");
                    self.shared.timer.cancel();
                    self.detection_cycle().await;
                }
            }
        }
    }
}
