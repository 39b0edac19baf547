//! Connection supervisor.
//!
//! Owns the BLE session lifecycle: scanning, connecting, subscribing to the
//! four detector characteristics and watching the link. Each connection runs
//! in one dedicated worker task; decoded readings leave the worker only
//! through the [`ReadingSender`].

use chrono::Utc;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::ble::characteristics::NotificationEvent;
use crate::ble::connection::{
    ConnectionEvent, ConnectionInfo, ConnectionState, ConnectionTracker, DeviceInfo,
};
use crate::ble::scanner::{filter_targets, DiscoveredDevice};
use crate::ble::transport::{NotificationStream, SensorLink, Transport};
use crate::config::{LinkConfig, ScanConfig};
use crate::data::SensorArray;
use crate::error::{Error, Result};
use crate::protocol::decode_at;
use crate::queue::ReadingSender;

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Running worker for one connection attempt.
struct WorkerSession {
    generation: u64,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Why a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// `disconnect()` asked the worker to stop.
    Cancelled,
    /// The link dropped underneath us.
    LinkLost,
}

/// Supervises the single BLE session with the sensor.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    scan_config: ScanConfig,
    link_config: LinkConfig,
    tracker: Arc<ConnectionTracker>,
    readings: ReadingSender,
    /// Last raw value per channel, zeroed on disconnect.
    latest: Arc<RwLock<SensorArray<u16>>>,
    /// Devices found by the most recent scans.
    discovered: RwLock<HashMap<String, DiscoveredDevice>>,
    session: Mutex<Option<WorkerSession>>,
    runtime: Handle,
    callback_counter: AtomicU64,
}

impl ConnectionSupervisor {
    /// Create a supervisor that spawns its workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when called outside a tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        scan_config: ScanConfig,
        link_config: LinkConfig,
        readings: ReadingSender,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("No tokio runtime: {}", e)))?;

        Ok(Self {
            transport,
            scan_config,
            link_config,
            tracker: Arc::new(ConnectionTracker::new()),
            readings,
            latest: Arc::new(RwLock::new(SensorArray::default())),
            discovered: RwLock::new(HashMap::new()),
            session: Mutex::new(None),
            runtime,
            callback_counter: AtomicU64::new(0),
        })
    }

    // === State ===

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.tracker.state()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// State and target device of the current or last session.
    pub fn connection_info(&self) -> ConnectionInfo {
        self.tracker.info()
    }

    /// Last raw value received per channel. All zero while disconnected.
    pub fn latest_values(&self) -> SensorArray<u16> {
        *self.latest.read()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tracker.subscribe()
    }

    /// Register a callback for connection state changes.
    pub fn on_connection_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.tracker.subscribe();

        let handle = self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Connection callback lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    // === Scanning ===

    /// Scan for `timeout` and return known sensors keyed by display name.
    ///
    /// Backend failures are logged and produce an empty map.
    pub async fn scan(&self, timeout: Duration) -> HashMap<String, DiscoveredDevice> {
        let began = self.tracker.begin_scan();

        let result = self.transport.discover(timeout).await;

        if began {
            self.tracker.end_scan();
        }

        match result {
            Ok(advertisements) => {
                let found = filter_targets(&advertisements, &self.scan_config.target_names);
                info!("Scan complete: {} device(s) found", found.len());
                self.discovered
                    .write()
                    .extend(found.iter().map(|(k, v)| (k.clone(), v.clone())));
                found
            }
            Err(e) => {
                error!("BLE scan failed: {}", e);
                HashMap::new()
            }
        }
    }

    /// Scan using the configured timeout.
    pub async fn scan_default(&self) -> HashMap<String, DiscoveredDevice> {
        self.scan(self.scan_config.timeout).await
    }

    /// Devices accumulated across scans.
    pub fn available_devices(&self) -> HashMap<String, DiscoveredDevice> {
        self.discovered.read().clone()
    }

    /// Forget previously discovered devices.
    pub fn clear_device_cache(&self) {
        self.discovered.write().clear();
        info!("Device cache cleared");
    }

    // === Connection ===

    /// Start connecting to `address`.
    ///
    /// Returns `false` without changing anything if an attempt or session is
    /// already active. Otherwise spawns the worker and returns `true`
    /// immediately; the outcome is reported through connection events.
    pub fn connect(&self, address: &str, name: &str) -> bool {
        let device = DeviceInfo {
            address: address.to_string(),
            name: name.to_string(),
        };

        let Some(generation) = self.tracker.begin_connect(device.clone()) else {
            warn!(
                "Rejecting connect to {}: state is {}",
                name,
                self.tracker.state()
            );
            return false;
        };

        info!("Connecting to {} ({})", name, address);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            transport: self.transport.clone(),
            tracker: self.tracker.clone(),
            readings: self.readings.clone(),
            latest: self.latest.clone(),
            link_config: self.link_config,
            generation,
            device,
        };
        let handle = self.runtime.spawn(worker.run(shutdown_rx));

        let previous = self.session.lock().replace(WorkerSession {
            generation,
            shutdown_tx,
            handle,
        });
        if let Some(previous) = previous {
            debug!("Detaching finished session {}", previous.generation);
        }

        true
    }

    /// Stop the session and release the link.
    ///
    /// The worker is cancelled and awaited, so the link is unsubscribed and
    /// released before this returns, whether the session was established or
    /// still connecting. The state stays `Disconnecting` until then and new
    /// connects are refused.
    pub async fn disconnect(&self) {
        let previous = self.tracker.begin_disconnect();
        let session = self.session.lock().take();

        let Some(session) = session else {
            if previous == ConnectionState::Disconnecting {
                debug!("Disconnect already in progress");
                return;
            }
            self.tracker.finish_disconnect();
            return;
        };

        if previous == ConnectionState::Connecting {
            debug!("Cancelling connection attempt {}", session.generation);
        }
        let _ = session.shutdown_tx.send(true);
        if let Err(e) = session.handle.await {
            error!("Connection worker ended abnormally: {}", e);
        }

        self.tracker.finish_disconnect();
        *self.latest.write() = SensorArray::default();

        if previous != ConnectionState::Disconnected {
            info!("Disconnected (was {})", previous);
        }
    }

    /// Clean shutdown of the session.
    pub async fn shutdown(&self) {
        info!("Shutting down connection supervisor");
        self.disconnect().await;
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown_tx.send(true);
        }
    }
}

/// Resolves once the session is told to stop or its owner is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// State moved into the worker task.
struct Worker {
    transport: Arc<dyn Transport>,
    tracker: Arc<ConnectionTracker>,
    readings: ReadingSender,
    latest: Arc<RwLock<SensorArray<u16>>>,
    link_config: LinkConfig,
    generation: u64,
    device: DeviceInfo,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let opened = tokio::select! {
            opened = self.transport.open(&self.device.address) => opened,
            _ = cancelled(&mut shutdown) => {
                debug!("Connection attempt {} cancelled before open", self.generation);
                return;
            }
        };
        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                self.fail(&e);
                return;
            }
        };

        let timeout = self.link_config.connect_timeout;
        let established = tokio::select! {
            result = tokio::time::timeout(timeout, Self::establish(link.as_ref())) => Some(result),
            _ = cancelled(&mut shutdown) => None,
        };
        let stream = match established {
            Some(Ok(Ok(stream))) => stream,
            Some(Ok(Err(e))) => {
                Self::release(link.as_ref()).await;
                self.fail(&e);
                return;
            }
            Some(Err(_)) => {
                Self::release(link.as_ref()).await;
                self.fail(&Error::Timeout {
                    seconds: timeout.as_secs_f64(),
                });
                return;
            }
            None => {
                info!(
                    "Connection attempt to {} cancelled, releasing link",
                    self.device.name
                );
                Self::release(link.as_ref()).await;
                return;
            }
        };

        let abandoned = *shutdown.borrow()
            || !self.tracker.advance(
                self.generation,
                &[ConnectionState::Connecting],
                ConnectionState::Connected,
            );
        if abandoned {
            info!(
                "Connection to {} completed after it was abandoned, releasing link",
                self.device.name
            );
            Self::release(link.as_ref()).await;
            return;
        }

        info!("Connected to {}", self.device.name);

        let end = self.monitor(link.as_ref(), stream, &mut shutdown).await;
        Self::release(link.as_ref()).await;

        if end == SessionEnd::LinkLost {
            warn!("Link to {} lost", self.device.name);
            if self.tracker.advance(
                self.generation,
                &[ConnectionState::Connected],
                ConnectionState::Disconnected,
            ) {
                *self.latest.write() = SensorArray::default();
            }
        }
    }

    /// Connect, open the notification stream and subscribe.
    async fn establish(link: &dyn SensorLink) -> Result<NotificationStream> {
        link.connect().await?;
        let stream = link.notifications().await?;
        let subscribed = link.subscribe_sensors().await?;
        info!("Subscribed to {} sensor characteristic(s)", subscribed);
        Ok(stream)
    }

    /// Pump notifications and poll liveness until cancelled or the link drops.
    async fn monitor(
        &self,
        link: &dyn SensorLink,
        mut stream: NotificationStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut liveness = tokio::time::interval(self.link_config.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        liveness.tick().await;

        let mut traffic = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Worker {} cancelled", self.generation);
                        return SessionEnd::Cancelled;
                    }
                }
                notification = stream.next() => match notification {
                    Some(event) => {
                        traffic = true;
                        self.handle_notification(event);
                    }
                    None => {
                        warn!("Notification stream from {} ended", self.device.name);
                        return SessionEnd::LinkLost;
                    }
                },
                _ = liveness.tick() => {
                    if std::mem::take(&mut traffic) {
                        continue;
                    }
                    if !link.is_connected().await {
                        return SessionEnd::LinkLost;
                    }
                    debug!("Liveness check passed for {}", self.device.name);
                }
            }
        }
    }

    fn handle_notification(&self, event: NotificationEvent) {
        // Stamp before anything else so consumer scheduling cannot skew it.
        let received_at = Utc::now();

        let Some(reading) = decode_at(&event.characteristic_uuid, &event.data, received_at) else {
            return;
        };

        self.latest.write()[reading.sensor] = reading.raw_value;
        self.readings.push(reading);
    }

    /// Best-effort unsubscribe and link release.
    async fn release(link: &dyn SensorLink) {
        link.unsubscribe_sensors().await;
        if let Err(e) = link.disconnect().await {
            debug!("Failed to release link: {}", e);
        }
    }

    fn fail(&self, e: &Error) {
        error!("Connection to {} failed: {}", self.device.name, e);
        self.tracker.advance(
            self.generation,
            &[ConnectionState::Connecting],
            ConnectionState::Disconnected,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::scanner::Advertisement;
    use crate::ble::transport::MockTransport;
    use crate::data::SensorId;
    use crate::queue::{reading_queue, ReadingQueue};
    use crate::testing::{settle, FakeLink};
    use std::sync::atomic::AtomicUsize;

    fn supervisor(transport: Arc<dyn Transport>) -> (ConnectionSupervisor, ReadingQueue) {
        let (tx, queue) = reading_queue();
        let supervisor = ConnectionSupervisor::new(
            transport,
            ScanConfig::default(),
            LinkConfig::default(),
            tx,
        )
        .unwrap();
        (supervisor, queue)
    }

    fn drain_events(rx: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn states(rx: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionState> {
        drain_events(rx).iter().map(|e| e.state).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_connected() {
        let (link, _radio) = FakeLink::new();
        let opens = Arc::new(AtomicUsize::new(0));
        let (supervisor, _queue) = supervisor(link.transport(opens.clone()));

        assert!(supervisor.connect("AA:BB", "sensor-1"));
        assert_eq!(supervisor.state(), ConnectionState::Connecting);

        settle(500).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        let info = supervisor.connection_info();
        assert_eq!(info.device.unwrap().name, "sensor-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_while_connecting_is_rejected() {
        let (link, _radio) = FakeLink::new();
        link.set_connect_delay(Duration::from_secs(5));
        let opens = Arc::new(AtomicUsize::new(0));
        let (supervisor, _queue) = supervisor(link.transport(opens.clone()));

        assert!(supervisor.connect("AA:BB", "sensor-1"));
        assert!(!supervisor.connect("AA:BB", "sensor-1"));
        assert_eq!(supervisor.state(), ConnectionState::Connecting);

        settle(6_000).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert!(!supervisor.connect("AA:BB", "sensor-1"));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_reach_queue() {
        let (link, radio) = FakeLink::new();
        let (supervisor, mut queue) = supervisor(link.transport(Arc::new(AtomicUsize::new(0))));

        supervisor.connect("AA:BB", "sensor-1");
        settle(500).await;

        radio.send_raw(SensorId::Uv, &[0x64, 0x00]);
        radio.send_raw(SensorId::Ir940, &[0x01, 0x02, 0x03]);
        radio.send(SensorId::Blue, 3300);
        settle(10).await;

        let readings = queue.drain_all();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].sensor, SensorId::Uv);
        assert_eq!(readings[0].raw_value, 100);
        assert_eq!(readings[1].sensor, SensorId::Blue);
        assert_eq!(readings[1].raw_value, 3300);

        let latest = supervisor.latest_values();
        assert_eq!(latest[SensorId::Uv], 100);
        assert_eq!(latest[SensorId::Ir940], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_link_loss_disconnects_once() {
        let (link, radio) = FakeLink::new();
        let (supervisor, _queue) = supervisor(link.transport(Arc::new(AtomicUsize::new(0))));
        let mut events = supervisor.subscribe();

        supervisor.connect("AA:BB", "sensor-1");
        settle(500).await;
        radio.send(SensorId::Uv, 16);
        settle(10).await;
        assert_eq!(supervisor.latest_values()[SensorId::Uv], 16);

        link.connected.store(false, Ordering::SeqCst);
        settle(4_500).await;

        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert!(link.released.load(Ordering::SeqCst));
        assert_eq!(supervisor.latest_values(), SensorArray::default());

        let disconnects = drain_events(&mut events)
            .into_iter()
            .filter(ConnectionEvent::is_disconnect)
            .count();
        assert_eq!(disconnects, 1);

        // A later disconnect() must not announce it again.
        supervisor.disconnect().await;
        assert!(drain_events(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_is_link_loss() {
        let (link, radio) = FakeLink::new();
        let (supervisor, _queue) = supervisor(link.transport(Arc::new(AtomicUsize::new(0))));

        supervisor.connect("AA:BB", "sensor-1");
        settle(500).await;
        assert!(supervisor.is_connected());

        radio.close();
        settle(10).await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_releases_link() {
        let (link, _radio) = FakeLink::new();
        let (supervisor, _queue) = supervisor(link.transport(Arc::new(AtomicUsize::new(0))));
        let mut events = supervisor.subscribe();

        supervisor.connect("AA:BB", "sensor-1");
        settle(500).await;

        supervisor.disconnect().await;

        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert!(link.unsubscribed.load(Ordering::SeqCst));
        assert!(link.released.load(Ordering::SeqCst));
        assert_eq!(
            states(&mut events),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting_releases_before_returning() {
        let (link, _radio) = FakeLink::new();
        link.set_connect_delay(Duration::from_secs(5));
        let (supervisor, _queue) = supervisor(link.transport(Arc::new(AtomicUsize::new(0))));
        let mut events = supervisor.subscribe();

        supervisor.connect("AA:BB", "sensor-1");
        settle(10).await;
        supervisor.disconnect().await;

        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert!(link.released.load(Ordering::SeqCst));
        assert_eq!(link.releases.load(Ordering::SeqCst), 1);
        assert_eq!(
            states(&mut events),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
            ]
        );

        settle(6_000).await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(link.releases.load(Ordering::SeqCst), 1);
        assert!(states(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_cancelled_attempt_survives() {
        let (link, radio) = FakeLink::new();
        link.set_connect_delay(Duration::from_secs(5));
        let opens = Arc::new(AtomicUsize::new(0));
        let (supervisor, mut queue) = supervisor(link.transport(opens.clone()));
        let mut events = supervisor.subscribe();

        assert!(supervisor.connect("AA:BB", "sensor-1"));
        settle(10).await;
        supervisor.disconnect().await;

        link.set_connect_delay(Duration::from_millis(100));
        assert!(supervisor.connect("AA:BB", "sensor-1"));
        settle(500).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        drain_events(&mut events);

        // Well past the point where the first attempt would have finished.
        settle(10_000).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert!(link.connected.load(Ordering::SeqCst));
        assert!(drain_events(&mut events).is_empty());
        assert_eq!(opens.load(Ordering::SeqCst), 2);

        radio.send(SensorId::Ir850, 42);
        settle(10).await;
        assert_eq!(queue.drain_all()[0].raw_value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_link_loss() {
        let (link, radio) = FakeLink::new();
        let opens = Arc::new(AtomicUsize::new(0));
        let (supervisor, mut queue) = supervisor(link.transport(opens.clone()));

        supervisor.connect("AA:BB", "sensor-1");
        settle(500).await;
        link.connected.store(false, Ordering::SeqCst);
        settle(4_500).await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);

        assert!(supervisor.connect("AA:BB", "sensor-1"));
        settle(500).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);

        settle(5_000).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(opens.load(Ordering::SeqCst), 2);

        radio.send(SensorId::Uv, 7);
        settle(10).await;
        assert_eq!(queue.drain_all().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_refused_while_disconnecting() {
        let (link, _radio) = FakeLink::new();
        link.set_connect_delay(Duration::from_secs(5));
        let (supervisor, _queue) = supervisor(link.transport(Arc::new(AtomicUsize::new(0))));

        supervisor.connect("AA:BB", "sensor-1");
        settle(10).await;

        let (_, accepted) = tokio::join!(supervisor.disconnect(), async {
            supervisor.connect("AA:BB", "sensor-1")
        });
        assert!(!accepted);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_returns_to_disconnected_without_retry() {
        let (mut link, _radio) = FakeLink::new();
        link.fail_connect = true;
        let opens = Arc::new(AtomicUsize::new(0));
        let (supervisor, _queue) = supervisor(link.transport(opens.clone()));

        assert!(supervisor.connect("AA:BB", "sensor-1"));
        settle(5_000).await;

        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (link, _radio) = FakeLink::new();
        link.set_connect_delay(Duration::from_secs(60));
        let (supervisor, _queue) = supervisor(link.transport(Arc::new(AtomicUsize::new(0))));

        supervisor.connect("AA:BB", "sensor-1");
        settle(21_000).await;

        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert!(link.released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_not_found() {
        let mut transport = MockTransport::new();
        transport.expect_open().times(1).returning(|address| {
            Err(Error::DeviceNotFound {
                address: address.to_string(),
            })
        });
        let (supervisor, _queue) = supervisor(Arc::new(transport));

        assert!(supervisor.connect("FF:FF", "sensor-9"));
        settle(10).await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_scan_filters_and_restores_state() {
        let mut transport = MockTransport::new();
        transport.expect_discover().times(1).returning(|_| {
            Ok(vec![
                Advertisement {
                    address: "A".to_string(),
                    local_name: Some("pico-sensors-1".to_string()),
                    rssi: Some(-55),
                },
                Advertisement {
                    address: "B".to_string(),
                    local_name: Some("Keyboard".to_string()),
                    rssi: Some(-40),
                },
            ])
        });
        let (supervisor, _queue) = supervisor(Arc::new(transport));
        let mut events = supervisor.subscribe();

        let found = supervisor.scan(Duration::from_millis(10)).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found["sensor-1"].address, "A");
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(supervisor.available_devices().len(), 1);
        assert_eq!(
            states(&mut events),
            vec![ConnectionState::Scanning, ConnectionState::Disconnected]
        );

        supervisor.clear_device_cache();
        assert!(supervisor.available_devices().is_empty());
    }

    #[tokio::test]
    async fn test_scan_error_yields_empty_map() {
        let mut transport = MockTransport::new();
        transport
            .expect_discover()
            .returning(|_| Err(Error::BluetoothUnavailable));
        let (supervisor, _queue) = supervisor(Arc::new(transport));

        assert!(supervisor.scan(Duration::from_millis(10)).await.is_empty());
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_callback() {
        let (link, _radio) = FakeLink::new();
        let (supervisor, _queue) = supervisor(link.transport(Arc::new(AtomicUsize::new(0))));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = supervisor.on_connection_changed(move |event| {
            sink.lock().push(event.state);
        });

        supervisor.connect("AA:BB", "sensor-1");
        settle(500).await;

        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        handle.unregister();
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let (tx, _queue) = reading_queue();
        let result = ConnectionSupervisor::new(
            Arc::new(MockTransport::new()),
            ScanConfig::default(),
            LinkConfig::default(),
            tx,
        );
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
