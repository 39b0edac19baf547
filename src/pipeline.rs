//! Acquisition pipeline.
//!
//! [`Pipeline`] is the single entry point for collaborators. It wires the
//! connection supervisor, the reading queue and the data processor together
//! and exposes the consumer-side operations: one `tick()` per display
//! refresh drains the queue into the series buffers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::ble::connection::{ConnectionEvent, ConnectionInfo, ConnectionState};
use crate::ble::scanner::DiscoveredDevice;
use crate::ble::transport::{BtleTransport, Transport};
use crate::config::PipelineConfig;
use crate::data::{
    CalibrationFunction, CalibrationStore, SensorArray, SensorId, SensorReading,
    SensorStatistics, SeriesSet,
};
use crate::error::{Error, Result};
use crate::processor::{DataProcessor, ExportRow, Mode, TickSummary};
use crate::queue::{reading_queue, ReadingQueue};
use crate::supervisor::{CallbackHandle, ConnectionSupervisor};

/// Event emitted when a tick appended a row.
#[derive(Debug, Clone, PartialEq)]
pub struct DataReady {
    /// Mode the row was recorded in.
    pub mode: Mode,
    /// Timestamp of the new row.
    pub timestamp: DateTime<Utc>,
    /// Measurement rows held after the tick.
    pub data_count: usize,
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| Error::Internal(format!("No tokio runtime: {}", e)))
}

/// The acquisition pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    /// `None` when no Bluetooth stack was available at startup.
    supervisor: Option<ConnectionSupervisor>,
    startup_error: Option<Error>,
    queue: Mutex<ReadingQueue>,
    processor: Mutex<DataProcessor>,
    /// Connection events observed by `tick()`.
    connection_rx: Option<Mutex<broadcast::Receiver<ConnectionEvent>>>,
    data_ready_tx: broadcast::Sender<DataReady>,
    /// Runtime that callback listeners are spawned on.
    runtime: Handle,
    callback_counter: AtomicU64,
}

impl Pipeline {
    /// Create a pipeline on the host's first Bluetooth adapter.
    ///
    /// A missing Bluetooth stack is not fatal: it is logged once and kept in
    /// [`startup_error`](Self::startup_error), scanning then finds nothing
    /// and `connect` is refused while processing keeps working.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `config` does not validate.
    pub async fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        match BtleTransport::new().await {
            Ok(transport) => Self::with_transport(config, Arc::new(transport)),
            Err(e) => {
                error!("Bluetooth unavailable, acquisition disabled: {}", e);
                Self::unavailable(config, e)
            }
        }
    }

    /// Create a pipeline on a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate or no tokio runtime
    /// is running.
    pub fn with_transport(config: PipelineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let runtime = current_runtime()?;
        let (sender, queue) = reading_queue();
        let supervisor =
            ConnectionSupervisor::new(transport, config.scan.clone(), config.link, sender)?;

        Ok(Self::assemble(config, runtime, Some(supervisor), queue, None))
    }

    /// A pipeline that only processes; acquisition is disabled by `error`.
    fn unavailable(config: PipelineConfig, error: Error) -> Result<Self> {
        let runtime = current_runtime()?;
        let (_, queue) = reading_queue();
        Ok(Self::assemble(config, runtime, None, queue, Some(error)))
    }

    fn assemble(
        config: PipelineConfig,
        runtime: Handle,
        supervisor: Option<ConnectionSupervisor>,
        queue: ReadingQueue,
        startup_error: Option<Error>,
    ) -> Self {
        let connection_rx = supervisor.as_ref().map(|s| Mutex::new(s.subscribe()));
        let processor = DataProcessor::new(config.buffer, CalibrationStore::new());
        let (data_ready_tx, _) = broadcast::channel(64);

        Self {
            config,
            supervisor,
            startup_error,
            queue: Mutex::new(queue),
            processor: Mutex::new(processor),
            connection_rx,
            data_ready_tx,
            runtime,
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Configuration the pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The error that disabled acquisition at startup, if any.
    pub fn startup_error(&self) -> Option<&Error> {
        self.startup_error.as_ref()
    }

    /// Check if a Bluetooth stack is available.
    pub fn is_bluetooth_available(&self) -> bool {
        self.supervisor.is_some()
    }

    // === Connection ===

    /// Scan for known sensors, keyed by display name.
    pub async fn scan(&self, timeout: Duration) -> HashMap<String, DiscoveredDevice> {
        match &self.supervisor {
            Some(supervisor) => supervisor.scan(timeout).await,
            None => {
                debug!("Scan skipped: Bluetooth unavailable");
                HashMap::new()
            }
        }
    }

    /// Scan using the configured timeout.
    pub async fn scan_default(&self) -> HashMap<String, DiscoveredDevice> {
        self.scan(self.config.scan.timeout).await
    }

    /// Devices accumulated across scans.
    pub fn available_devices(&self) -> HashMap<String, DiscoveredDevice> {
        self.supervisor
            .as_ref()
            .map(ConnectionSupervisor::available_devices)
            .unwrap_or_default()
    }

    /// Start connecting. See [`ConnectionSupervisor::connect`].
    pub fn connect(&self, address: &str, name: &str) -> bool {
        match &self.supervisor {
            Some(supervisor) => supervisor.connect(address, name),
            None => {
                warn!("Cannot connect to {}: Bluetooth unavailable", name);
                false
            }
        }
    }

    /// Stop the session. See [`ConnectionSupervisor::disconnect`].
    pub async fn disconnect(&self) {
        if let Some(supervisor) = &self.supervisor {
            supervisor.disconnect().await;
        }
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor
            .as_ref()
            .map(ConnectionSupervisor::state)
            .unwrap_or_default()
    }

    /// Connection state and device.
    pub fn connection_info(&self) -> ConnectionInfo {
        self.supervisor
            .as_ref()
            .map(ConnectionSupervisor::connection_info)
            .unwrap_or_default()
    }

    /// Last raw value per channel as seen by the link, zero while disconnected.
    pub fn link_latest_values(&self) -> SensorArray<u16> {
        self.supervisor
            .as_ref()
            .map(ConnectionSupervisor::latest_values)
            .unwrap_or_default()
    }

    /// Subscribe to connection events. `None` without Bluetooth.
    pub fn subscribe_connection(&self) -> Option<broadcast::Receiver<ConnectionEvent>> {
        self.supervisor.as_ref().map(ConnectionSupervisor::subscribe)
    }

    /// Register a callback for connection state changes. `None` without Bluetooth.
    pub fn on_connection_changed<F>(&self, callback: F) -> Option<CallbackHandle>
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        self.supervisor
            .as_ref()
            .map(|s| s.on_connection_changed(callback))
    }

    // === Processing ===

    /// Readings waiting in the queue.
    pub fn pending_readings(&self) -> usize {
        self.queue.lock().len()
    }

    /// Take every pending reading without processing it.
    pub fn drain_queue(&self) -> Vec<SensorReading> {
        self.queue.lock().drain_all()
    }

    /// Drain the queue into the series buffers.
    ///
    /// Never fails: decode and link problems were already handled on the
    /// worker side. When the link dropped since the previous tick the
    /// latest values are cleared after the remaining readings are recorded.
    pub fn tick(&self) -> TickSummary {
        let link_dropped = self.take_disconnect();
        let readings = self.drain_queue();

        let mut processor = self.processor.lock();
        let summary = processor.process_tick(&readings, Utc::now());

        if link_dropped {
            debug!("Link dropped, clearing latest values");
            processor.reset_latest_values();
        }
        let data_count = processor.data_count();
        drop(processor);

        if let Some(timestamp) = summary.timestamp {
            let _ = self.data_ready_tx.send(DataReady {
                mode: summary.mode,
                timestamp,
                data_count,
            });
        }

        summary
    }

    /// Whether a disconnect event arrived since the last tick.
    fn take_disconnect(&self) -> bool {
        let Some(rx) = &self.connection_rx else {
            return false;
        };
        let mut rx = rx.lock();

        let mut dropped = false;
        loop {
            match rx.try_recv() {
                Ok(event) => dropped |= event.is_disconnect(),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Missed {} connection events", n);
                    dropped |= !self.connection_state().is_connected();
                }
                Err(_) => break,
            }
        }
        dropped
    }

    /// Subscribe to [`DataReady`] events.
    pub fn subscribe_data_ready(&self) -> broadcast::Receiver<DataReady> {
        self.data_ready_tx.subscribe()
    }

    /// Register a callback for new rows.
    pub fn on_data_ready<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(DataReady) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.data_ready_tx.subscribe();

        let handle = self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Data-ready callback lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Replace every calibration function.
    pub fn set_calibration_functions(&self, functions: HashMap<SensorId, CalibrationFunction>) {
        self.processor.lock().set_calibration_functions(functions);
    }

    /// Shared calibration store, for collaborators that edit single channels.
    pub fn calibration_store(&self) -> CalibrationStore {
        self.processor.lock().calibration().clone()
    }

    /// Switch between capturing and display-only.
    pub fn set_system_state(&self, capturing: bool) {
        self.processor.lock().set_system_state(capturing);
    }

    /// Current acquisition mode.
    pub fn mode(&self) -> Mode {
        self.processor.lock().mode()
    }

    // === Data access ===

    /// Snapshot of the measurement series.
    pub fn get_measurements(&self) -> SeriesSet {
        self.processor.lock().get_measurements()
    }

    /// Snapshot of the averaged raw series.
    pub fn get_raw_data(&self) -> SeriesSet {
        self.processor.lock().get_raw_data()
    }

    /// Snapshot of the calibrated series.
    pub fn get_calibrated_data(&self) -> SeriesSet {
        self.processor.lock().get_calibrated_data()
    }

    /// Latest value per channel.
    pub fn get_latest_values(&self) -> SensorArray<Option<f64>> {
        self.processor.lock().get_latest_values()
    }

    /// Latest calibrated value for calibrated channels.
    pub fn get_latest_calibrated_values(&self) -> SensorArray<Option<f64>> {
        self.processor.lock().get_latest_calibrated_values()
    }

    /// Mean of the most recent measurements per channel.
    pub fn get_spectrum_intensities(&self, average_points: usize) -> SensorArray<f64> {
        self.processor.lock().get_spectrum_intensities(average_points)
    }

    /// Statistics of the measurement series.
    pub fn get_data_statistics(&self) -> SensorArray<SensorStatistics> {
        self.processor.lock().get_data_statistics()
    }

    /// Moving average of one channel's measurements.
    pub fn apply_smoothing(&self, sensor: SensorId, window: usize) -> Vec<f64> {
        self.processor.lock().apply_smoothing(sensor, window)
    }

    /// Measurement rows within `[start, end]`.
    pub fn get_data_in_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SeriesSet {
        self.processor.lock().get_data_in_time_range(start, end)
    }

    /// Check if any measurement row exists.
    pub fn has_data(&self) -> bool {
        self.processor.lock().has_data()
    }

    /// Number of measurement rows.
    pub fn data_count(&self) -> usize {
        self.processor.lock().data_count()
    }

    /// Samples pending per channel for the next capture tick.
    pub fn scratch_status(&self) -> SensorArray<usize> {
        self.processor.lock().scratch_status()
    }

    /// Which channels have a calibration.
    pub fn calibration_status(&self) -> SensorArray<bool> {
        self.processor.lock().calibration_status()
    }

    /// Recorded rows prepared for export.
    pub fn export_rows(&self) -> Vec<ExportRow> {
        self.processor.lock().export_rows()
    }

    /// Drop every recorded row.
    pub fn clear_all_data(&self) {
        self.processor.lock().clear_all_data();
    }

    /// Clean shutdown of the session.
    pub async fn shutdown(&self) {
        info!("Shutting down pipeline");
        if let Some(supervisor) = &self.supervisor {
            supervisor.shutdown().await;
        }
    }
}
