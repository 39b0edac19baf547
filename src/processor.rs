//! Data processor.
//!
//! Turns drained [`SensorReading`]s into synchronized time series. In
//! [`Mode::DisplayOnly`] every tick records the latest known value per
//! channel; in [`Mode::Capturing`] each tick averages the samples collected
//! since the previous one and records raw, measurement and calibrated rows
//! under a single shared timestamp.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::BufferConfig;
use crate::data::statistics::mean;
use crate::data::{
    apply_calibration, moving_average, CalibrationFunction, CalibrationStore, SensorArray,
    SensorId, SensorReading, SensorStatistics, SeriesSet,
};

/// Acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Live view: latest values only, no averaging.
    #[default]
    DisplayOnly,
    /// Recording: per-tick averages into raw, measurement and calibrated series.
    Capturing,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DisplayOnly => write!(f, "DisplayOnly"),
            Self::Capturing => write!(f, "Capturing"),
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSummary {
    /// Mode the tick ran in.
    pub mode: Mode,
    /// Readings consumed by the tick.
    pub readings: usize,
    /// Rows appended to the measurement series (0 or 1).
    pub rows_appended: usize,
    /// Timestamp recorded for the appended row.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether diverging series lengths had to be truncated.
    pub repaired: bool,
    /// Oldest rows dropped because a series passed its ceiling.
    pub trimmed: usize,
}

/// One recorded row prepared for export.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExportRow {
    /// Row timestamp.
    pub timestamp: DateTime<Utc>,
    /// Averaged raw value per channel, if recorded.
    pub raw: SensorArray<Option<f64>>,
    /// Calibrated value, only for channels that have a calibration.
    pub calibrated: SensorArray<Option<f64>>,
}

/// Aggregates readings into the raw, measurement and calibrated series.
#[derive(Debug)]
pub struct DataProcessor {
    buffer: BufferConfig,
    mode: Mode,
    raw: SeriesSet,
    measurements: SeriesSet,
    calibrated: SeriesSet,
    /// Latest value per channel, updated on every reading.
    last_values: SensorArray<Option<f64>>,
    /// Samples collected since the last capture tick.
    scratch: SensorArray<Vec<f64>>,
    calibration: CalibrationStore,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self::new(BufferConfig::default(), CalibrationStore::new())
    }
}

impl DataProcessor {
    /// Create a processor in [`Mode::DisplayOnly`] with empty series.
    pub fn new(buffer: BufferConfig, calibration: CalibrationStore) -> Self {
        Self {
            buffer,
            mode: Mode::DisplayOnly,
            raw: SeriesSet::new(),
            measurements: SeriesSet::new(),
            calibrated: SeriesSet::new(),
            last_values: SensorArray::default(),
            scratch: SensorArray::default(),
            calibration,
        }
    }

    // === Configuration ===

    /// Current acquisition mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Check if capturing.
    pub fn is_capturing(&self) -> bool {
        self.mode == Mode::Capturing
    }

    /// Buffer limits in effect.
    pub fn buffer_config(&self) -> BufferConfig {
        self.buffer
    }

    /// The calibration store read by every tick.
    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    /// Replace every calibration function.
    pub fn set_calibration_functions(&self, functions: HashMap<SensorId, CalibrationFunction>) {
        info!("Calibration updated for {} sensor(s)", functions.len());
        self.calibration.set_all(functions);
    }

    /// Switch between capturing and display-only.
    pub fn set_system_state(&mut self, capturing: bool) {
        self.set_mode(if capturing {
            Mode::Capturing
        } else {
            Mode::DisplayOnly
        });
    }

    /// Switch mode.
    ///
    /// Entering [`Mode::Capturing`] clears every series so a recording starts
    /// empty. Leaving it keeps the recording and discards pending samples.
    pub fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }

        match mode {
            Mode::Capturing => {
                self.raw.clear();
                self.measurements.clear();
                self.calibrated.clear();
                self.clear_scratch();
                info!("Capture started, series cleared");
            }
            Mode::DisplayOnly => {
                self.clear_scratch();
                info!(
                    "Capture stopped with {} row(s) recorded",
                    self.measurements.len()
                );
            }
        }

        self.mode = mode;
    }

    // === Processing ===

    /// Feed readings without aggregating them yet.
    ///
    /// A zero reading carries no value and is skipped.
    pub fn ingest(&mut self, readings: &[SensorReading]) {
        for reading in readings {
            if reading.raw_value == 0 {
                continue;
            }
            let value = f64::from(reading.raw_value);
            self.last_values[reading.sensor] = Some(value);
            if self.mode == Mode::Capturing {
                self.scratch[reading.sensor].push(value);
            }
        }
    }

    /// Ingest `readings` and append at most one row.
    ///
    /// In display-only mode the row is the latest known value per channel
    /// and is appended on every tick once any channel has a value, with or
    /// without new readings. The row is stamped with the newest receipt time among `readings`, or
    /// `now` if there are none.
    pub fn process_tick(&mut self, readings: &[SensorReading], now: DateTime<Utc>) -> TickSummary {
        self.ingest(readings);

        let stamp = readings
            .iter()
            .map(|r| r.received_at)
            .max()
            .unwrap_or(now);

        let timestamp = match self.mode {
            Mode::DisplayOnly => self.append_display_row(stamp),
            Mode::Capturing => self.append_capture_row(stamp),
        };

        let mut repaired = false;
        let mut trimmed = 0;
        for series in [&mut self.raw, &mut self.measurements, &mut self.calibrated] {
            repaired |= series.truncate_to_shortest();
            trimmed = trimmed.max(series.trim_oldest(self.buffer.ceiling, self.buffer.retention));
        }

        TickSummary {
            mode: self.mode,
            readings: readings.len(),
            rows_appended: usize::from(timestamp.is_some()),
            timestamp,
            repaired,
            trimmed,
        }
    }

    fn append_display_row(&mut self, stamp: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.last_values.iter().all(|(_, v)| v.is_none()) {
            return None;
        }
        Some(self.measurements.push_row(stamp, &self.last_values))
    }

    fn append_capture_row(&mut self, stamp: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let means = self.scratch.map(|_, samples| mean(samples));
        self.clear_scratch();

        if means.iter().all(|(_, v)| v.is_none()) {
            debug!("No samples this tick");
            return None;
        }

        let calibration = self.calibration.snapshot();
        let calibrated = means.map(|sensor, mean| {
            mean.map(|value| apply_calibration(&calibration, sensor, value))
        });

        let timestamp = self.measurements.next_timestamp(stamp);
        self.raw.push_row(timestamp, &means);
        self.measurements.push_row(timestamp, &means);
        self.calibrated.push_row(timestamp, &calibrated);

        Some(timestamp)
    }

    fn clear_scratch(&mut self) {
        for (_, samples) in self.scratch.iter_mut() {
            samples.clear();
        }
    }

    // === Accessors ===

    /// Snapshot of the averaged raw series.
    pub fn get_raw_data(&self) -> SeriesSet {
        self.raw.clone()
    }

    /// Snapshot of the measurement series.
    pub fn get_measurements(&self) -> SeriesSet {
        self.measurements.clone()
    }

    /// Snapshot of the calibrated series.
    pub fn get_calibrated_data(&self) -> SeriesSet {
        self.calibrated.clone()
    }

    /// Latest value per channel, `None` for channels not yet heard from.
    pub fn get_latest_values(&self) -> SensorArray<Option<f64>> {
        self.last_values
    }

    /// Latest calibrated value, only for calibrated channels with data.
    pub fn get_latest_calibrated_values(&self) -> SensorArray<Option<f64>> {
        let status = self.calibration.status();
        SensorArray::from_fn(|sensor| {
            if status[sensor] {
                self.calibrated.last_value(sensor)
            } else {
                None
            }
        })
    }

    /// Mean of the last `average_points` measurements per channel, 0.0
    /// for channels without data.
    pub fn get_spectrum_intensities(&self, average_points: usize) -> SensorArray<f64> {
        let n = average_points.max(1);
        SensorArray::from_fn(|sensor| {
            let recent: Vec<f64> = self
                .measurements
                .values(sensor)
                .iter()
                .rev()
                .filter(|v| !v.is_nan())
                .take(n)
                .copied()
                .collect();
            mean(&recent).unwrap_or(0.0)
        })
    }

    /// Descriptive statistics of the measurement series.
    pub fn get_data_statistics(&self) -> SensorArray<SensorStatistics> {
        SensorArray::from_fn(|sensor| SensorStatistics::from_values(self.measurements.values(sensor)))
    }

    /// Trailing moving average of one channel's measurements.
    pub fn apply_smoothing(&self, sensor: SensorId, window: usize) -> Vec<f64> {
        moving_average(self.measurements.values(sensor), window)
    }

    /// Measurement rows with timestamps in `[start, end]`.
    pub fn get_data_in_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SeriesSet {
        self.measurements.slice_between(start, end)
    }

    /// Check if any measurement row exists.
    pub fn has_data(&self) -> bool {
        !self.measurements.is_empty()
    }

    /// Number of measurement rows.
    pub fn data_count(&self) -> usize {
        self.measurements.len()
    }

    /// Samples pending per channel for the next capture tick.
    pub fn scratch_status(&self) -> SensorArray<usize> {
        self.scratch.map(|_, samples| samples.len())
    }

    /// Which channels have a calibration.
    pub fn calibration_status(&self) -> SensorArray<bool> {
        self.calibration.status()
    }

    /// Measurement rows joined with their raw and calibrated values.
    pub fn export_rows(&self) -> Vec<ExportRow> {
        let status = self.calibration.status();
        let present = |v: Option<&f64>| v.copied().filter(|v| !v.is_nan());

        self.measurements
            .timestamps()
            .iter()
            .enumerate()
            .map(|(i, &timestamp)| ExportRow {
                timestamp,
                raw: SensorArray::from_fn(|sensor| present(self.raw.values(sensor).get(i))),
                calibrated: SensorArray::from_fn(|sensor| {
                    if status[sensor] {
                        present(self.calibrated.values(sensor).get(i))
                    } else {
                        None
                    }
                }),
            })
            .collect()
    }

    // === Reset ===

    /// Drop all series, pending samples and latest values.
    pub fn clear_all_data(&mut self) {
        self.raw.clear();
        self.measurements.clear();
        self.calibrated.clear();
        self.clear_scratch();
        self.last_values = SensorArray::default();
        info!("All data cleared");
    }

    /// Forget the latest values, e.g. after the link drops.
    pub fn reset_latest_values(&mut self) {
        self.last_values = SensorArray::default();
    }
}
