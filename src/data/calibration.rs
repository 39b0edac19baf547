//! Calibration functions and the shared calibration store.
//!
//! A calibration function is an affine map from a raw reading to a
//! concentration or other physical unit. Fitting the line is done by an
//! external collaborator; this module only stores and applies the result.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::sensor::{SensorArray, SensorId};
use crate::error::{Error, Result};

/// Affine calibration `calibrated = slope * raw + intercept`, clamped at zero.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationFunction {
    /// Multiplier applied to the raw value.
    pub slope: f64,
    /// Offset added after scaling.
    pub intercept: f64,
    /// Unit of the calibrated value, e.g. `"ppm"`.
    pub unit: String,
}

impl CalibrationFunction {
    /// Create a new calibration function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the slope or intercept is not finite.
    pub fn new(slope: f64, intercept: f64, unit: impl Into<String>) -> Result<Self> {
        if !slope.is_finite() {
            return Err(Error::invalid_parameter("slope", slope));
        }
        if !intercept.is_finite() {
            return Err(Error::invalid_parameter("intercept", intercept));
        }

        Ok(Self {
            slope,
            intercept,
            unit: unit.into(),
        })
    }

    /// Apply the calibration. Negative results are clamped to zero.
    pub fn apply(&self, raw: f64) -> f64 {
        (self.slope * raw + self.intercept).max(0.0)
    }
}

/// One optional calibration per channel.
pub type CalibrationMap = SensorArray<Option<CalibrationFunction>>;

/// Apply the channel's calibration if present, otherwise pass the raw value through.
pub fn apply_calibration(map: &CalibrationMap, sensor: SensorId, raw: f64) -> f64 {
    match &map[sensor] {
        Some(function) => function.apply(raw),
        None => raw,
    }
}

/// Calibration map shared between the collaborator that edits it and the
/// processor that reads it.
///
/// Writers replace the whole map at once; readers take a [`snapshot`] so a
/// tick never observes a half-updated set of functions.
///
/// [`snapshot`]: CalibrationStore::snapshot
#[derive(Debug, Clone, Default)]
pub struct CalibrationStore {
    inner: Arc<RwLock<CalibrationMap>>,
}

impl CalibrationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every calibration function. Channels missing from `functions`
    /// become uncalibrated.
    pub fn set_all(&self, functions: HashMap<SensorId, CalibrationFunction>) {
        let mut map = CalibrationMap::default();
        for (sensor, function) in functions {
            map[sensor] = Some(function);
        }
        *self.inner.write() = map;
    }

    /// Set or clear a single channel's calibration.
    pub fn set(&self, sensor: SensorId, function: Option<CalibrationFunction>) {
        self.inner.write()[sensor] = function;
    }

    /// Consistent copy of the whole map.
    pub fn snapshot(&self) -> CalibrationMap {
        self.inner.read().clone()
    }

    /// Which channels currently have a calibration.
    pub fn status(&self) -> SensorArray<bool> {
        self.inner.read().map(|_, f| f.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_affine() {
        let f = CalibrationFunction::new(2.0, 5.0, "ppm").unwrap();
        assert_eq!(f.apply(200.0), 405.0);
    }

    #[test]
    fn test_apply_clamps_negative() {
        let f = CalibrationFunction::new(1.0, -500.0, "ppm").unwrap();
        assert_eq!(f.apply(100.0), 0.0);
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(CalibrationFunction::new(f64::NAN, 0.0, "ppm").is_err());
        assert!(CalibrationFunction::new(1.0, f64::INFINITY, "ppm").is_err());
    }

    #[test]
    fn test_uncalibrated_passes_through() {
        let map = CalibrationMap::default();
        assert_eq!(apply_calibration(&map, SensorId::Uv, 123.0), 123.0);
    }

    #[test]
    fn test_store_set_all_replaces_previous() {
        let store = CalibrationStore::new();
        store.set(
            SensorId::Ir940,
            Some(CalibrationFunction::new(3.0, 0.0, "mg/L").unwrap()),
        );

        let mut functions = HashMap::new();
        functions.insert(
            SensorId::Uv,
            CalibrationFunction::new(2.0, 1.0, "ppm").unwrap(),
        );
        store.set_all(functions);

        let status = store.status();
        assert!(status[SensorId::Uv]);
        assert!(!status[SensorId::Ir940]);

        let snapshot = store.snapshot();
        store.set(SensorId::Uv, None);
        // The earlier snapshot is unaffected by later writes.
        assert!(snapshot[SensorId::Uv].is_some());
        assert!(store.snapshot()[SensorId::Uv].is_none());
    }
}
