//! Data structures for sensor data.
//!
//! This module contains the channel identifiers, readings, calibration
//! functions and the synchronized series buffers the processor fills.

pub mod calibration;
pub mod sensor;
pub mod series;
pub mod statistics;

pub use calibration::{apply_calibration, CalibrationFunction, CalibrationMap, CalibrationStore};
pub use sensor::{SensorArray, SensorId, SensorReading};
pub use series::SeriesSet;
pub use statistics::{moving_average, SensorStatistics};
