// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # spectro-ble
//!
//! A cross-platform Rust library for acquiring data from a 4-channel optical
//! spectroscopy sensor over Bluetooth Low Energy.
//!
//! The sensor (a Raspberry Pi Pico W) exposes one GATT service with four
//! notify characteristics, one per photodetector: UV 360 nm, Blue 450 nm,
//! IR 850 nm and IR 940 nm. Each notification carries one little-endian
//! `u16` sample.
//!
//! ## Features
//!
//! - **Sensor Discovery**: Scan for sensors by their advertised names
//! - **Supervised Link**: One session at a time, liveness polling, exactly
//!   one disconnect event per lost link
//! - **Live View**: Latest value per channel, recorded once per tick
//! - **Capture**: Per-tick averaging into raw, measurement and calibrated
//!   series sharing one timestamp sequence
//! - **Calibration**: Affine per-channel calibration functions
//! - **Bounded Buffers**: Oldest rows trimmed past a configurable ceiling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spectro_ble::{Pipeline, PipelineConfig, Result, SensorId};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pipeline = Pipeline::new(PipelineConfig::default()).await?;
//!
//!     let devices = pipeline.scan(Duration::from_secs(5)).await;
//!     if let Some((name, device)) = devices.iter().next() {
//!         pipeline.connect(&device.address, name);
//!     }
//!
//!     pipeline.set_system_state(true);
//!     for _ in 0..10 {
//!         tokio::time::sleep(Duration::from_secs(1)).await;
//!         pipeline.tick();
//!     }
//!
//!     let raw = pipeline.get_raw_data();
//!     println!("UV samples: {:?}", raw.values(SensorId::Uv));
//!
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod protocol;
pub mod queue;
pub mod supervisor;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use config::{BufferConfig, LinkConfig, PipelineConfig, ScanConfig};
pub use error::{Error, Result};
pub use pipeline::{DataReady, Pipeline};
pub use processor::{DataProcessor, ExportRow, Mode, TickSummary};
pub use supervisor::{CallbackHandle, ConnectionSupervisor};
pub use utils::{counts_to_millivolts, display_name};

// Re-export commonly used types from submodules
pub use ble::connection::{ConnectionEvent, ConnectionInfo, ConnectionState};
pub use ble::scanner::DiscoveredDevice;
pub use data::{
    CalibrationFunction, CalibrationStore, SensorArray, SensorId, SensorReading,
    SensorStatistics, SeriesSet,
};
