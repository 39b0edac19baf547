//! BLE communication module.
//!
//! This module provides low-level Bluetooth Low Energy functionality
//! for discovering and communicating with spectroscopy sensors.

pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use characteristics::{CharacteristicHandler, NotificationEvent};
pub use connection::{
    ConnectionEvent, ConnectionInfo, ConnectionState, ConnectionTracker, DeviceInfo,
};
pub use scanner::{filter_targets, Advertisement, BleScanner, DiscoveredDevice};
pub use transport::{BtleLink, BtleTransport, NotificationStream, SensorLink, Transport};
pub use uuids::*;
