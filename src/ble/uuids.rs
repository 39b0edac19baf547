//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for spectroscopy sensor communication.
//! The sensor firmware reuses the Nordic UART base UUID and exposes one
//! notify+read characteristic per detector channel.

use uuid::Uuid;

/// Primary sensor service UUID.
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);

/// UV detector (360 nm) characteristic UUID (Read, Notify).
pub const UV_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// IR detector (850 nm) characteristic UUID (Read, Notify).
pub const IR850_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);
/// IR detector (940 nm) characteristic UUID (Read, Notify).
pub const IR940_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e40_0004_b5a3_f393_e0a9_e50e24dcca9e);
/// Blue detector (450 nm) characteristic UUID (Read, Notify).
pub const BLUE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e40_0005_b5a3_f393_e0a9_e50e24dcca9e);

/// All sensor characteristics, in GATT handle order.
pub const SENSOR_CHARACTERISTIC_UUIDS: [Uuid; 4] = [
    UV_CHARACTERISTIC_UUID,
    IR850_CHARACTERISTIC_UUID,
    IR940_CHARACTERISTIC_UUID,
    BLUE_CHARACTERISTIC_UUID,
];

/// Check if a service UUID is the spectroscopy sensor service.
pub fn is_sensor_service(uuid: &Uuid) -> bool {
    *uuid == SENSOR_SERVICE_UUID
}

/// Check if a characteristic UUID carries detector readings.
pub fn is_sensor_characteristic(uuid: &Uuid) -> bool {
    SENSOR_CHARACTERISTIC_UUIDS.contains(uuid)
}
