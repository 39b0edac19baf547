//! Sensor notification decoding.
//!
//! Every detector characteristic notifies a 2-byte little-endian `u16`.
//! Depending on the firmware build the value is either raw ADC counts
//! (0-65535) or millivolts (0-3300); it is passed through untouched.

use chrono::{DateTime, Utc};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::data::{SensorId, SensorReading};
use crate::error::{Error, Result};

/// Exact size of a sensor notification payload.
pub const PAYLOAD_LEN: usize = 2;

/// Parse a notification payload into its `u16` value.
///
/// # Errors
///
/// Returns [`Error::InvalidData`] if the payload is not exactly
/// [`PAYLOAD_LEN`] bytes long.
pub fn parse_payload(payload: &[u8]) -> Result<u16> {
    match payload {
        [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(Error::InvalidData {
            context: format!(
                "Sensor payload is {} bytes (expected {}): {:02X?}",
                payload.len(),
                PAYLOAD_LEN,
                &payload[..payload.len().min(8)]
            ),
        }),
    }
}

/// Resolve the channel and value of a notification.
///
/// # Errors
///
/// Returns [`Error::UnknownCharacteristic`] for UUIDs outside the four
/// detector characteristics and [`Error::InvalidData`] for malformed payloads.
pub fn parse_notification(characteristic_uuid: &Uuid, payload: &[u8]) -> Result<(SensorId, u16)> {
    let sensor =
        SensorId::from_uuid(characteristic_uuid).ok_or_else(|| Error::UnknownCharacteristic {
            uuid: characteristic_uuid.to_string(),
        })?;
    let value = parse_payload(payload)?;
    Ok((sensor, value))
}

/// Decode a notification received at `received_at`.
///
/// Rejected packets are logged and yield `None`; this never fails.
pub fn decode_at(
    characteristic_uuid: &Uuid,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Option<SensorReading> {
    match parse_notification(characteristic_uuid, payload) {
        Ok((sensor, raw_value)) => {
            trace!("Decoded {} = {} from {}", sensor, raw_value, characteristic_uuid);
            Some(SensorReading::new(sensor, raw_value, received_at))
        }
        Err(e) => {
            warn!("Dropping notification: {}", e);
            None
        }
    }
}

/// Decode a notification, stamping it with the current time.
pub fn decode(characteristic_uuid: &Uuid, payload: &[u8]) -> Option<SensorReading> {
    decode_at(characteristic_uuid, payload, Utc::now())
}
