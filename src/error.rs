//! Error types for the spectro-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The requested device was not seen by the adapter.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address that was searched for.
        address: String,
    },

    /// Operation requires a connection but the sensor is not connected.
    #[error("Sensor not connected")]
    NotConnected,

    /// Failed to establish a connection to the sensor.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connection to the sensor was lost.
    #[error("Connection lost")]
    ConnectionLost,

    /// A connection attempt did not complete in time.
    #[error("Connection timed out after {seconds:.1}s")]
    Timeout {
        /// How long the attempt was allowed to run.
        seconds: f64,
    },

    /// Invalid data was received from the sensor.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// A notification arrived from a characteristic that maps to no sensor.
    #[error("Unknown characteristic: {uuid}")]
    UnknownCharacteristic {
        /// The UUID of the unexpected characteristic.
        uuid: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },
}

impl Error {
    /// Build an [`Error::InvalidParameter`] from anything printable.
    pub(crate) fn invalid_parameter(name: &str, value: impl std::fmt::Display) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Whether this error describes a problem with the BLE link rather than
    /// with the data or the caller.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::NotConnected
                | Self::ConnectionFailed { .. }
                | Self::ConnectionLost
                | Self::Timeout { .. }
                | Self::DeviceNotFound { .. }
                | Self::CharacteristicNotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidData {
            context: "payload is 3 bytes".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid data received: payload is 3 bytes");

        let err = Error::invalid_parameter("retention", 1.5);
        assert_eq!(err.to_string(), "Invalid parameter: retention = 1.5");
    }

    #[test]
    fn test_is_link_error() {
        assert!(Error::ConnectionLost.is_link_error());
        assert!(Error::Timeout { seconds: 20.0 }.is_link_error());
        assert!(!Error::InvalidData {
            context: String::new()
        }
        .is_link_error());
        assert!(!Error::BluetoothUnavailable.is_link_error());
    }
}
