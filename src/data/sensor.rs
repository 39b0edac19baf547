//! Sensor channel identifiers and per-channel containers.
//!
//! The sensor carries four photodetectors, each paired with an LED of a
//! fixed wavelength. Every per-channel value in this crate is stored in a
//! [`SensorArray`] indexed by [`SensorId`] rather than in string-keyed maps.

use chrono::{DateTime, Utc};
use std::ops::{Index, IndexMut};
use uuid::Uuid;

use crate::ble::uuids::{
    BLUE_CHARACTERISTIC_UUID, IR850_CHARACTERISTIC_UUID, IR940_CHARACTERISTIC_UUID,
    UV_CHARACTERISTIC_UUID,
};

/// One of the four detector channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorId {
    /// UV detector, 360 nm LED.
    Uv,
    /// Blue detector, 450 nm LED.
    Blue,
    /// IR detector, 850 nm LED.
    Ir850,
    /// IR detector, 940 nm LED.
    Ir940,
}

impl SensorId {
    /// Number of channels.
    pub const COUNT: usize = 4;

    /// All channels in display order.
    pub const ALL: [SensorId; 4] = [Self::Uv, Self::Blue, Self::Ir850, Self::Ir940];

    /// Position of this channel inside a [`SensorArray`].
    pub const fn index(self) -> usize {
        match self {
            Self::Uv => 0,
            Self::Blue => 1,
            Self::Ir850 => 2,
            Self::Ir940 => 3,
        }
    }

    /// The GATT characteristic that carries this channel's readings.
    pub const fn characteristic_uuid(self) -> Uuid {
        match self {
            Self::Uv => UV_CHARACTERISTIC_UUID,
            Self::Blue => BLUE_CHARACTERISTIC_UUID,
            Self::Ir850 => IR850_CHARACTERISTIC_UUID,
            Self::Ir940 => IR940_CHARACTERISTIC_UUID,
        }
    }

    /// Resolve a characteristic UUID to its channel.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|sensor| sensor.characteristic_uuid() == *uuid)
    }

    /// LED wavelength in nanometres.
    pub const fn wavelength_nm(self) -> u16 {
        match self {
            Self::Uv => 360,
            Self::Blue => 450,
            Self::Ir850 => 850,
            Self::Ir940 => 940,
        }
    }

    /// Stable column name used by export collaborators.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Uv => "UV_360nm",
            Self::Blue => "Blue_450nm",
            Self::Ir850 => "IR_850nm",
            Self::Ir940 => "IR_940nm",
        }
    }

    /// Human readable LED label.
    pub const fn led_name(self) -> &'static str {
        match self {
            Self::Uv => "UV LED (360nm)",
            Self::Blue => "Blue LED (450nm)",
            Self::Ir850 => "IR LED (850nm)",
            Self::Ir940 => "IR LED (940nm)",
        }
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Fixed-size container holding one value per [`SensorId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorArray<T>(pub [T; SensorId::COUNT]);

impl<T> SensorArray<T> {
    /// Build an array by evaluating `f` for every channel.
    pub fn from_fn(mut f: impl FnMut(SensorId) -> T) -> Self {
        Self(SensorId::ALL.map(&mut f))
    }

    /// Iterate over `(channel, value)` pairs in display order.
    pub fn iter(&self) -> impl Iterator<Item = (SensorId, &T)> {
        SensorId::ALL.into_iter().zip(self.0.iter())
    }

    /// Iterate mutably over `(channel, value)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SensorId, &mut T)> {
        SensorId::ALL.into_iter().zip(self.0.iter_mut())
    }

    /// Map every value to a new array.
    pub fn map<U>(&self, mut f: impl FnMut(SensorId, &T) -> U) -> SensorArray<U> {
        SensorArray::from_fn(|sensor| f(sensor, &self[sensor]))
    }
}

impl<T> Index<SensorId> for SensorArray<T> {
    type Output = T;

    fn index(&self, sensor: SensorId) -> &T {
        &self.0[sensor.index()]
    }
}

impl<T> IndexMut<SensorId> for SensorArray<T> {
    fn index_mut(&mut self, sensor: SensorId) -> &mut T {
        &mut self.0[sensor.index()]
    }
}

/// A single decoded notification.
///
/// `raw_value` is passed through exactly as the firmware sent it: depending
/// on the firmware build it is either raw ADC counts or millivolts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorReading {
    /// The channel the reading came from.
    pub sensor: SensorId,
    /// Decoded little-endian payload.
    pub raw_value: u16,
    /// When the worker received the notification.
    pub received_at: DateTime<Utc>,
}

impl SensorReading {
    /// Create a new reading.
    pub fn new(sensor: SensorId, raw_value: u16, received_at: DateTime<Utc>) -> Self {
        Self {
            sensor,
            raw_value,
            received_at,
        }
    }
}
