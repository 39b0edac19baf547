//! GATT characteristic handling.
//!
//! Provides functionality for subscribing to the detector
//! characteristics of a connected sensor.

use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::uuids::SENSOR_CHARACTERISTIC_UUIDS;
use crate::error::{Error, Result};

/// Notification event from a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Vec<u8>,
}

/// Handler for GATT characteristics on a sensor.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: Arc<RwLock<HashMap<Uuid, Characteristic>>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    ///
    /// Note: Services must be discovered before using this handler.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Discover and cache all characteristics.
    ///
    /// This should be called after connecting and discovering services.
    pub fn discover_characteristics(&self) -> usize {
        let services = self.peripheral.services();

        let mut chars = self.characteristics.write();
        chars.clear();

        for service in services {
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());

        chars.len()
    }

    /// Check if a characteristic exists.
    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.read().contains_key(uuid)
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Subscribe to notifications from a characteristic.
    pub async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;

        debug!(
            "Found characteristic {}, properties: {:?}",
            uuid, characteristic.properties
        );

        self.peripheral.subscribe(&characteristic).await?;

        debug!("Successfully subscribed to notifications from {}", uuid);

        Ok(())
    }

    /// Unsubscribe from notifications from a characteristic.
    pub async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;

        self.peripheral.unsubscribe(&characteristic).await?;

        debug!("Unsubscribed from notifications from {}", uuid);

        Ok(())
    }

    /// Subscribe to every detector characteristic.
    ///
    /// Individual failures are logged. Returns how many subscriptions
    /// succeeded, or an error if none did.
    pub async fn subscribe_sensors(&self) -> Result<usize> {
        let mut subscribed = 0;
        let mut last_error = None;

        for uuid in SENSOR_CHARACTERISTIC_UUIDS {
            match self.subscribe(&uuid).await {
                Ok(()) => subscribed += 1,
                Err(e) => {
                    warn!("Failed to subscribe to {}: {}", uuid, e);
                    last_error = Some(e);
                }
            }
        }

        match (subscribed, last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(subscribed),
        }
    }

    /// Unsubscribe from every detector characteristic, logging failures.
    pub async fn unsubscribe_sensors(&self) {
        for uuid in SENSOR_CHARACTERISTIC_UUIDS {
            if !self.has_characteristic(&uuid) {
                continue;
            }
            if let Err(e) = self.unsubscribe(&uuid).await {
                debug!("Failed to unsubscribe from {}: {}", uuid, e);
            }
        }
    }
}
