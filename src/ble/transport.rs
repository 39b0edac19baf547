//! Transport abstraction over the BLE stack.
//!
//! The supervisor talks to the radio only through [`Transport`] and
//! [`SensorLink`]. [`BtleTransport`] is the btleplug implementation used in
//! production.

use async_trait::async_trait;
use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ble::characteristics::{CharacteristicHandler, NotificationEvent};
use crate::ble::scanner::{Advertisement, BleScanner};
use crate::error::Result;

/// Stream of notifications from a connected sensor. Ends when the link drops.
pub type NotificationStream = Pin<Box<dyn Stream<Item = NotificationEvent> + Send>>;

/// Access to the BLE central: scanning and opening links.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Listen for `timeout` and report every advertisement seen.
    async fn discover(&self, timeout: Duration) -> Result<Vec<Advertisement>>;

    /// Prepare a link to a previously discovered peripheral.
    async fn open(&self, address: &str) -> Result<Box<dyn SensorLink>>;
}

/// One GATT link to a sensor.
#[async_trait]
pub trait SensorLink: Send + Sync {
    /// Connect and discover services.
    async fn connect(&self) -> Result<()>;

    /// Subscribe to all detector characteristics. Returns how many succeeded.
    async fn subscribe_sensors(&self) -> Result<usize>;

    /// Notification stream for the link.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Whether the radio still reports the link as up.
    async fn is_connected(&self) -> bool;

    /// Unsubscribe from all detector characteristics.
    async fn unsubscribe_sensors(&self);

    /// Release the link.
    async fn disconnect(&self) -> Result<()>;
}

/// btleplug-backed [`Transport`].
pub struct BtleTransport {
    scanner: BleScanner,
}

impl BtleTransport {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`](crate::Error::BluetoothUnavailable)
    /// if the host has no usable BLE stack.
    pub async fn new() -> Result<Self> {
        Ok(Self {
            scanner: BleScanner::new().await?,
        })
    }

    /// Wrap an existing scanner.
    pub fn with_scanner(scanner: BleScanner) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn discover(&self, timeout: Duration) -> Result<Vec<Advertisement>> {
        self.scanner.discover(timeout).await
    }

    async fn open(&self, address: &str) -> Result<Box<dyn SensorLink>> {
        let peripheral = self.scanner.find_peripheral(address).await?;
        Ok(Box::new(BtleLink::new(peripheral)))
    }
}

/// btleplug-backed [`SensorLink`].
pub struct BtleLink {
    peripheral: Peripheral,
    handler: CharacteristicHandler,
}

impl BtleLink {
    /// Wrap a peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        let handler = CharacteristicHandler::new(peripheral.clone());
        Self {
            peripheral,
            handler,
        }
    }
}

#[async_trait]
impl SensorLink for BtleLink {
    async fn connect(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
        } else {
            self.peripheral.connect().await?;
            info!("Successfully connected to sensor");
        }

        self.peripheral.discover_services().await?;
        self.handler.discover_characteristics();

        Ok(())
    }

    async fn subscribe_sensors(&self) -> Result<usize> {
        self.handler.subscribe_sensors().await
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .map(|notification| NotificationEvent {
                characteristic_uuid: notification.uuid,
                data: notification.value,
            })
            .boxed())
    }

    async fn is_connected(&self) -> bool {
        match self.peripheral.is_connected().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Failed to query link state: {}", e);
                false
            }
        }
    }

    async fn unsubscribe_sensors(&self) {
        self.handler.unsubscribe_sensors().await;
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        debug!("Released link to {}", self.peripheral.id());
        Ok(())
    }
}
