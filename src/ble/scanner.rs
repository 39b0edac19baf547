//! BLE scanning functionality.
//!
//! Provides the scanner for discovering spectroscopy sensors and the name
//! filter that turns raw advertisements into a device list.

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::utils::display_name;

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Platform peripheral identifier.
    pub address: String,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// A sensor found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredDevice {
    /// Platform peripheral identifier, used to connect.
    pub address: String,
    /// Name the sensor advertised.
    pub original_name: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Keep only advertisements whose name is in `target_names`, keyed by
/// display name. When a name is seen twice the stronger signal wins.
pub fn filter_targets(
    advertisements: &[Advertisement],
    target_names: &[String],
) -> HashMap<String, DiscoveredDevice> {
    let mut found: HashMap<String, DiscoveredDevice> = HashMap::new();

    for adv in advertisements {
        let Some(name) = adv.local_name.as_deref() else {
            continue;
        };
        if !target_names.iter().any(|t| t == name) {
            trace!("Ignoring device {:?} ({})", name, adv.address);
            continue;
        }

        let device = DiscoveredDevice {
            address: adv.address.clone(),
            original_name: name.to_string(),
            rssi: adv.rssi,
        };

        let key = display_name(name);
        match found.get(&key) {
            Some(existing) if existing.rssi.unwrap_or(i16::MIN) >= adv.rssi.unwrap_or(i16::MIN) => {}
            _ => {
                info!("Found target device: {} ({})", key, adv.address);
                found.insert(key, device);
            }
        }
    }

    found
}

/// BLE scanner for discovering spectroscopy sensors.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
}

impl BleScanner {
    /// Create a new BLE scanner on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no BLE stack or adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Listen for advertisements for `timeout` and return every peripheral
    /// the adapter knows about.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<Advertisement>> {
        info!("Starting BLE scan (timeout: {:.1}s)", timeout.as_secs_f64());

        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(timeout).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let peripherals = self.adapter.peripherals().await?;
        let mut advertisements = Vec::with_capacity(peripherals.len());

        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    trace!("Failed to read properties: {}", e);
                    continue;
                }
            };

            advertisements.push(Advertisement {
                address: peripheral.id().to_string(),
                local_name: properties.local_name,
                rssi: properties.rssi,
            });
        }

        debug!("Scan saw {} peripherals", advertisements.len());

        Ok(advertisements)
    }

    /// Look up a previously seen peripheral by identifier or MAC address.
    pub async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.id().to_string() == address {
                return Ok(peripheral);
            }
            if let Ok(Some(properties)) = peripheral.properties().await {
                if properties.address.to_string().eq_ignore_ascii_case(address) {
                    return Ok(peripheral);
                }
            }
        }

        Err(Error::DeviceNotFound {
            address: address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(address: &str, name: Option<&str>, rssi: Option<i16>) -> Advertisement {
        Advertisement {
            address: address.to_string(),
            local_name: name.map(str::to_string),
            rssi,
        }
    }

    fn targets() -> Vec<String> {
        crate::config::DEFAULT_TARGET_NAMES
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_filter_targets_keeps_known_names() {
        let found = filter_targets(
            &[
                adv("A", Some("pico-sensors-2"), Some(-60)),
                adv("B", Some("Headphones"), Some(-40)),
                adv("C", None, Some(-30)),
                adv("D", Some("PicoW-Sensors"), None),
            ],
            &targets(),
        );

        assert_eq!(found.len(), 2);
        assert_eq!(found["sensor-2"].address, "A");
        assert_eq!(found["sensor-2"].original_name, "pico-sensors-2");
        assert_eq!(found["PicoW-Sensors"].rssi, None);
    }

    #[test]
    fn test_filter_targets_empty_is_ok() {
        assert!(filter_targets(&[], &targets()).is_empty());
    }

    #[test]
    fn test_filter_targets_prefers_stronger_signal() {
        let found = filter_targets(
            &[
                adv("weak", Some("pico-sensors-1"), Some(-90)),
                adv("strong", Some("pico-sensors-1"), Some(-50)),
                adv("weaker", Some("pico-sensors-1"), Some(-95)),
            ],
            &targets(),
        );
        assert_eq!(found["sensor-1"].address, "strong");
    }
}
