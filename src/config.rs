//! Pipeline configuration.
//!
//! A single [`PipelineConfig`] is created at startup and handed to
//! [`Pipeline::new`](crate::Pipeline::new); nothing in the crate reads global
//! settings.

use std::time::Duration;

use crate::error::{Error, Result};

/// Advertised names of sensors this crate will connect to.
pub const DEFAULT_TARGET_NAMES: [&str; 5] = [
    "PicoW-Sensors",
    "pico-sensors-1",
    "pico-sensors-2",
    "pico-sensors-3",
    "pico-sensors-4",
];

/// Scanning parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanConfig {
    /// How long a scan listens for advertisements.
    pub timeout: Duration,
    /// Advertised local names accepted by a scan.
    pub target_names: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            target_names: DEFAULT_TARGET_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Link supervision parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig {
    /// Upper bound on connect + service discovery + subscribe.
    pub connect_timeout: Duration,
    /// Period of the liveness poll once connected.
    pub liveness_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            liveness_interval: Duration::from_secs(2),
        }
    }
}

/// Series buffer limits.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferConfig {
    /// Rows a series set may hold before it is trimmed (24 h at 1 Hz).
    pub ceiling: usize,
    /// Fraction of `ceiling` kept after a trim.
    pub retention: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            ceiling: 86_400,
            retention: 0.95,
        }
    }
}

impl BufferConfig {
    /// Check the limits are usable.
    pub fn validate(&self) -> Result<()> {
        if self.ceiling == 0 {
            return Err(Error::invalid_parameter("buffer.ceiling", self.ceiling));
        }
        if !(self.retention > 0.0 && self.retention <= 1.0) {
            return Err(Error::invalid_parameter("buffer.retention", self.retention));
        }
        Ok(())
    }
}

/// Complete configuration for a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Scanning parameters.
    pub scan: ScanConfig,
    /// Link supervision parameters.
    pub link: LinkConfig,
    /// Series buffer limits.
    pub buffer: BufferConfig,
}

impl PipelineConfig {
    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan.timeout = timeout;
        self
    }

    /// Replace the accepted advertised names.
    pub fn with_target_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scan.target_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.link.connect_timeout = timeout;
        self
    }

    /// Set the liveness poll interval.
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.link.liveness_interval = interval;
        self
    }

    /// Set the buffer ceiling and retention fraction.
    pub fn with_buffer_limits(mut self, ceiling: usize, retention: f64) -> Self {
        self.buffer = BufferConfig { ceiling, retention };
        self
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.scan.timeout.is_zero() {
            return Err(Error::invalid_parameter("scan.timeout", "0s"));
        }
        if self.scan.target_names.is_empty() {
            return Err(Error::invalid_parameter("scan.target_names", "[]"));
        }
        if self.link.connect_timeout.is_zero() {
            return Err(Error::invalid_parameter("link.connect_timeout", "0s"));
        }
        if self.link.liveness_interval.is_zero() {
            return Err(Error::invalid_parameter("link.liveness_interval", "0s"));
        }
        self.buffer.validate()
    }
}
