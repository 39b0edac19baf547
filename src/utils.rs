//! Utility functions for the spectro-ble crate.

/// Full-scale ADC reading.
pub const ADC_FULL_SCALE: f64 = 65535.0;

/// ADC reference voltage in millivolts.
pub const ADC_REFERENCE_MV: f64 = 3300.0;

/// Convert raw ADC counts to millivolts.
///
/// Only meaningful for firmware builds that notify raw counts; newer builds
/// already send millivolts.
///
/// # Example
///
/// ```
/// use spectro_ble::counts_to_millivolts;
///
/// assert!((counts_to_millivolts(65535) - 3300.0).abs() < 0.001);
/// ```
#[inline]
pub fn counts_to_millivolts(counts: u16) -> f64 {
    counts as f64 * ADC_REFERENCE_MV / ADC_FULL_SCALE
}

/// Convert millivolts back to raw ADC counts, saturating at full scale.
#[inline]
pub fn millivolts_to_counts(millivolts: f64) -> u16 {
    (millivolts * ADC_FULL_SCALE / ADC_REFERENCE_MV)
        .round()
        .clamp(0.0, ADC_FULL_SCALE) as u16
}

/// Map an advertised sensor name to the name shown to users.
///
/// `pico-sensors-N` becomes `sensor-N`; every other name is kept.
///
/// # Example
///
/// ```
/// use spectro_ble::display_name;
///
/// assert_eq!(display_name("pico-sensors-3"), "sensor-3");
/// assert_eq!(display_name("PicoW-Sensors"), "PicoW-Sensors");
/// ```
pub fn display_name(advertised: &str) -> String {
    match advertised.strip_prefix("pico-sensors-") {
        Some(number) => format!("sensor-{}", number),
        None => advertised.to_string(),
    }
}
