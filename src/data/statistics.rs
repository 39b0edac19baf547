//! Summary statistics over recorded series.

/// Descriptive statistics for one channel's series.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorStatistics {
    /// Number of non-gap samples.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Most recent sample.
    pub latest: f64,
}

impl SensorStatistics {
    /// Compute statistics over `values`, skipping `NaN` gaps.
    ///
    /// An empty or all-gap series yields all zeros.
    pub fn from_values(values: &[f64]) -> Self {
        let samples: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();

        let Some(&latest) = samples.last() else {
            return Self::default();
        };

        let count = samples.len();
        let mean = samples.iter().sum::<f64>() / count as f64;
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            count,
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
            latest,
        }
    }
}

/// Arithmetic mean, or `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Trailing moving average.
///
/// The first `window - 1` outputs average over the samples seen so far. A
/// series shorter than the window is returned unchanged. `NaN` gaps are left
/// out of each mean; a window holding only gaps yields `NaN`.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.len() < window {
        return values.to_vec();
    }

    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let (sum, count) = values[start..=i]
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .collect()
}
