//! Synchronized time-series buffers.
//!
//! A [`SeriesSet`] holds four per-channel value sequences and one shared
//! timestamp sequence. Row `i` of every sequence belongs to the same tick, so
//! all five sequences must always have the same length.

use chrono::{DateTime, Duration, Utc};

use super::sensor::{SensorArray, SensorId};

/// Four parallel value sequences plus their shared timestamps.
///
/// A channel that produced nothing during a tick is recorded as `f64::NAN`
/// for that row, which plotting collaborators render as a gap.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeriesSet {
    timestamps: Vec<DateTime<Utc>>,
    values: SensorArray<Vec<f64>>,
}

impl SeriesSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Check if the set has no rows.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Shared timestamp sequence.
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Value sequence for a channel.
    pub fn values(&self, sensor: SensorId) -> &[f64] {
        &self.values[sensor]
    }

    /// Most recent timestamp, if any.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    /// Most recent non-gap value for a channel.
    pub fn last_value(&self, sensor: SensorId) -> Option<f64> {
        self.values[sensor].iter().rev().find(|v| !v.is_nan()).copied()
    }

    /// Append one row.
    ///
    /// If `timestamp` is not strictly after the previous row it is advanced
    /// to one millisecond past it. Returns the timestamp actually recorded.
    pub fn push_row(
        &mut self,
        timestamp: DateTime<Utc>,
        row: &SensorArray<Option<f64>>,
    ) -> DateTime<Utc> {
        let timestamp = self.next_timestamp(timestamp);

        self.timestamps.push(timestamp);
        for (sensor, value) in row.iter() {
            self.values[sensor].push(value.unwrap_or(f64::NAN));
        }

        timestamp
    }

    /// The timestamp a row pushed at `candidate` would receive.
    pub fn next_timestamp(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_timestamp() {
            Some(previous) if candidate <= previous => {
                let adjusted = previous + Duration::milliseconds(1);
                tracing::warn!(
                    "Out-of-order timestamp {} adjusted to {}",
                    candidate,
                    adjusted
                );
                adjusted
            }
            _ => candidate,
        }
    }

    /// Lengths of `[timestamps, UV, Blue, IR850, IR940]`.
    pub fn lengths(&self) -> [usize; 5] {
        [
            self.timestamps.len(),
            self.values[SensorId::Uv].len(),
            self.values[SensorId::Blue].len(),
            self.values[SensorId::Ir850].len(),
            self.values[SensorId::Ir940].len(),
        ]
    }

    /// Check that all five sequences have the same length.
    pub fn is_synchronized(&self) -> bool {
        let lengths = self.lengths();
        lengths.iter().all(|&l| l == lengths[0])
    }

    /// Truncate every sequence to the shortest one.
    ///
    /// Rows are aligned from the front, so the surplus tail of the longer
    /// sequences is dropped. Returns `true` if anything was truncated.
    pub fn truncate_to_shortest(&mut self) -> bool {
        if self.is_synchronized() {
            return false;
        }

        let lengths = self.lengths();
        let shortest = lengths.iter().copied().min().unwrap_or(0);

        tracing::warn!(
            "Series lengths diverged {:?}, truncating to {} rows",
            lengths,
            shortest
        );

        self.timestamps.truncate(shortest);
        for (_, values) in self.values.iter_mut() {
            values.truncate(shortest);
        }

        true
    }

    /// Drop the oldest rows once the set holds more than `ceiling` rows,
    /// keeping `floor(ceiling * retention)` of the most recent ones.
    ///
    /// Returns the number of rows removed.
    pub fn trim_oldest(&mut self, ceiling: usize, retention: f64) -> usize {
        let len = self.len();
        if len <= ceiling {
            return 0;
        }

        let keep = ((ceiling as f64) * retention).floor() as usize;
        let remove = len - keep.min(len);

        self.timestamps.drain(..remove);
        for (_, values) in self.values.iter_mut() {
            let n = remove.min(values.len());
            values.drain(..n);
        }

        tracing::info!(
            "Series exceeded {} rows, trimmed {} oldest ({} kept)",
            ceiling,
            remove,
            self.len()
        );

        remove
    }

    /// Remove every row.
    pub fn clear(&mut self) {
        self.timestamps.clear();
        for (_, values) in self.values.iter_mut() {
            values.clear();
        }
    }

    /// Copy of the rows whose timestamps fall within `[start, end]`.
    pub fn slice_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SeriesSet {
        let mut out = SeriesSet::new();

        for (i, timestamp) in self.timestamps.iter().enumerate() {
            if *timestamp < start || *timestamp > end {
                continue;
            }
            out.timestamps.push(*timestamp);
            for (sensor, values) in out.values.iter_mut() {
                values.push(self.values[sensor].get(i).copied().unwrap_or(f64::NAN));
            }
        }

        out
    }

    /// Values of row `i`, or `None` if the row does not exist.
    pub fn row(&self, i: usize) -> Option<(DateTime<Utc>, SensorArray<f64>)> {
        let timestamp = *self.timestamps.get(i)?;
        let values = self
            .values
            .map(|_, series| series.get(i).copied().unwrap_or(f64::NAN));
        Some((timestamp, values))
    }
}
