//! Time-series storage for one measurement run.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::sources::MetricKey;

/// One ordered series of samples, one slot per tick.
///
/// `None` marks a missing reading. Missing values keep their slot so every
/// series in a run stays aligned with the tick schedule; they are never
/// substituted with zero and never compacted away.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries(Vec<Option<f64>>);

impl TimeSeries {
    /// Empty series with room for `ticks` samples.
    pub fn with_capacity(ticks: usize) -> Self {
        Self(Vec::with_capacity(ticks))
    }

    /// Append the reading for the next tick.
    pub fn push(&mut self, sample: Option<f64>) {
        self.0.push(sample);
    }

    /// Number of ticks recorded, missing slots included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no ticks have been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sample at `tick`, if in range.
    pub fn get(&self, tick: usize) -> Option<Option<f64>> {
        self.0.get(tick).copied()
    }

    /// Iterator over all slots in tick order.
    pub fn iter(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.0.iter().copied()
    }

    /// Iterator over the non-missing samples in tick order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().filter_map(|s| *s)
    }

    /// Fraction of slots that are missing. 0.0 for an empty series.
    pub fn missing_fraction(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        let missing = self.0.iter().filter(|s| s.is_none()).count();
        missing as f64 / self.0.len() as f64
    }

    /// Mean of the non-missing samples, `None` when every slot is missing.
    pub fn mean(&self) -> Option<f64> {
        let mut sum = 0.0;
        let mut n = 0usize;
        for v in self.values() {
            sum += v;
            n += 1;
        }
        if n == 0 {
            None
        } else {
            Some(sum / n as f64)
        }
    }
}

impl FromIterator<Option<f64>> for TimeSeries {
    fn from_iter<I: IntoIterator<Item = Option<f64>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Everything recorded for one measurement run.
///
/// Series are sorted by key, so iteration order is deterministic for
/// summaries and exports. `valid` is false for runs that were cancelled or
/// whose target died inside the measurement window.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Wall-clock time the measurement window opened.
    pub started_at: SystemTime,
    /// Interval between ticks.
    pub step: Duration,
    /// Ticks actually recorded. Equals the scheduled count for complete
    /// runs; smaller for cancelled ones.
    pub tick_count: usize,
    /// One series per source, sorted by key.
    pub series: Vec<(MetricKey, TimeSeries)>,
    /// Exit status of the target, once it has been reaped.
    pub exit_status: Option<i32>,
    /// False when the window did not cover the full scheduled duration.
    pub valid: bool,
}

impl RunResult {
    /// Series recorded for `key`, if any.
    pub fn series(&self, key: &MetricKey) -> Option<&TimeSeries> {
        self.series
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, s)| s)
    }

    /// Series whose metric name matches, regardless of core.
    pub fn series_for_metric<'a>(
        &'a self,
        metric: &'a str,
    ) -> impl Iterator<Item = &'a TimeSeries> {
        self.series
            .iter()
            .filter(move |(k, _)| k.metric == metric)
            .map(|(_, s)| s)
    }
}
