//! Run bookkeeping and summarization.
//!
//! The recorder keeps every run of a session, kept and rejected alike, so
//! the final report can show what each optimization step actually
//! measured. Summaries collapse a run to one number per metric; exports
//! produce a pure tabular view for CSV and terminal output.

use serde::Serialize;

use crate::sampling::{RunResult, TimeSeries};
use crate::sources::MetricKey;

/// Above this missing fraction a metric's summary is undefined.
const MISSING_LIMIT: f64 = 0.5;

/// Scalar summary of one metric over one run.
///
/// `Undefined` is the result for a metric with too little data to trust.
/// It is deliberately not a number: substituting zero would make a broken
/// source look like a perfect run under a lower-is-better metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Summary {
    /// Mean over the run's non-missing samples.
    Value(f64),
    /// More than half the samples were missing, or no series matched.
    Undefined,
}

impl Summary {
    /// Summarize `metric` over `run`.
    ///
    /// Each matching series is averaged over its non-missing samples, then
    /// the per-series means are averaged across sources sharing the metric
    /// name. A pooled missing fraction above one half yields `Undefined`.
    pub fn of(run: &RunResult, metric: &str) -> Summary {
        let series: Vec<&TimeSeries> = run.series_for_metric(metric).collect();
        if series.is_empty() {
            return Summary::Undefined;
        }

        let total: usize = series.iter().map(|s| s.len()).sum();
        if total == 0 {
            return Summary::Undefined;
        }
        let present: usize = series.iter().map(|s| s.values().count()).sum();
        let missing_fraction = (total - present) as f64 / total as f64;
        if missing_fraction > MISSING_LIMIT {
            return Summary::Undefined;
        }

        let means: Vec<f64> = series.iter().filter_map(|s| s.mean()).collect();
        if means.is_empty() {
            Summary::Undefined
        } else {
            Summary::Value(means.iter().sum::<f64>() / means.len() as f64)
        }
    }

    /// The scalar, if defined.
    pub fn value(&self) -> Option<f64> {
        match self {
            Summary::Value(v) => Some(*v),
            Summary::Undefined => None,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Summary::Value(v) => write!(f, "{:.3}", v),
            Summary::Undefined => write!(f, "undefined"),
        }
    }
}

/// One row of an exported run table.
#[derive(Debug, Clone, Serialize)]
pub struct TableRow {
    /// Series identity for this row.
    pub key: MetricKey,
    /// One cell per tick; `None` renders as an empty cell.
    pub cells: Vec<Option<f64>>,
}

/// Read-only tabular view of a run: metric rows by tick columns.
#[derive(Debug, Clone, Serialize)]
pub struct RunTable {
    /// Number of tick columns.
    pub tick_count: usize,
    /// Rows sorted by key.
    pub rows: Vec<TableRow>,
}

impl RunTable {
    /// Export `run` without mutating it. Rows keep the run's key order,
    /// which is already sorted.
    pub fn from_run(run: &RunResult) -> Self {
        let rows = run
            .series
            .iter()
            .map(|(key, series)| TableRow {
                key: key.clone(),
                cells: series.iter().collect(),
            })
            .collect();
        Self {
            tick_count: run.tick_count,
            rows,
        }
    }
}

/// Why a run is in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunTag {
    /// The pre-optimization reference run.
    Baseline,
    /// A step's candidate that became the new baseline.
    Kept,
    /// A step's candidate that was measured and reverted.
    Rejected,
}

/// One archived run with its provenance.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    /// Step name, or `baseline`.
    pub label: String,
    /// How the run ended up in the record.
    pub tag: RunTag,
    /// The full measurement.
    pub run: RunResult,
}

/// Session-wide archive of measurement runs.
///
/// Rejected runs are retained on purpose; a step that made things worse is
/// as informative as one that helped.
#[derive(Debug, Clone, Default)]
pub struct RunRecorder {
    runs: Vec<RecordedRun>,
}

impl RunRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive one run.
    pub fn record(&mut self, label: impl Into<String>, tag: RunTag, run: RunResult) {
        self.runs.push(RecordedRun {
            label: label.into(),
            tag,
            run,
        });
    }

    /// All archived runs, in recording order.
    pub fn runs(&self) -> &[RecordedRun] {
        &self.runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn run_with(series: Vec<(MetricKey, Vec<Option<f64>>)>, ticks: usize) -> RunResult {
        RunResult {
            started_at: SystemTime::now(),
            step: Duration::from_millis(250),
            tick_count: ticks,
            series: series
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
            exit_status: Some(0),
            valid: true,
        }
    }

    #[test]
    fn summary_averages_across_cores() {
        let run = run_with(
            vec![
                (MetricKey::per_core("cache-misses", 0), vec![Some(10.0), Some(20.0)]),
                (MetricKey::per_core("cache-misses", 1), vec![Some(30.0), Some(40.0)]),
            ],
            2,
        );
        assert_eq!(Summary::of(&run, "cache-misses"), Summary::Value(25.0));
    }

    #[test]
    fn summary_tolerates_half_missing() {
        let run = run_with(
            vec![(MetricKey::global("wall-power"), vec![Some(100.0), None, Some(200.0), None])],
            4,
        );
        assert_eq!(Summary::of(&run, "wall-power"), Summary::Value(150.0));
    }

    #[test]
    fn summary_undefined_above_half_missing() {
        let run = run_with(
            vec![(MetricKey::global("wall-power"), vec![Some(100.0), None, None, None])],
            4,
        );
        assert_eq!(Summary::of(&run, "wall-power"), Summary::Undefined);
    }

    #[test]
    fn summary_undefined_for_unknown_metric() {
        let run = run_with(vec![], 4);
        assert_eq!(Summary::of(&run, "absent"), Summary::Undefined);
    }

    #[test]
    fn summary_never_substitutes_zero() {
        let run = run_with(
            vec![(MetricKey::global("wall-power"), vec![None, None, None])],
            3,
        );
        assert_eq!(Summary::of(&run, "wall-power").value(), None);
    }

    #[test]
    fn export_preserves_missing_cells_and_order() {
        let run = run_with(
            vec![
                (MetricKey::per_core("cache-misses", 0), vec![Some(1.0), None]),
                (MetricKey::global("wall-power"), vec![Some(150.0), Some(151.0)]),
            ],
            2,
        );
        let table = RunTable::from_run(&run);
        assert_eq!(table.tick_count, 2);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells, vec![Some(1.0), None]);
    }

    #[test]
    fn recorder_retains_rejected_runs() {
        let mut recorder = RunRecorder::new();
        recorder.record("baseline", RunTag::Baseline, run_with(vec![], 0));
        recorder.record("bigger-cache", RunTag::Rejected, run_with(vec![], 0));
        assert_eq!(recorder.runs().len(), 2);
        assert_eq!(recorder.runs()[1].tag, RunTag::Rejected);
    }
}
