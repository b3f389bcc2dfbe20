//! Tick-synchronized sampling loop.
//!
//! The sampler divides the measurement window into `floor(duration / step)`
//! ticks and sleeps until each tick's absolute offset from the window
//! start. Scheduling against absolute deadlines keeps late ticks from
//! accumulating drift: a tick that starts late shortens only its own slack,
//! never the schedule of the ticks after it.
//!
//! Within a tick all sources are read concurrently on scoped threads and
//! joined before the tick completes. A failed or panicked read records a
//! missing slot for that source; the run carries on.

use std::time::{Duration, Instant, SystemTime};

use super::series::{RunResult, TimeSeries};
use super::CancelFlag;
use crate::sources::MetricSource;

/// Fatal sampling failure. Everything else a tick can encounter is
/// recorded as missing data instead.
#[derive(Debug)]
pub enum SamplingError {
    /// Tick deadline arithmetic failed (overflow or a zero step).
    Clock(String),
}

impl std::fmt::Display for SamplingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingError::Clock(msg) => write!(f, "sampling clock failure: {}", msg),
        }
    }
}

impl std::error::Error for SamplingError {}

/// Fixed-interval sampler for one measurement window.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    duration: Duration,
    step: Duration,
}

impl Sampler {
    /// Sampler covering `duration` with one tick every `step`.
    pub fn new(duration: Duration, step: Duration) -> Self {
        Self { duration, step }
    }

    /// Number of ticks the window schedules.
    pub fn tick_count(&self) -> Result<usize, SamplingError> {
        let step = self.step.as_nanos();
        if step == 0 {
            return Err(SamplingError::Clock("step duration is zero".to_string()));
        }
        usize::try_from(self.duration.as_nanos() / step)
            .map_err(|_| SamplingError::Clock("tick count exceeds addressable range".to_string()))
    }

    /// Run the window to completion, reading every source once per tick.
    ///
    /// Returns a [`RunResult`] with one series per source, each exactly
    /// `tick_count` entries long. When `cancel` is raised between ticks the
    /// run stops early and the result is marked invalid.
    ///
    /// # Errors
    ///
    /// Only [`SamplingError::Clock`]; per-source read failures become
    /// missing slots, never errors.
    pub fn run(
        &self,
        sources: &mut [Box<dyn MetricSource>],
        cancel: &CancelFlag,
    ) -> Result<RunResult, SamplingError> {
        let tick_count = self.tick_count()?;
        let keys: Vec<_> = sources.iter().map(|s| s.key().clone()).collect();
        let mut columns: Vec<TimeSeries> = keys
            .iter()
            .map(|_| TimeSeries::with_capacity(tick_count))
            .collect();

        tracing::info!(
            ticks = tick_count,
            step_ms = self.step.as_millis() as u64,
            sources = sources.len(),
            "sampling window opened"
        );

        let started_at = SystemTime::now();
        let start = Instant::now();
        let mut completed = 0usize;
        let mut cancelled = false;

        for tick in 0..tick_count {
            if cancel.is_cancelled() {
                tracing::warn!(tick, "sampling cancelled");
                cancelled = true;
                break;
            }

            let deadline = self.deadline(tick)?;
            let elapsed = start.elapsed();
            if deadline > elapsed {
                std::thread::sleep(deadline - elapsed);
            }

            let readings = read_all(sources);
            for (column, reading) in columns.iter_mut().zip(readings) {
                column.push(reading);
            }
            completed += 1;
        }

        let mut series: Vec<_> = keys.into_iter().zip(columns).collect();
        series.sort_by(|(a, _), (b, _)| a.cmp(b));

        Ok(RunResult {
            started_at,
            step: self.step,
            tick_count: completed,
            series,
            exit_status: None,
            valid: !cancelled,
        })
    }

    /// Absolute offset of `tick`'s deadline from the window start.
    fn deadline(&self, tick: usize) -> Result<Duration, SamplingError> {
        let ordinal = u32::try_from(tick + 1)
            .map_err(|_| SamplingError::Clock("tick ordinal exceeds u32".to_string()))?;
        self.step
            .checked_mul(ordinal)
            .ok_or_else(|| SamplingError::Clock("tick deadline overflowed".to_string()))
    }
}

/// Read every source once, concurrently. A source whose read fails or
/// panics contributes a missing slot for this tick.
fn read_all(sources: &mut [Box<dyn MetricSource>]) -> Vec<Option<f64>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = sources
            .iter_mut()
            .map(|source| {
                scope.spawn(move || match source.read() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::debug!(key = %source.key(), "read failed: {}", e);
                        None
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(None))
            .collect()
    })
}
