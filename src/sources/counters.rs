//! Hardware performance counters via the Linux perf_event subsystem.
//!
//! One [`CounterSource`] wraps one kernel counter bound to one core,
//! observing every process scheduled there. Reads return the delta since
//! the previous read, so consecutive ticks form a per-interval series.
//!
//! Opening counters may require elevated privileges (`CAP_PERFMON`, root,
//! or `kernel.perf_event_paranoid <= 0` for system-wide observation). An
//! open failure is reported to the caller, which skips the counter rather
//! than aborting the run.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{MetricKey, MetricSource, SourceError};

/// Hardware event a counter can observe.
///
/// Names follow the `perf list` vocabulary and the kebab-case spelling used
/// in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterEvent {
    /// Retired instructions.
    Instructions,
    /// CPU clock cycles.
    CpuCycles,
    /// Last-level cache references.
    CacheReferences,
    /// Last-level cache misses.
    CacheMisses,
    /// Retired branch instructions.
    BranchInstructions,
    /// Mispredicted branches.
    BranchMisses,
}

impl CounterEvent {
    /// Metric name used in series keys and report headers.
    pub fn name(self) -> &'static str {
        match self {
            CounterEvent::Instructions => "instructions",
            CounterEvent::CpuCycles => "cpu-cycles",
            CounterEvent::CacheReferences => "cache-references",
            CounterEvent::CacheMisses => "cache-misses",
            CounterEvent::BranchInstructions => "branch-instructions",
            CounterEvent::BranchMisses => "branch-misses",
        }
    }
}

impl fmt::Display for CounterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-core hardware counter source.
///
/// The kernel counter is cumulative; [`MetricSource::read`] converts it to
/// per-interval deltas by remembering the previous raw value.
#[cfg(target_os = "linux")]
pub struct CounterSource {
    counter: ::perf_event2::Counter,
    key: MetricKey,
    last: u64,
}

#[cfg(target_os = "linux")]
impl CounterSource {
    /// Open a counter for `event` on `core`, observing all processes
    /// scheduled on that core.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] when the kernel rejects the
    /// event or the process lacks the privileges for system-wide counting.
    pub fn open(core: u32, event: CounterEvent) -> Result<Self, SourceError> {
        use ::perf_event2::events::Hardware;
        use ::perf_event2::Builder;

        let hw = match event {
            CounterEvent::Instructions => Hardware::INSTRUCTIONS,
            CounterEvent::CpuCycles => Hardware::CPU_CYCLES,
            CounterEvent::CacheReferences => Hardware::CACHE_REFERENCES,
            CounterEvent::CacheMisses => Hardware::CACHE_MISSES,
            CounterEvent::BranchInstructions => Hardware::BRANCH_INSTRUCTIONS,
            CounterEvent::BranchMisses => Hardware::BRANCH_MISSES,
        };

        let mut counter = Builder::new(hw)
            .any_pid()
            .one_cpu(core as usize)
            .build()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    SourceError::Unavailable(format!(
                        "perf_event for {} on core {} requires CAP_PERFMON or root",
                        event, core
                    ))
                } else {
                    SourceError::Unavailable(format!(
                        "perf_event for {} on core {} failed: {}",
                        event, core, e
                    ))
                }
            })?;

        counter.enable()?;
        let last = counter.read()?;

        Ok(Self {
            counter,
            key: MetricKey::per_core(event.name(), core),
            last,
        })
    }
}

#[cfg(target_os = "linux")]
impl MetricSource for CounterSource {
    fn key(&self) -> &MetricKey {
        &self.key
    }

    fn read(&mut self) -> Result<f64, SourceError> {
        let raw = self.counter.read()?;
        let delta = raw.saturating_sub(self.last);
        self.last = raw;
        Ok(delta as f64)
    }
}

#[cfg(target_os = "linux")]
impl fmt::Debug for CounterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterSource")
            .field("key", &self.key)
            .finish()
    }
}

/// Stub counter source for non-Linux platforms. Opening always fails.
#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
pub struct CounterSource {
    key: MetricKey,
}

#[cfg(not(target_os = "linux"))]
impl CounterSource {
    /// Hardware counters are only available on Linux.
    pub fn open(_core: u32, _event: CounterEvent) -> Result<Self, SourceError> {
        Err(SourceError::Unavailable(
            "hardware counters require Linux perf_event".to_string(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl MetricSource for CounterSource {
    fn key(&self) -> &MetricKey {
        &self.key
    }

    fn read(&mut self) -> Result<f64, SourceError> {
        Err(SourceError::Unavailable(
            "hardware counters require Linux perf_event".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_perf_vocabulary() {
        assert_eq!(CounterEvent::CacheMisses.name(), "cache-misses");
        assert_eq!(CounterEvent::CpuCycles.to_string(), "cpu-cycles");
    }

    #[test]
    fn event_parses_from_kebab_case() {
        let event: CounterEvent = serde_json::from_str("\"branch-misses\"").unwrap();
        assert_eq!(event, CounterEvent::BranchMisses);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn open_reports_unavailable_without_privileges() {
        match CounterSource::open(0, CounterEvent::CpuCycles) {
            Ok(mut src) => {
                assert_eq!(src.key(), &MetricKey::per_core("cpu-cycles", 0));
                assert!(src.read().is_ok());
            }
            Err(SourceError::Unavailable(_)) | Err(SourceError::Io(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    #[cfg(not(target_os = "linux"))]
    fn open_fails_off_linux() {
        assert!(matches!(
            CounterSource::open(0, CounterEvent::CpuCycles),
            Err(SourceError::Unavailable(_))
        ));
    }
}
