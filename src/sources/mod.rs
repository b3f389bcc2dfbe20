//! Metric sources: uniform access to instantaneous measurements.
//!
//! Every backend that can produce one named reading per sampling tick
//! implements [`MetricSource`]. The sampling engine treats all sources
//! identically; which backends are active is decided by configuration,
//! not by the engine.
//!
//! Three backends are provided:
//! - [`counters::CounterSource`]: hardware performance counters per core,
//!   via the kernel perf_event subsystem (Linux only).
//! - [`telemetry::TelemetrySource`]: one extended statistic from the target
//!   application's telemetry socket.
//! - [`power::PowerSource`]: platform wall-power via the IPMI sensor
//!   repository.
//!
//! A failed read is recoverable by contract: the caller records a missing
//! value for that tick and keeps sampling. Sources must never block
//! unboundedly; socket-backed sources carry read timeouts.

pub mod counters;
pub mod power;
pub mod telemetry;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Identity of one time series: a metric name plus the source it was
/// observed on (a core id for per-core sources, `None` for machine-wide
/// sources such as wall power or socket telemetry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    /// Metric name, e.g. `cache-misses` or `tx_good_packets`.
    pub metric: String,
    /// Core the reading is attributed to, if the source is per-core.
    pub core: Option<u32>,
}

impl MetricKey {
    /// Key for a machine-wide metric.
    pub fn global(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            core: None,
        }
    }

    /// Key for a per-core metric.
    pub fn per_core(metric: impl Into<String>, core: u32) -> Self {
        Self {
            metric: metric.into(),
            core: Some(core),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core {
            Some(core) => write!(f, "{}@core{}", self.metric, core),
            None => write!(f, "{}", self.metric),
        }
    }
}

/// Error produced by a single metric-source read.
///
/// These are recoverable: the sampling engine records the tick as missing
/// and continues. A source that fails every read yields an all-missing
/// series, never an aborted run.
#[derive(Debug)]
pub enum SourceError {
    /// Underlying I/O failed (socket, counter fd, subprocess).
    Io(std::io::Error),
    /// The peer replied with something the protocol does not allow.
    Protocol(String),
    /// The reply was well-formed but the requested value was absent or
    /// not numeric.
    Parse(String),
    /// The backend is not available on this platform or configuration.
    Unavailable(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Io(e) => write!(f, "I/O error: {}", e),
            SourceError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            SourceError::Parse(msg) => write!(f, "parse error: {}", msg),
            SourceError::Unavailable(msg) => write!(f, "source unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e)
    }
}

/// Capability to take one instantaneous reading of a named metric.
///
/// Object-safe so heterogeneous backends can live in one sampling set.
/// `Send` because the sampling engine fans per-tick reads out across
/// scoped threads.
pub trait MetricSource: Send {
    /// Identity of the series this source produces.
    fn key(&self) -> &MetricKey;

    /// Take one reading.
    ///
    /// Counter-backed sources return the delta since the previous read, so
    /// consecutive readings form a per-interval series.
    fn read(&mut self) -> Result<f64, SourceError>;
}

/// Build the active source set for one measurement run.
///
/// Construction failures are logged and skipped rather than propagated: a
/// backend that cannot be opened (missing permissions, dead socket) reduces
/// the source set the same way a per-tick read failure reduces one series.
/// Telemetry sources connect to the target's socket, so this must be called
/// after the target has been launched and stabilized.
pub fn from_config(config: &Config) -> Vec<Box<dyn MetricSource>> {
    let mut sources: Vec<Box<dyn MetricSource>> = Vec::new();

    if config.counters.enabled {
        for &core in &config.app.cores {
            for event in &config.counters.events {
                match counters::CounterSource::open(core, *event) {
                    Ok(src) => sources.push(Box::new(src)),
                    Err(e) => {
                        tracing::warn!("skipping counter {} on core {}: {}", event, core, e)
                    }
                }
            }
        }
    }

    if config.telemetry.enabled {
        for metric in &config.telemetry.metrics {
            match telemetry::TelemetrySource::connect(
                &config.telemetry.socket,
                config.telemetry.port,
                metric.as_str(),
            ) {
                Ok(src) => sources.push(Box::new(src)),
                Err(e) => tracing::warn!("skipping telemetry metric {}: {}", metric, e),
            }
        }
    }

    if config.power.enabled {
        sources.push(Box::new(power::PowerSource::new(
            config.power.sensor.as_str(),
        )));
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_key_display() {
        assert_eq!(MetricKey::global("power").to_string(), "power");
        assert_eq!(
            MetricKey::per_core("cache-misses", 3).to_string(),
            "cache-misses@core3"
        );
    }

    #[test]
    fn metric_key_ordering_groups_by_name() {
        let mut keys = vec![
            MetricKey::per_core("l2", 1),
            MetricKey::global("bw"),
            MetricKey::per_core("l2", 0),
        ];
        keys.sort();
        assert_eq!(keys[0], MetricKey::global("bw"));
        assert_eq!(keys[1], MetricKey::per_core("l2", 0));
        assert_eq!(keys[2], MetricKey::per_core("l2", 1));
    }
}
