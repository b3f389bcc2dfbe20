//! # pktprobe
//!
//! Out-of-band benchmarking and optimization of packet-processing
//! applications.
//!
//! pktprobe coordinates the lifecycle of a target application with a
//! fixed-rate telemetry sampling engine: it launches the target, waits a
//! configured stabilization period, collects per-core/per-metric time series
//! from a set of metric sources, and tears the target down. On top of that
//! protocol sits an optimization loop that mutates a build-time
//! configuration parameter, rebuilds and reruns the target, and keeps or
//! reverts the change based on a quantitative comparison against the
//! last known-good baseline.
//!
//! The target application is never modified: all measurement happens through
//! external observation points (hardware performance counters, the target's
//! telemetry socket, and platform power sensors).
//!
//! ## Quick Start
//!
//! ```ignore
//! use pktprobe::optimize::{OptimizationLoop, ShellBuildDriver};
//! use pktprobe::sampling::{CancelFlag, Sampler};
//! use pktprobe::target::{ShellLauncher, TargetController};
//! use pktprobe::Config;
//!
//! let config = Config::load("pktprobe.toml")?;
//! let plan = config.plan().expect("optimization enabled");
//! let cancel = CancelFlag::new();
//!
//! let controller = TargetController::new(ShellLauncher, config.startup(), config.grace());
//! let sampler = Sampler::new(config.runtime(), config.step());
//! let mut builder = ShellBuildDriver;
//!
//! let outcome = OptimizationLoop::new(&controller, &mut builder, sampler, cancel)
//!     .run(&plan, &mut || pktprobe::sources::from_config(&config))?;
//!
//! for report in &outcome.reports {
//!     println!("{}: {}", report.name, report.decision);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod affinity;
pub mod config;
pub mod optimize;
pub mod recorder;
pub mod report;
pub mod sampling;
pub mod sources;
pub mod target;

pub use config::Config;
pub use optimize::{OptimizationLoop, OptimizationOutcome, StepDecision, StepReport};
pub use recorder::{RunRecorder, RunTable, Summary};
pub use sampling::{CancelFlag, RunResult, Sampler, SamplingError, TimeSeries};
pub use sources::{MetricKey, MetricSource, SourceError};
pub use target::{ProcessLauncher, RunError, TargetController};
