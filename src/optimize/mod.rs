//! Iterative build-reconfigure-retest optimization.
//!
//! The loop measures a baseline, then walks the configured steps in order.
//! Each step edits the build-configuration artifact, rebuilds, reruns the
//! target, and keeps the edit only when its metric strictly improves on
//! the current baseline. Anything else, a tie included, reverts the
//! artifact to its pre-step bytes and rebuilds before the next step.
//!
//! The artifact on disk always matches the last kept configuration at
//! every step boundary, so cancellation and fatal errors need no extra
//! cleanup beyond the per-step revert.

mod build;
mod step;

pub use build::{BuildDriver, BuildError, ShellBuildDriver};
pub use step::{ArtifactSnapshot, ConfigEdit, Direction, EditError, OptimizationStep};

use std::io;
use std::path::PathBuf;

use crate::recorder::{RunRecorder, RunTag, Summary};
use crate::sampling::{CancelFlag, RunResult, Sampler, SamplingError};
use crate::sources::MetricSource;
use crate::target::{ProcessLauncher, RunError, TargetController};

/// Everything the loop needs to know about the target's build.
#[derive(Debug, Clone)]
pub struct OptimizationPlan {
    /// Command line that launches the target.
    pub launch_cmd: String,
    /// Command line that rebuilds the target.
    pub build_cmd: String,
    /// Directory the build command runs in.
    pub build_dir: PathBuf,
    /// Build-configuration artifact the steps edit.
    pub artifact: PathBuf,
    /// Steps, walked in order.
    pub steps: Vec<OptimizationStep>,
}

/// Fatal loop failure. Per-step trouble is downgraded to a
/// [`StepDecision::NotApplicable`] report instead.
#[derive(Debug)]
pub enum OptimizeError {
    /// The baseline run could not be executed.
    Baseline(RunError),
    /// The baseline run did not cover its full window.
    BaselineInvalid,
    /// The artifact could not be snapshotted or restored.
    Artifact(io::Error),
    /// The sampling clock failed during a step run.
    Fatal(SamplingError),
    /// Rebuilding the restored configuration failed; the on-disk binary
    /// no longer matches the last kept configuration.
    RestoreBuild(BuildError),
}

impl std::fmt::Display for OptimizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizeError::Baseline(e) => write!(f, "baseline run failed: {}", e),
            OptimizeError::BaselineInvalid => {
                write!(f, "baseline run did not complete its window")
            }
            OptimizeError::Artifact(e) => write!(f, "artifact snapshot failed: {}", e),
            OptimizeError::Fatal(e) => write!(f, "{}", e),
            OptimizeError::RestoreBuild(e) => {
                write!(f, "rebuild of restored configuration failed: {}", e)
            }
        }
    }
}

impl std::error::Error for OptimizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OptimizeError::Baseline(e) => Some(e),
            OptimizeError::BaselineInvalid => None,
            OptimizeError::Artifact(e) => Some(e),
            OptimizeError::Fatal(e) => Some(e),
            OptimizeError::RestoreBuild(e) => Some(e),
        }
    }
}

/// What the loop decided about one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    /// The edit improved its metric and became the new baseline.
    Kept,
    /// The edit was measured and did not improve; artifact restored.
    Reverted,
    /// The step could not be evaluated (edit, build, or launch failure,
    /// or an incomplete run); artifact restored.
    NotApplicable,
}

impl std::fmt::Display for StepDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepDecision::Kept => f.write_str("kept"),
            StepDecision::Reverted => f.write_str("reverted"),
            StepDecision::NotApplicable => f.write_str("not applicable"),
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Step name from the plan.
    pub name: String,
    /// Keep, revert, or not applicable.
    pub decision: StepDecision,
    /// The baseline summary the candidate was judged against.
    pub baseline: Summary,
    /// The candidate's summary, when a measurement happened.
    pub candidate: Option<Summary>,
    /// The candidate's full run, when a measurement happened.
    pub run: Option<RunResult>,
}

/// Outcome of the whole loop.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    /// One report per enabled step that was reached.
    pub reports: Vec<StepReport>,
    /// Every run of the session, baseline and rejected candidates
    /// included.
    pub recorder: RunRecorder,
}

impl OptimizationOutcome {
    /// Number of steps that were kept.
    pub fn kept_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.decision == StepDecision::Kept)
            .count()
    }
}

/// Drives the baseline-then-steps state machine.
pub struct OptimizationLoop<'a, L: ProcessLauncher, B: BuildDriver> {
    controller: &'a TargetController<L>,
    builder: &'a mut B,
    sampler: Sampler,
    cancel: CancelFlag,
}

impl<'a, L: ProcessLauncher, B: BuildDriver> OptimizationLoop<'a, L, B> {
    /// New loop over an existing controller and build driver.
    pub fn new(
        controller: &'a TargetController<L>,
        builder: &'a mut B,
        sampler: Sampler,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            controller,
            builder,
            sampler,
            cancel,
        }
    }

    /// Run the baseline and every enabled step.
    ///
    /// `sources` is invoked once per run, after the target has stabilized,
    /// so socket-attached sources connect to the live target.
    ///
    /// # Errors
    ///
    /// See [`OptimizeError`]. Per-step build and launch failures are not
    /// errors; they surface as [`StepDecision::NotApplicable`] reports.
    pub fn run(
        &mut self,
        plan: &OptimizationPlan,
        sources: &mut dyn FnMut() -> Vec<Box<dyn MetricSource>>,
    ) -> Result<OptimizationOutcome, OptimizeError> {
        let mut recorder = RunRecorder::new();
        let mut reports = Vec::new();

        tracing::info!(steps = plan.steps.len(), "optimization loop started");

        let baseline_run = self
            .measure(&plan.launch_cmd, sources)
            .map_err(OptimizeError::Baseline)?;
        if !baseline_run.valid {
            return Err(OptimizeError::BaselineInvalid);
        }
        recorder.record("baseline", RunTag::Baseline, baseline_run.clone());
        let mut best_run = baseline_run;

        for step in plan.steps.iter().filter(|s| s.enabled) {
            if self.cancel.is_cancelled() {
                tracing::warn!("optimization cancelled between steps");
                break;
            }

            let baseline = Summary::of(&best_run, &step.metric);
            tracing::info!(step = %step.name, %baseline, "evaluating step");

            let snapshot =
                ArtifactSnapshot::take(&plan.artifact).map_err(OptimizeError::Artifact)?;

            if let Err(e) = self.apply_edits(step, plan, &snapshot)? {
                tracing::warn!(step = %step.name, "edits not applicable: {}", e);
                reports.push(StepReport {
                    name: step.name.clone(),
                    decision: StepDecision::NotApplicable,
                    baseline,
                    candidate: None,
                    run: None,
                });
                continue;
            }

            if let Err(e) = self.builder.build(&plan.build_cmd, &plan.build_dir) {
                tracing::warn!(step = %step.name, "build failed: {}", e);
                self.restore(&snapshot, plan)?;
                reports.push(StepReport {
                    name: step.name.clone(),
                    decision: StepDecision::NotApplicable,
                    baseline,
                    candidate: None,
                    run: None,
                });
                continue;
            }

            let run = match self.measure(&plan.launch_cmd, sources) {
                Ok(run) => run,
                Err(RunError::Sampling(e)) => {
                    self.restore(&snapshot, plan)?;
                    return Err(OptimizeError::Fatal(e));
                }
                Err(RunError::TargetLaunch(e)) => {
                    tracing::warn!(step = %step.name, "candidate failed to launch: {}", e);
                    self.restore(&snapshot, plan)?;
                    reports.push(StepReport {
                        name: step.name.clone(),
                        decision: StepDecision::NotApplicable,
                        baseline,
                        candidate: None,
                        run: None,
                    });
                    continue;
                }
            };

            if !run.valid {
                tracing::warn!(step = %step.name, "candidate run incomplete");
                self.restore(&snapshot, plan)?;
                recorder.record(step.name.clone(), RunTag::Rejected, run.clone());
                reports.push(StepReport {
                    name: step.name.clone(),
                    decision: StepDecision::NotApplicable,
                    baseline,
                    candidate: None,
                    run: Some(run),
                });
                continue;
            }

            let candidate = Summary::of(&run, &step.metric);
            let keep = match (candidate.value(), baseline.value()) {
                (Some(c), Some(b)) => step.direction.improves(c, b),
                _ => false,
            };

            if keep {
                tracing::info!(step = %step.name, %baseline, %candidate, "kept");
                recorder.record(step.name.clone(), RunTag::Kept, run.clone());
                best_run = run.clone();
                reports.push(StepReport {
                    name: step.name.clone(),
                    decision: StepDecision::Kept,
                    baseline,
                    candidate: Some(candidate),
                    run: Some(run),
                });
            } else {
                tracing::info!(step = %step.name, %baseline, %candidate, "reverted");
                self.restore(&snapshot, plan)?;
                recorder.record(step.name.clone(), RunTag::Rejected, run.clone());
                reports.push(StepReport {
                    name: step.name.clone(),
                    decision: StepDecision::Reverted,
                    baseline,
                    candidate: Some(candidate),
                    run: Some(run),
                });
            }
        }

        Ok(OptimizationOutcome { reports, recorder })
    }

    fn measure(
        &self,
        cmd: &str,
        sources: &mut dyn FnMut() -> Vec<Box<dyn MetricSource>>,
    ) -> Result<RunResult, RunError> {
        let sampler = self.sampler;
        let cancel = self.cancel.clone();
        self.controller.execute_run(cmd, move || {
            let mut set = sources();
            sampler.run(&mut set, &cancel)
        })
    }

    /// Apply all of a step's edits. An inapplicable edit restores the
    /// snapshot and is reported in the inner `Result`; I/O trouble while
    /// restoring is fatal.
    fn apply_edits(
        &mut self,
        step: &OptimizationStep,
        plan: &OptimizationPlan,
        snapshot: &ArtifactSnapshot,
    ) -> Result<Result<(), EditError>, OptimizeError> {
        for edit in &step.edits {
            if let Err(e) = edit.apply(&plan.artifact) {
                snapshot.restore().map_err(OptimizeError::Artifact)?;
                return Ok(Err(e));
            }
        }
        Ok(Ok(()))
    }

    /// Restore the pre-step artifact and rebuild so the on-disk binary
    /// matches the last kept configuration again.
    fn restore(
        &mut self,
        snapshot: &ArtifactSnapshot,
        plan: &OptimizationPlan,
    ) -> Result<(), OptimizeError> {
        snapshot.restore().map_err(OptimizeError::Artifact)?;
        self.builder
            .build(&plan.build_cmd, &plan.build_dir)
            .map_err(OptimizeError::RestoreBuild)?;
        Ok(())
    }
}
