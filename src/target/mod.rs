//! Target application lifecycle.
//!
//! The target is an external packet-processing binary launched out-of-band
//! for each measurement run. The controller owns its lifecycle: launch,
//! stabilization wait, liveness check, sampling, graceful termination with
//! bounded escalation. The process is never left running on any exit path;
//! the handle lives in a kill-on-drop guard for the whole window.
//!
//! Launching is behind [`ProcessLauncher`] so that runs can be driven with
//! fake processes in tests. The production [`ShellLauncher`] spawns through
//! `sh -c` in a fresh process group and signals the whole group, so
//! targets that fork workers are torn down with their children.

use std::io;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::sampling::{RunResult, SamplingError};

/// Poll interval while waiting out the termination grace period.
const REAP_POLL: Duration = Duration::from_millis(50);

/// Failure to launch or control the target process.
#[derive(Debug)]
pub enum TargetError {
    /// The launch command could not be spawned.
    Spawn(io::Error),
    /// The target exited during the stabilization wait.
    DiedDuringWarmup(Option<i32>),
    /// Signalling or reaping the process group failed.
    Control(io::Error),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::Spawn(e) => write!(f, "failed to launch target: {}", e),
            TargetError::DiedDuringWarmup(Some(code)) => {
                write!(f, "target exited with status {} during warm-up", code)
            }
            TargetError::DiedDuringWarmup(None) => {
                write!(f, "target exited during warm-up")
            }
            TargetError::Control(e) => write!(f, "failed to control target: {}", e),
        }
    }
}

impl std::error::Error for TargetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TargetError::Spawn(e) | TargetError::Control(e) => Some(e),
            TargetError::DiedDuringWarmup(_) => None,
        }
    }
}

/// Failure of one measurement run.
#[derive(Debug)]
pub enum RunError {
    /// The target could not be launched or died before the window opened.
    TargetLaunch(TargetError),
    /// The sampling clock failed. Fatal for the whole session.
    Sampling(SamplingError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::TargetLaunch(e) => write!(f, "target launch failure: {}", e),
            RunError::Sampling(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::TargetLaunch(e) => Some(e),
            RunError::Sampling(e) => Some(e),
        }
    }
}

impl From<SamplingError> for RunError {
    fn from(e: SamplingError) -> Self {
        RunError::Sampling(e)
    }
}

/// Running target process under the controller's management.
pub trait ProcessHandle {
    /// Check for exit without blocking. `Some` carries the exit code once
    /// the process has been reaped.
    fn poll(&mut self) -> Result<Option<i32>, TargetError>;

    /// Ask the process to stop, wait up to `grace`, then force-kill.
    /// Returns the exit code when one is observable.
    fn terminate(&mut self, grace: Duration) -> Result<Option<i32>, TargetError>;
}

/// Capability to start a target process from its launch command.
pub trait ProcessLauncher {
    /// Handle type for processes this launcher starts.
    type Handle: ProcessHandle;

    /// Start the target.
    fn launch(&self, cmd: &str) -> Result<Self::Handle, TargetError>;
}

/// Launcher that runs the command line through `sh -c` in a new process
/// group.
#[derive(Debug, Clone, Default)]
pub struct ShellLauncher;

/// Handle over a shell-spawned target and its process group.
#[derive(Debug)]
pub struct ShellHandle {
    child: Child,
    reaped: Option<i32>,
}

impl ShellHandle {
    fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|s| 128 + s))
    }

    fn signal_group(&self, signal: libc::c_int) -> Result<(), TargetError> {
        let pgid = self.child.id() as libc::pid_t;
        // The child is its own group leader, so its pid names the group.
        let rc = unsafe { libc::killpg(pgid, signal) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            // ESRCH means the group is already gone, which is the goal.
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(TargetError::Control(err));
        }
        Ok(())
    }
}

impl ProcessLauncher for ShellLauncher {
    type Handle = ShellHandle;

    fn launch(&self, cmd: &str) -> Result<ShellHandle, TargetError> {
        use std::os::unix::process::CommandExt;

        tracing::info!(cmd, "launching target");
        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .process_group(0)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(TargetError::Spawn)?;
        Ok(ShellHandle {
            child,
            reaped: None,
        })
    }
}

impl ProcessHandle for ShellHandle {
    fn poll(&mut self) -> Result<Option<i32>, TargetError> {
        if self.reaped.is_some() {
            return Ok(self.reaped);
        }
        match self.child.try_wait().map_err(TargetError::Control)? {
            Some(status) => {
                self.reaped = Self::exit_code(status);
                Ok(self.reaped)
            }
            None => Ok(None),
        }
    }

    fn terminate(&mut self, grace: Duration) -> Result<Option<i32>, TargetError> {
        if self.poll()?.is_some() {
            return Ok(self.reaped);
        }

        tracing::debug!(pid = self.child.id(), "sending SIGTERM to target group");
        self.signal_group(libc::SIGTERM)?;

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.poll()?.is_some() {
                return Ok(self.reaped);
            }
            std::thread::sleep(REAP_POLL);
        }

        tracing::warn!(pid = self.child.id(), "grace expired, escalating to SIGKILL");
        self.signal_group(libc::SIGKILL)?;
        let status = self.child.wait().map_err(TargetError::Control)?;
        self.reaped = Self::exit_code(status);
        Ok(self.reaped)
    }
}

/// Owns a launched handle and guarantees termination on every exit path.
struct KillGuard<H: ProcessHandle> {
    handle: Option<H>,
    grace: Duration,
}

impl<H: ProcessHandle> KillGuard<H> {
    fn new(handle: H, grace: Duration) -> Self {
        Self {
            handle: Some(handle),
            grace,
        }
    }

    fn handle_mut(&mut self) -> &mut H {
        self.handle.as_mut().unwrap()
    }

    /// Take the handle back, disarming the guard.
    fn disarm(mut self) -> H {
        self.handle.take().unwrap()
    }
}

impl<H: ProcessHandle> Drop for KillGuard<H> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.terminate(self.grace) {
                tracing::error!("failed to terminate target on unwind: {}", e);
            }
        }
    }
}

/// Drives one full measurement run around a live target.
#[derive(Debug)]
pub struct TargetController<L: ProcessLauncher> {
    launcher: L,
    stabilize: Duration,
    grace: Duration,
}

impl<L: ProcessLauncher> TargetController<L> {
    /// Controller that waits `stabilize` after launch and allows `grace`
    /// between the stop signal and the kill escalation.
    pub fn new(launcher: L, stabilize: Duration, grace: Duration) -> Self {
        Self {
            launcher,
            stabilize,
            grace,
        }
    }

    /// Launch the target, let it stabilize, run `sample` while it is live,
    /// then terminate it and record the exit status.
    ///
    /// The sampling closure runs only after the stabilization wait, so
    /// sources that attach to the live target (telemetry sockets) can be
    /// constructed inside it.
    ///
    /// # Errors
    ///
    /// [`RunError::TargetLaunch`] when the target cannot start or dies
    /// during warm-up; [`RunError::Sampling`] when the sampling clock
    /// fails. In both cases the target has already been torn down.
    pub fn execute_run<F>(&self, cmd: &str, sample: F) -> Result<RunResult, RunError>
    where
        F: FnOnce() -> Result<RunResult, SamplingError>,
    {
        let handle = self
            .launcher
            .launch(cmd)
            .map_err(RunError::TargetLaunch)?;
        let mut guard = KillGuard::new(handle, self.grace);

        std::thread::sleep(self.stabilize);
        if let Some(code) = guard
            .handle_mut()
            .poll()
            .map_err(RunError::TargetLaunch)?
        {
            return Err(RunError::TargetLaunch(TargetError::DiedDuringWarmup(Some(
                code,
            ))));
        }

        let mut run = sample()?;

        // The guard stays armed through the final poll and terminate; if
        // either fails, its drop re-attempts termination before the error
        // propagates.
        match guard.handle_mut().poll().map_err(RunError::TargetLaunch)? {
            Some(code) => {
                // Exited inside the window: the tail of every series
                // sampled a dead target.
                tracing::warn!(code, "target exited during the measurement window");
                run.exit_status = Some(code);
                run.valid = false;
            }
            None => {
                run.exit_status = guard
                    .handle_mut()
                    .terminate(self.grace)
                    .map_err(RunError::TargetLaunch)?;
            }
        }
        guard.disarm();

        Ok(run)
    }
}
