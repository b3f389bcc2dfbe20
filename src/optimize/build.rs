//! Rebuilding the target between optimization steps.

use std::io;
use std::path::Path;
use std::process::Command;

/// Build failure.
#[derive(Debug)]
pub enum BuildError {
    /// The build command could not be spawned.
    Spawn(io::Error),
    /// The build ran and exited nonzero.
    Failed {
        /// Exit code, when the build was not killed by a signal.
        code: Option<i32>,
        /// Tail of the build's stderr for the report.
        stderr: String,
    },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Spawn(e) => write!(f, "failed to spawn build: {}", e),
            BuildError::Failed { code: Some(code), stderr } => {
                write!(f, "build exited with status {}: {}", code, stderr)
            }
            BuildError::Failed { code: None, stderr } => {
                write!(f, "build killed by signal: {}", stderr)
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Spawn(e) => Some(e),
            BuildError::Failed { .. } => None,
        }
    }
}

/// Capability to rebuild the target after a configuration edit.
pub trait BuildDriver {
    /// Run `cmd` in `dir` and wait for completion.
    fn build(&mut self, cmd: &str, dir: &Path) -> Result<(), BuildError>;
}

/// Driver that runs the build command through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellBuildDriver;

/// Stderr beyond this is dropped from error reports.
const STDERR_TAIL: usize = 2000;

impl BuildDriver for ShellBuildDriver {
    fn build(&mut self, cmd: &str, dir: &Path) -> Result<(), BuildError> {
        tracing::info!(cmd, dir = %dir.display(), "rebuilding target");
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd).current_dir(dir);

        // The control thread may be pinned to the test core; builds
        // inherit that mask, so widen it before exec.
        #[cfg(target_os = "linux")]
        unsafe {
            use std::os::unix::process::CommandExt;
            command.pre_exec(|| {
                let mut mask: libc::cpu_set_t = std::mem::zeroed();
                for cpu in 0..libc::CPU_SETSIZE as usize {
                    libc::CPU_SET(cpu, &mut mask);
                }
                libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mask);
                Ok(())
            });
        }

        let output = command.output().map_err(BuildError::Spawn)?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = if stderr.len() > STDERR_TAIL {
            stderr[stderr.len() - STDERR_TAIL..].to_string()
        } else {
            stderr.into_owned()
        };
        Err(BuildError::Failed {
            code: output.status.code(),
            stderr: tail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_build_is_ok() {
        let mut driver = ShellBuildDriver;
        assert!(driver.build("true", Path::new(".")).is_ok());
    }

    #[test]
    fn failing_build_reports_code_and_stderr() {
        let mut driver = ShellBuildDriver;
        let err = driver
            .build("echo broken >&2; exit 2", Path::new("."))
            .unwrap_err();
        match err {
            BuildError::Failed { code, stderr } => {
                assert_eq!(code, Some(2));
                assert!(stderr.contains("broken"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn build_runs_in_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ShellBuildDriver;
        driver.build("touch built.txt", dir.path()).unwrap();
        assert!(dir.path().join("built.txt").exists());
    }
}
