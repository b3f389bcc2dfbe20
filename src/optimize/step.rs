//! Optimization steps and build-configuration edits.
//!
//! A step is one hypothesis: rewrite some `#define` lines of the target's
//! build configuration, rebuild, rerun, and judge one metric against the
//! current baseline. Edits are applied in place; the artifact's original
//! bytes are snapshotted beforehand so a revert restores them exactly,
//! trailing bytes and line endings included.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which way the step's metric should move to count as an improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Smaller is better, e.g. cache misses or wall power.
    LowerIsBetter,
    /// Larger is better, e.g. forwarded packets.
    HigherIsBetter,
}

impl Direction {
    /// Strict improvement test. Ties are not improvements.
    pub fn improves(self, candidate: f64, baseline: f64) -> bool {
        match self {
            Direction::LowerIsBetter => candidate < baseline,
            Direction::HigherIsBetter => candidate > baseline,
        }
    }
}

/// One `#define` rewrite in the build-configuration artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEdit {
    /// Macro name, e.g. `RTE_MBUF_DEFAULT_MEMPOOL_OPS`.
    pub key: String,
    /// Replacement value, written verbatim after the name.
    pub value: String,
}

/// Failure to apply a configuration edit.
#[derive(Debug)]
pub enum EditError {
    /// Reading or writing the artifact failed.
    Io(io::Error),
    /// The artifact defines no macro with the edit's name.
    KeyAbsent(String),
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditError::Io(e) => write!(f, "artifact I/O failed: {}", e),
            EditError::KeyAbsent(key) => write!(f, "artifact does not define {}", key),
        }
    }
}

impl std::error::Error for EditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EditError::Io(e) => Some(e),
            EditError::KeyAbsent(_) => None,
        }
    }
}

impl From<io::Error> for EditError {
    fn from(e: io::Error) -> Self {
        EditError::Io(e)
    }
}

impl ConfigEdit {
    /// Rewrite every `#define <key> ...` line of `artifact` to carry this
    /// edit's value. Idempotent: applying twice leaves the same bytes.
    ///
    /// # Errors
    ///
    /// [`EditError::KeyAbsent`] when no line defines the key; the file is
    /// left untouched in that case.
    pub fn apply(&self, artifact: &Path) -> Result<(), EditError> {
        let text = fs::read_to_string(artifact)?;
        let mut hit = false;
        let mut out = String::with_capacity(text.len());

        for line in text.split_inclusive('\n') {
            if self.defines_key(line) {
                hit = true;
                let newline = if line.ends_with('\n') { "\n" } else { "" };
                out.push_str(&format!("#define {} {}{}", self.key, self.value, newline));
            } else {
                out.push_str(line);
            }
        }

        if !hit {
            return Err(EditError::KeyAbsent(self.key.clone()));
        }
        fs::write(artifact, out)?;
        Ok(())
    }

    fn defines_key(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix("#define") else {
            return false;
        };
        let mut words = rest.split_whitespace();
        words.next() == Some(self.key.as_str())
    }
}

/// Byte-exact copy of the artifact before a step touches it.
#[derive(Debug, Clone)]
pub struct ArtifactSnapshot {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl ArtifactSnapshot {
    /// Capture the artifact's current bytes.
    pub fn take(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let bytes = fs::read(&path)?;
        Ok(Self { path, bytes })
    }

    /// Write the captured bytes back, byte for byte.
    pub fn restore(&self) -> io::Result<()> {
        fs::write(&self.path, &self.bytes)
    }

    /// The captured bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One entry of the optimization plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationStep {
    /// Human-readable step name, used in reports and run labels.
    pub name: String,
    /// Edits applied together before the rebuild.
    pub edits: Vec<ConfigEdit>,
    /// Metric the step is judged on.
    pub metric: String,
    /// Improvement direction for that metric.
    pub direction: Direction,
    /// Disabled steps are skipped without touching the artifact.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn artifact(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const RTE_CONFIG: &str = "\
#define RTE_MAX_LCORE 128
#define RTE_MBUF_DEFAULT_MEMPOOL_OPS \"ring_mp_mc\"
#define RTE_MEMPOOL_CACHE_MAX_SIZE 512
";

    #[test]
    fn apply_rewrites_only_named_define() {
        let file = artifact(RTE_CONFIG);
        let edit = ConfigEdit {
            key: "RTE_MEMPOOL_CACHE_MAX_SIZE".to_string(),
            value: "1024".to_string(),
        };
        edit.apply(file.path()).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("#define RTE_MEMPOOL_CACHE_MAX_SIZE 1024\n"));
        assert!(text.contains("#define RTE_MAX_LCORE 128\n"));
    }

    #[test]
    fn apply_is_idempotent() {
        let file = artifact(RTE_CONFIG);
        let edit = ConfigEdit {
            key: "RTE_MBUF_DEFAULT_MEMPOOL_OPS".to_string(),
            value: "\"stack\"".to_string(),
        };
        edit.apply(file.path()).unwrap();
        let once = fs::read(file.path()).unwrap();
        edit.apply(file.path()).unwrap();
        let twice = fs::read(file.path()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn apply_does_not_match_prefixed_keys() {
        let file = artifact("#define RTE_MAX_LCORE_FREQ 9\n#define RTE_MAX_LCORE 128\n");
        let edit = ConfigEdit {
            key: "RTE_MAX_LCORE".to_string(),
            value: "64".to_string(),
        };
        edit.apply(file.path()).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("#define RTE_MAX_LCORE_FREQ 9\n"));
        assert!(text.contains("#define RTE_MAX_LCORE 64\n"));
    }

    #[test]
    fn absent_key_leaves_artifact_untouched() {
        let file = artifact(RTE_CONFIG);
        let edit = ConfigEdit {
            key: "RTE_ABSENT".to_string(),
            value: "1".to_string(),
        };
        assert!(matches!(
            edit.apply(file.path()),
            Err(EditError::KeyAbsent(_))
        ));
        assert_eq!(fs::read_to_string(file.path()).unwrap(), RTE_CONFIG);
    }

    #[test]
    fn snapshot_restore_is_byte_exact() {
        let original = "#define RTE_MAX_LCORE 128\nno trailing newline";
        let file = artifact(original);
        let snapshot = ArtifactSnapshot::take(file.path()).unwrap();

        let edit = ConfigEdit {
            key: "RTE_MAX_LCORE".to_string(),
            value: "64".to_string(),
        };
        edit.apply(file.path()).unwrap();
        assert_ne!(fs::read(file.path()).unwrap(), original.as_bytes());

        snapshot.restore().unwrap();
        assert_eq!(fs::read(file.path()).unwrap(), original.as_bytes());
    }

    #[test]
    fn direction_ties_are_not_improvements() {
        assert!(!Direction::LowerIsBetter.improves(5.0, 5.0));
        assert!(!Direction::HigherIsBetter.improves(5.0, 5.0));
        assert!(Direction::LowerIsBetter.improves(4.9, 5.0));
        assert!(Direction::HigherIsBetter.improves(5.1, 5.0));
    }

    #[test]
    fn step_enabled_defaults_to_true() {
        let step: OptimizationStep = toml::from_str(
            r#"
            name = "bigger-mempool-cache"
            metric = "cache-misses"
            direction = "lower-is-better"
            edits = [{ key = "RTE_MEMPOOL_CACHE_MAX_SIZE", value = "1024" }]
            "#,
        )
        .unwrap();
        assert!(step.enabled);
    }
}
