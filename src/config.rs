//! TOML configuration.
//!
//! The whole session is described by one file, read once at startup into
//! an immutable [`Config`]. Components borrow the snapshot; nothing
//! mutates it after validation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::optimize::{OptimizationPlan, OptimizationStep};
use crate::sources::counters::CounterEvent;

/// Configuration loading or validation failure.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(io::Error),
    /// The file is not valid TOML for this schema.
    Parse(toml::de::Error),
    /// The file parsed but the values are unusable.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "cannot parse config file: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Target application and measurement window settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Command line that launches the target.
    pub launch_cmd: String,
    /// Worker cores the target runs on; counters attach to these.
    pub cores: Vec<u32>,
    /// Core the control thread pins itself to.
    #[serde(default)]
    pub test_core: u32,
    /// Stabilization wait between launch and the measurement window.
    #[serde(default = "default_startup_secs")]
    pub startup_secs: u64,
    /// Length of the measurement window.
    #[serde(default = "default_runtime_secs")]
    pub runtime_secs: u64,
    /// Interval between sampling ticks.
    #[serde(default = "default_step_millis")]
    pub step_millis: u64,
    /// Grace period between the stop signal and the kill escalation.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_startup_secs() -> u64 {
    10
}

fn default_runtime_secs() -> u64 {
    30
}

fn default_step_millis() -> u64 {
    250
}

fn default_grace_secs() -> u64 {
    5
}

/// Hardware counter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CountersConfig {
    /// Attach performance counters to the worker cores.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Events to count on every worker core.
    #[serde(default = "default_events")]
    pub events: Vec<CounterEvent>,
}

fn default_true() -> bool {
    true
}

fn default_events() -> Vec<CounterEvent> {
    vec![
        CounterEvent::CpuCycles,
        CounterEvent::CacheReferences,
        CounterEvent::CacheMisses,
    ]
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            events: default_events(),
        }
    }
}

/// Telemetry socket settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Attach to the target's telemetry socket.
    #[serde(default)]
    pub enabled: bool,
    /// Socket path the target publishes.
    #[serde(default = "default_telemetry_socket")]
    pub socket: PathBuf,
    /// Device port queried for extended statistics.
    #[serde(default)]
    pub port: u16,
    /// Statistics to sample per tick.
    #[serde(default = "default_telemetry_metrics")]
    pub metrics: Vec<String>,
}

fn default_telemetry_socket() -> PathBuf {
    PathBuf::from("/var/run/dpdk/rte/dpdk_telemetry.v2")
}

fn default_telemetry_metrics() -> Vec<String> {
    vec!["tx_good_packets".to_string(), "rx_errors".to_string()]
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socket: default_telemetry_socket(),
            port: 0,
            metrics: default_telemetry_metrics(),
        }
    }
}

/// Wall-power reader settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PowerConfig {
    /// Sample platform power per tick.
    #[serde(default)]
    pub enabled: bool,
    /// IPMI sensor name holding the watt reading.
    #[serde(default = "default_power_sensor")]
    pub sensor: String,
}

fn default_power_sensor() -> String {
    "PS1 Input Power".to_string()
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sensor: default_power_sensor(),
        }
    }
}

/// Optimization loop settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptimizationConfig {
    /// Run the build-reconfigure-retest loop after the baseline.
    #[serde(default)]
    pub enabled: bool,
    /// Command that rebuilds the target.
    #[serde(default)]
    pub build_cmd: String,
    /// Directory the build command runs in.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    /// Build-configuration artifact the steps edit.
    #[serde(default)]
    pub artifact: PathBuf,
    /// Steps, walked in order.
    #[serde(default)]
    pub steps: Vec<OptimizationStep>,
}

fn default_build_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Immutable session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Target and window settings.
    pub app: AppConfig,
    /// Hardware counters.
    #[serde(default)]
    pub counters: CountersConfig,
    /// Telemetry socket.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Wall power.
    #[serde(default)]
    pub power: PowerConfig,
    /// Optimization loop.
    #[serde(default)]
    pub optimization: OptimizationConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.launch_cmd.trim().is_empty() {
            return Err(ConfigError::Invalid("launch_cmd is empty".to_string()));
        }
        if self.app.cores.is_empty() {
            return Err(ConfigError::Invalid("cores list is empty".to_string()));
        }
        if self.app.runtime_secs == 0 {
            return Err(ConfigError::Invalid("runtime_secs must be > 0".to_string()));
        }
        if self.app.step_millis == 0 {
            return Err(ConfigError::Invalid("step_millis must be > 0".to_string()));
        }
        if self.app.step_millis > self.app.runtime_secs * 1000 {
            return Err(ConfigError::Invalid(
                "step_millis exceeds the measurement window".to_string(),
            ));
        }
        if self.optimization.enabled {
            if self.optimization.build_cmd.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "optimization requires build_cmd".to_string(),
                ));
            }
            if self.optimization.artifact.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "optimization requires an artifact path".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Stabilization wait.
    pub fn startup(&self) -> Duration {
        Duration::from_secs(self.app.startup_secs)
    }

    /// Measurement window length.
    pub fn runtime(&self) -> Duration {
        Duration::from_secs(self.app.runtime_secs)
    }

    /// Tick interval.
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.app.step_millis)
    }

    /// Termination grace period.
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.app.grace_secs)
    }

    /// Optimization plan, when the loop is enabled.
    pub fn plan(&self) -> Option<OptimizationPlan> {
        if !self.optimization.enabled {
            return None;
        }
        Some(OptimizationPlan {
            launch_cmd: self.app.launch_cmd.clone(),
            build_cmd: self.optimization.build_cmd.clone(),
            build_dir: self.optimization.build_dir.clone(),
            artifact: self.optimization.artifact.clone(),
            steps: self.optimization.steps.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [app]
        launch_cmd = "./build/l3fwd -l 2,4"
        cores = [2, 4]
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.app.runtime_secs, 30);
        assert_eq!(config.app.step_millis, 250);
        assert!(config.counters.enabled);
        assert!(!config.telemetry.enabled);
        assert!(!config.power.enabled);
        assert!(config.plan().is_none());
    }

    #[test]
    fn step_longer_than_window_rejected() {
        let text = r#"
            [app]
            launch_cmd = "./target"
            cores = [0]
            runtime_secs = 1
            step_millis = 2000
        "#;
        assert!(matches!(
            Config::from_toml(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn zero_runtime_rejected() {
        let text = r#"
            [app]
            launch_cmd = "./target"
            cores = [0]
            runtime_secs = 0
        "#;
        assert!(matches!(
            Config::from_toml(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn empty_launch_cmd_rejected() {
        let text = r#"
            [app]
            launch_cmd = "  "
            cores = [0]
        "#;
        assert!(matches!(
            Config::from_toml(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn empty_core_list_rejected() {
        let text = r#"
            [app]
            launch_cmd = "./target"
            cores = []
        "#;
        assert!(matches!(
            Config::from_toml(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn optimization_requires_build_cmd() {
        let text = r#"
            [app]
            launch_cmd = "./target"
            cores = [0]

            [optimization]
            enabled = true
            artifact = "config/rte_config.h"
        "#;
        assert!(matches!(
            Config::from_toml(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn full_config_builds_plan() {
        let text = r#"
            [app]
            launch_cmd = "./build/l3fwd -l 2,4"
            cores = [2, 4]
            startup_secs = 5
            runtime_secs = 20
            step_millis = 500

            [counters]
            events = ["cache-misses"]

            [telemetry]
            enabled = true
            port = 1
            metrics = ["tx_good_packets"]

            [power]
            enabled = true
            sensor = "PS2 Input Power"

            [optimization]
            enabled = true
            build_cmd = "ninja -C build"
            build_dir = "/opt/dpdk"
            artifact = "/opt/dpdk/config/rte_config.h"

            [[optimization.steps]]
            name = "bigger-mempool-cache"
            metric = "cache-misses"
            direction = "lower-is-better"
            edits = [{ key = "RTE_MEMPOOL_CACHE_MAX_SIZE", value = "1024" }]
        "#;
        let config = Config::from_toml(text).unwrap();
        let plan = config.plan().unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.build_cmd, "ninja -C build");
        assert_eq!(config.step(), Duration::from_millis(500));
        assert_eq!(config.power.sensor, "PS2 Input Power");
    }

    #[test]
    fn parse_error_surfaces_as_parse() {
        assert!(matches!(
            Config::from_toml("not toml at all ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
