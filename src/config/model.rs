// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::checkpoint::DEFAULT_CHECKPOINT_DIR;
use crate::engine::RunOptions;
use crate::monitor::{
    DEFAULT_CPU_SUSTAIN_SAMPLES, DEFAULT_SAMPLE_INTERVAL, MonitorSettings, ResourceLimits,
};
use crate::params::{ParameterSpec, WorkflowParams};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// max_workers = 2
///
/// [task.extract]
/// cmd = "./extract.sh"
/// timeout_seconds = 30
///
/// [task.extract.params.date]
/// required = true
/// type = "string"
///
/// [task.report]
/// cmd = "./report.sh"
/// after = ["extract"]
/// ```
///
/// Every section is optional except at least one task.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration. Obtain one through `ConfigFile::try_from` or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(engine: EngineSection, task: BTreeMap<String, TaskConfig>) -> Self {
        Self { engine, task }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Upper bound on concurrently running tasks.
    pub max_workers: usize,

    /// Root directory of the file checkpoint store. Relative paths are
    /// resolved against the config file's directory.
    pub checkpoint_dir: PathBuf,

    pub sample_interval_ms: u64,

    /// Consecutive over-limit CPU samples needed for a CPU breach.
    pub cpu_sustain_samples: u32,

    pub validate_params_upfront: bool,

    /// Reuse checkpoints from earlier invocations with the same parameters.
    pub resume: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_workers: 4,
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL.as_millis() as u64,
            cpu_sustain_samples: DEFAULT_CPU_SUSTAIN_SAMPLES,
            validate_params_upfront: true,
            resume: true,
        }
    }
}

impl EngineSection {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            resume: self.resume,
            validate_params_upfront: self.validate_params_upfront,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            cpu_sustain_samples: self.cpu_sustain_samples,
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// Dependency list: this task waits for every task listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub memory_limit_mb: Option<f64>,

    #[serde(default)]
    pub cpu_limit_percent: Option<f64>,

    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    /// Declared parameters from `[task.<name>.params.<param>]`.
    #[serde(default)]
    pub params: BTreeMap<String, ParameterSpec>,
}

impl TaskConfig {
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_mb: self.memory_limit_mb,
            cpu_percent: self.cpu_limit_percent,
            timeout: self
                .timeout_seconds
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }

    pub fn workflow_params(&self) -> WorkflowParams {
        self.params
            .iter()
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect()
    }
}
