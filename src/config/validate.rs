// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, EngineSection, RawConfigFile, TaskConfig};
use crate::errors::{Result, WorkdagError};
use crate::exec::command_graph;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WorkdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let config = ConfigFile::new_unchecked(raw.engine, raw.task);
        validate_dag(&config)?;
        Ok(config)
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_engine(&cfg.engine)?;
    for (name, task) in &cfg.task {
        validate_task_dependencies(cfg, name, task)?;
        validate_limits(name, task)?;
        validate_param_specs(name, task)?;
    }
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(WorkdagError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine(engine: &EngineSection) -> Result<()> {
    if engine.max_workers == 0 {
        return Err(WorkdagError::ConfigError(
            "[engine].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if engine.sample_interval_ms == 0 {
        return Err(WorkdagError::ConfigError(
            "[engine].sample_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if engine.cpu_sustain_samples == 0 {
        return Err(WorkdagError::ConfigError(
            "[engine].cpu_sustain_samples must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile, name: &str, task: &TaskConfig) -> Result<()> {
    for dep in &task.after {
        if dep == name {
            return Err(WorkdagError::ConfigError(format!(
                "task '{name}' cannot depend on itself in `after`"
            )));
        }
        if !cfg.task.contains_key(dep) {
            return Err(WorkdagError::ConfigError(format!(
                "task '{name}' has unknown dependency '{dep}' in `after`"
            )));
        }
    }
    Ok(())
}

fn validate_limits(name: &str, task: &TaskConfig) -> Result<()> {
    let limits = [
        ("memory_limit_mb", task.memory_limit_mb),
        ("cpu_limit_percent", task.cpu_limit_percent),
        ("timeout_seconds", task.timeout_seconds),
    ];
    for (field, value) in limits {
        if let Some(v) = value {
            if !v.is_finite() || v <= 0.0 {
                return Err(WorkdagError::ConfigError(format!(
                    "task '{name}': {field} must be a positive number (got {v})"
                )));
            }
        }
    }
    if let Some(secs) = task.timeout_seconds {
        if Duration::try_from_secs_f64(secs).is_err() {
            return Err(WorkdagError::ConfigError(format!(
                "task '{name}': timeout_seconds is too large (got {secs})"
            )));
        }
    }
    Ok(())
}

fn validate_param_specs(name: &str, task: &TaskConfig) -> Result<()> {
    for (param, spec) in &task.params {
        if spec.required && spec.default.is_some() {
            return Err(WorkdagError::ConfigError(format!(
                "task '{name}': required parameter '{param}' cannot declare a default"
            )));
        }
        let (Some(expected), Some(default)) = (spec.expected_type, &spec.default) else {
            continue;
        };
        if default.value_type() != Some(expected) {
            return Err(WorkdagError::ConfigError(format!(
                "task '{name}': default for parameter '{param}' must be of type {expected}, got {}",
                default.type_name()
            )));
        }
    }
    Ok(())
}

/// Building and freezing the graph reports cycles with their full path.
fn validate_dag(cfg: &ConfigFile) -> Result<()> {
    command_graph(cfg)?.freeze()?;
    Ok(())
}
