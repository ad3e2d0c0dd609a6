#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use workdag::config::{ConfigFile, EngineSection, RawConfigFile, TaskConfig};
use workdag::dag::{DependencyGraph, TaskBody, TaskNode};
use workdag::params::ParameterSpec;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                engine: EngineSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.engine.max_workers = n;
        self
    }

    pub fn checkpoint_dir(mut self, dir: &Path) -> Self {
        self.config.engine.checkpoint_dir = dir.to_path_buf();
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                memory_limit_mb: None,
                cpu_limit_percent: None,
                timeout_seconds: None,
                params: BTreeMap::new(),
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn timeout_seconds(mut self, secs: f64) -> Self {
        self.task.timeout_seconds = Some(secs);
        self
    }

    pub fn memory_limit_mb(mut self, mb: f64) -> Self {
        self.task.memory_limit_mb = Some(mb);
        self
    }

    pub fn param(mut self, name: &str, spec: ParameterSpec) -> Self {
        self.task.params.insert(name.to_string(), spec);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Register `edges` (task, dependencies) on a fresh graph, giving every
/// task the body produced by `body`.
pub fn graph_of<F>(edges: &[(&str, &[&str])], mut body: F) -> DependencyGraph
where
    F: FnMut(&str) -> TaskBody,
{
    let mut graph = DependencyGraph::new();
    for (name, deps) in edges {
        graph
            .register(TaskNode::new(*name, body(name)).depends_on(deps.iter().copied()))
            .expect("test graph registration failed");
    }
    graph
}
