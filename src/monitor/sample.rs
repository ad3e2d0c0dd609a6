// src/monitor/sample.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One periodic observation taken while a task runs. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSample {
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub wall_elapsed: Duration,
}

/// Final usage report for one task execution, emitted whatever the outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub samples: u32,
    pub peak_memory_mb: Option<f64>,
    pub peak_cpu_percent: Option<f64>,
    pub wall_time: Duration,
}

impl UsageSummary {
    pub fn observe(&mut self, sample: &UsageSample) {
        self.samples += 1;
        self.peak_memory_mb = Some(
            self.peak_memory_mb
                .map_or(sample.memory_mb, |p| p.max(sample.memory_mb)),
        );
        self.peak_cpu_percent = Some(
            self.peak_cpu_percent
                .map_or(sample.cpu_percent, |p| p.max(sample.cpu_percent)),
        );
        self.wall_time = sample.wall_elapsed;
    }
}
