// src/engine/stats.rs

//! Wall-time statistics for executed task bodies.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::info;

use crate::types::TaskName;

/// Aggregated timings of one task name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    pub count: u32,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TaskTiming {
    fn new(elapsed: Duration) -> Self {
        Self {
            count: 1,
            total: elapsed,
            min: elapsed,
            max: elapsed,
        }
    }

    fn add(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    tasks: BTreeMap<TaskName, TaskTiming>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, task: &str, elapsed: Duration) {
        match self.tasks.get_mut(task) {
            Some(timing) => timing.add(elapsed),
            None => {
                self.tasks.insert(task.to_string(), TaskTiming::new(elapsed));
            }
        }
    }

    pub fn get(&self, task: &str) -> Option<&TaskTiming> {
        self.tasks.get(task)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskTiming)> {
        self.tasks.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Timing across every recorded execution.
    pub fn overall(&self) -> Option<TaskTiming> {
        self.tasks.values().copied().reduce(|mut acc, t| {
            acc.count += t.count;
            acc.total += t.total;
            acc.min = acc.min.min(t.min);
            acc.max = acc.max.max(t.max);
            acc
        })
    }

    pub fn log_summary(&self) {
        for (task, timing) in self.iter() {
            info!(
                task = %task,
                count = timing.count,
                total = %format_duration(timing.total),
                avg = %format_duration(timing.average()),
                min = %format_duration(timing.min),
                max = %format_duration(timing.max),
                "task timing"
            );
        }
        if let Some(overall) = self.overall() {
            info!(
                executions = overall.count,
                total = %format_duration(overall.total),
                avg = %format_duration(overall.average()),
                "execution time"
            );
        }
    }
}

/// Compact human form: `1h 2m 3s`, `4m 0s`, `12s`, `250ms`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.subsec_millis());
    }

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}
