// src/monitor/probe.rs

//! Sources of memory/CPU readings.
//!
//! The monitor talks to a [`UsageProbe`] rather than to the OS directly so
//! tests can script readings. Production uses [`SysinfoProbe`].

use std::fmt;
use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One raw reading from a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
    pub memory_mb: f64,
    pub cpu_percent: f64,
}

/// Something that can report current memory and CPU usage.
///
/// Returning `None` means "no reading available right now"; the monitor
/// skips that tick instead of failing the task.
pub trait UsageProbe: Send + Sync + fmt::Debug {
    fn sample(&self) -> Option<ProbeReading>;
}

/// Reads resident memory and CPU usage of the current process.
///
/// Tasks run in-process, so concurrent tasks share one reading: a limit is
/// effectively a ceiling on the whole process while that task runs.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Pid,
}

impl SysinfoProbe {
    pub fn current_process() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        Some(Self {
            system: Mutex::new(System::new()),
            pid,
        })
    }
}

impl fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysinfoProbe")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl UsageProbe for SysinfoProbe {
    fn sample(&self) -> Option<ProbeReading> {
        let mut system = self.system.lock().ok()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        let process = system.process(self.pid)?;

        Some(ProbeReading {
            memory_mb: process.memory() as f64 / BYTES_PER_MB,
            // First refresh has no delta to compare against and reads 0.
            cpu_percent: f64::from(process.cpu_usage()),
        })
    }
}

/// Probe used when the platform gives us nothing to read.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProbe;

impl UsageProbe for NullProbe {
    fn sample(&self) -> Option<ProbeReading> {
        None
    }
}
