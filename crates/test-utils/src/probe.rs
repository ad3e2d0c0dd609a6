use std::sync::Mutex;

use workdag::monitor::{ProbeReading, UsageProbe};

/// Replays a fixed list of readings, then repeats the last one forever.
#[derive(Debug)]
pub struct ScriptedProbe {
    readings: Mutex<Vec<ProbeReading>>,
}

impl ScriptedProbe {
    /// `(memory_mb, cpu_percent)` pairs, in sampling order.
    pub fn new(readings: &[(f64, f64)]) -> Self {
        Self {
            readings: Mutex::new(
                readings
                    .iter()
                    .map(|&(memory_mb, cpu_percent)| ProbeReading {
                        memory_mb,
                        cpu_percent,
                    })
                    .collect(),
            ),
        }
    }

    /// The same reading on every sample.
    pub fn constant(memory_mb: f64, cpu_percent: f64) -> Self {
        Self::new(&[(memory_mb, cpu_percent)])
    }
}

impl UsageProbe for ScriptedProbe {
    fn sample(&self) -> Option<ProbeReading> {
        let mut readings = self.readings.lock().unwrap();
        if readings.len() > 1 {
            Some(readings.remove(0))
        } else {
            readings.first().copied()
        }
    }
}
