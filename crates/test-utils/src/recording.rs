use std::sync::{Arc, Mutex};
use std::time::Duration;

use workdag::dag::TaskBody;
use workdag::types::Value;

#[derive(Debug, Default)]
struct Log {
    started: Vec<String>,
    finished: Vec<String>,
    running: usize,
    max_running: usize,
}

/// Hands out task bodies that log when they start and finish, and tracks
/// how many were running at once.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Log>>,
}

/// Decrements the running count even when the body is aborted.
struct Running {
    log: Arc<Mutex<Log>>,
    task: String,
    finished: bool,
}

impl Drop for Running {
    fn drop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.running -= 1;
        if self.finished {
            log.finished.push(self.task.clone());
        }
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, task: &str) -> Running {
        let mut log = self.log.lock().unwrap();
        log.started.push(task.to_string());
        log.running += 1;
        log.max_running = log.max_running.max(log.running);
        Running {
            log: Arc::clone(&self.log),
            task: task.to_string(),
            finished: false,
        }
    }

    /// Sleeps for `delay`, then returns the task's own name.
    pub fn echo(&self, delay: Duration) -> TaskBody {
        let recorder = self.clone();
        TaskBody::future(move |ctx| {
            let recorder = recorder.clone();
            async move {
                let mut guard = recorder.enter(ctx.name());
                tokio::time::sleep(delay).await;
                guard.finished = true;
                Ok(Value::from(ctx.name()))
            }
        })
    }

    /// Sleeps for `delay`, then returns `value`.
    pub fn returning(&self, delay: Duration, value: Value) -> TaskBody {
        let recorder = self.clone();
        TaskBody::future(move |ctx| {
            let recorder = recorder.clone();
            let value = value.clone();
            async move {
                let mut guard = recorder.enter(ctx.name());
                tokio::time::sleep(delay).await;
                guard.finished = true;
                Ok(value)
            }
        })
    }

    /// Always fails with `message`.
    pub fn failing(&self, message: &str) -> TaskBody {
        let recorder = self.clone();
        let message = message.to_string();
        TaskBody::future(move |ctx| {
            let recorder = recorder.clone();
            let message = message.clone();
            async move {
                let mut guard = recorder.enter(ctx.name());
                guard.finished = true;
                Err(anyhow::anyhow!(message))
            }
        })
    }

    /// Tasks whose body started, in start order.
    pub fn started(&self) -> Vec<String> {
        self.log.lock().unwrap().started.clone()
    }

    /// Tasks whose body ran to completion, in completion order.
    pub fn finished(&self) -> Vec<String> {
        self.log.lock().unwrap().finished.clone()
    }

    pub fn runs_of(&self, task: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .started
            .iter()
            .filter(|t| *t == task)
            .count()
    }

    /// Highest number of bodies observed running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.log.lock().unwrap().max_running
    }
}
