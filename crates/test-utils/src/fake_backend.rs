use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use anadag::errors::TaskError;
use anadag::exec::{TaskFuture, WorkerBackend};
use anadag::scheduler::DispatchedTask;

/// What the fake does when it receives a task with a given label.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Return the value immediately.
    Succeed(Value),
    /// Fail with a compute error carrying this message.
    Fail(String),
    /// Sleep, then return the value.
    Sleep(Duration, Value),
    /// Panic inside the worker.
    Panic,
}

/// A fake worker backend that:
/// - records which tasks were started, in order
/// - tracks how many run at once
/// - behaves per label as scripted (default: succeed with the label).
#[derive(Clone, Default)]
pub struct FakeBackend {
    behaviours: Arc<Mutex<HashMap<String, Behaviour>>>,
    log: Arc<Log>,
}

#[derive(Default)]
struct Log {
    started: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight count however the task ends (including abort
/// and panic).
struct InFlight(Arc<Log>);

impl InFlight {
    fn enter(log: Arc<Log>) -> Self {
        let now = log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        log.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(log)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, label: &str, behaviour: Behaviour) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(label.to_string(), behaviour);
        self
    }

    pub fn failing(self, label: &str) -> Self {
        let msg = format!("{label} failed");
        self.on(label, Behaviour::Fail(msg))
    }

    pub fn sleeping(self, label: &str, ms: u64) -> Self {
        self.on(
            label,
            Behaviour::Sleep(Duration::from_millis(ms), json!(label)),
        )
    }

    /// Labels in the order their tasks were started.
    pub fn started(&self) -> Vec<String> {
        self.log.started.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.log.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of tasks observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.log.max_in_flight.load(Ordering::SeqCst)
    }
}

impl WorkerBackend for FakeBackend {
    fn execute(&self, task: DispatchedTask) -> TaskFuture {
        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(&task.label)
            .cloned()
            .unwrap_or_else(|| Behaviour::Succeed(json!(task.label)));
        self.log.started.lock().unwrap().push(task.label.clone());
        let log = Arc::clone(&self.log);

        Box::pin(async move {
            let _guard = InFlight::enter(log);
            match behaviour {
                Behaviour::Succeed(value) => Ok(Arc::new(value)),
                Behaviour::Fail(msg) => Err(TaskError::compute(task.id, anyhow::anyhow!(msg))),
                Behaviour::Sleep(duration, value) => {
                    tokio::time::sleep(duration).await;
                    Ok(Arc::new(value))
                }
                Behaviour::Panic => panic!("scripted panic in {}", task.label),
            }
        })
    }
}
