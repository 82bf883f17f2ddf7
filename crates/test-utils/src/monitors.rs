use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anadag::graph::NodeStatus;
use anadag::progress::{ProgressEvent, ProgressReporter};
use anadag::resource::{ResourceMonitor, ResourceSnapshot};

/// Memory monitor returning scripted readings.
///
/// Readings queued with [`then`](Self::then) are returned in order; after
/// that the current reading (settable with [`set`](Self::set)) repeats.
pub struct ScriptedMonitor {
    queued: Mutex<VecDeque<(u64, u64)>>,
    current: Mutex<(u64, u64)>,
    readings: AtomicUsize,
}

impl ScriptedMonitor {
    pub fn new(available: u64, used: u64) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            current: Mutex::new((available, used)),
            readings: AtomicUsize::new(0),
        }
    }

    pub fn then(self, available: u64, used: u64) -> Self {
        self.queued.lock().unwrap().push_back((available, used));
        self
    }

    pub fn set(&self, available: u64, used: u64) {
        *self.current.lock().unwrap() = (available, used);
    }

    /// How many snapshots were taken.
    pub fn readings(&self) -> usize {
        self.readings.load(Ordering::SeqCst)
    }
}

impl ResourceMonitor for ScriptedMonitor {
    fn snapshot(&self) -> ResourceSnapshot {
        self.readings.fetch_add(1, Ordering::SeqCst);
        let (available, used) = match self.queued.lock().unwrap().pop_front() {
            Some(reading) => reading,
            None => *self.current.lock().unwrap(),
        };
        ResourceSnapshot::new(available, used)
    }
}

/// Progress reporter that keeps every event.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
    started_with: Mutex<Option<usize>>,
    finished: AtomicUsize,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(label, status)` pairs in arrival order.
    pub fn sequence(&self) -> Vec<(String, NodeStatus)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.label.clone(), e.status))
            .collect()
    }

    pub fn statuses_of(&self, label: &str) -> Vec<NodeStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.label == label)
            .map(|e| e.status)
            .collect()
    }

    pub fn started_with(&self) -> Option<usize> {
        *self.started_with.lock().unwrap()
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst) > 0
    }
}

impl ProgressReporter for RecordingReporter {
    fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_run_started(&self, total: usize) {
        *self.started_with.lock().unwrap() = Some(total);
    }

    fn on_run_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}
