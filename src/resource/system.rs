// src/resource/system.rs

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{Pid, System};
use tracing::{trace, warn};

use crate::resource::{ResourceMonitor, ResourceSnapshot};

/// Default minimum time between two OS queries.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Reads available system memory and this process' resident memory.
///
/// Queries are rate-limited; within the refresh interval the previous
/// reading is returned. While one caller is refreshing, others get the
/// last published reading instead of waiting on the OS query.
pub struct SystemMonitor {
    sampler: Mutex<Sampler>,
    last: Mutex<Option<(Instant, ResourceSnapshot)>>,
    refresh_interval: Duration,
}

struct Sampler {
    system: System,
    pid: Option<Pid>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self::with_refresh_interval(DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(refresh_interval: Duration) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = %e, "cannot determine current pid; memory readings will force backpressure");
                None
            }
        };

        Self {
            sampler: Mutex::new(Sampler {
                system: System::new(),
                pid,
            }),
            last: Mutex::new(None),
            refresh_interval,
        }
    }

    fn published(&self) -> Option<(Instant, ResourceSnapshot)> {
        *self.last.lock()
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SystemMonitor {
    fn snapshot(&self) -> ResourceSnapshot {
        let last = self.published();
        if let Some((at, snapshot)) = last {
            if at.elapsed() < self.refresh_interval {
                return snapshot;
            }
        }

        // Someone else is refreshing: their previous reading will do.
        let mut sampler = match (self.sampler.try_lock(), last) {
            (Some(sampler), _) => sampler,
            (None, Some((_, snapshot))) => return snapshot,
            (None, None) => self.sampler.lock(),
        };

        let snapshot = sampler.read();
        trace!(
            available = snapshot.available_memory_bytes,
            used = snapshot.used_memory_bytes,
            "sampled memory"
        );
        *self.last.lock() = Some((Instant::now(), snapshot));
        snapshot
    }
}

impl Sampler {
    fn read(&mut self) -> ResourceSnapshot {
        self.system.refresh_memory();
        let available = self.system.available_memory();

        let Some(pid) = self.pid else {
            return ResourceSnapshot::new(0, 0);
        };

        if !self.system.refresh_process(pid) {
            warn!(%pid, "cannot read process memory; reporting no headroom");
            return ResourceSnapshot::new(0, 0);
        }

        match self.system.process(pid) {
            Some(process) => ResourceSnapshot::new(available, process.memory()),
            None => ResourceSnapshot::new(0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_are_cached_within_refresh_interval() {
        let monitor = SystemMonitor::with_refresh_interval(Duration::from_secs(60));
        let first = monitor.snapshot();
        let second = monitor.snapshot();
        assert_eq!(first, second);
    }

    #[test]
    fn concurrent_refresh_returns_last_reading() {
        let monitor = SystemMonitor::with_refresh_interval(Duration::ZERO);
        let published = ResourceSnapshot::new(4_096, 1_024);
        *monitor.last.lock() = Some((Instant::now(), published));

        let _refreshing = monitor.sampler.lock();
        assert_eq!(monitor.snapshot(), published);
    }

    #[test]
    fn reports_process_memory() {
        let monitor = SystemMonitor::with_refresh_interval(Duration::ZERO);
        let snapshot = monitor.snapshot();
        if snapshot.available_memory_bytes > 0 {
            assert!(snapshot.used_memory_bytes > 0);
        }
    }
}
