// src/resource/mod.rs

//! Memory sampling and the backpressure policy built on it.
//!
//! - [`ResourceMonitor`] hands out immutable [`ResourceSnapshot`]s.
//! - [`SystemMonitor`] reads them from the OS through `sysinfo`.
//! - [`Backpressure`] turns a snapshot into dispatch headroom.

pub mod backpressure;
pub mod system;

use std::time::SystemTime;

use serde::Serialize;

pub use backpressure::Backpressure;
pub use system::SystemMonitor;

/// One memory reading. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    /// Memory the system can still hand out.
    pub available_memory_bytes: u64,
    /// Resident memory of this process.
    pub used_memory_bytes: u64,
    pub timestamp: SystemTime,
}

impl ResourceSnapshot {
    pub fn new(available_memory_bytes: u64, used_memory_bytes: u64) -> Self {
        Self {
            available_memory_bytes,
            used_memory_bytes,
            timestamp: SystemTime::now(),
        }
    }
}

/// Source of memory readings.
///
/// Implementations must not fail: when a reading is impossible they report
/// zero available memory, which forces backpressure.
pub trait ResourceMonitor: Send + Sync {
    fn snapshot(&self) -> ResourceSnapshot;
}

/// Monitor that always reports the same reading.
#[derive(Debug, Clone, Copy)]
pub struct StaticMonitor {
    available: u64,
    used: u64,
}

impl StaticMonitor {
    pub fn new(available_memory_bytes: u64, used_memory_bytes: u64) -> Self {
        Self {
            available: available_memory_bytes,
            used: used_memory_bytes,
        }
    }

    /// Plenty of memory, nothing in use.
    pub fn unlimited() -> Self {
        Self::new(u64::MAX, 0)
    }
}

impl ResourceMonitor for StaticMonitor {
    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot::new(self.available, self.used)
    }
}
