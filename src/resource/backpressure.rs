// src/resource/backpressure.rs

use crate::errors::ResourceExhaustionError;
use crate::resource::ResourceSnapshot;

/// Memory admission policy.
///
/// `headroom = min(available, ceiling - in_use) - margin` with
/// `margin = safety_margin * ceiling`. A ceiling of `u64::MAX` means
/// "unlimited"; the margin is then taken from `in_use + available`.
/// Zero available memory always counts as pressure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backpressure {
    ceiling: u64,
    safety_margin: f64,
}

pub const DEFAULT_SAFETY_MARGIN: f64 = 0.10;

impl Backpressure {
    pub fn new(ceiling: u64, safety_margin: f64) -> Self {
        Self {
            ceiling,
            safety_margin: safety_margin.clamp(0.0, 1.0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX, DEFAULT_SAFETY_MARGIN)
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    fn effective_ceiling(&self, snapshot: &ResourceSnapshot) -> u64 {
        if self.ceiling == u64::MAX {
            snapshot
                .used_memory_bytes
                .saturating_add(snapshot.available_memory_bytes)
        } else {
            self.ceiling
        }
    }

    /// Bytes that may still be committed to new tasks, or the pressure
    /// report when the margin is already eaten into.
    pub fn headroom(
        &self,
        snapshot: &ResourceSnapshot,
    ) -> Result<u64, ResourceExhaustionError> {
        let ceiling = self.effective_ceiling(snapshot);
        let margin = (ceiling as f64 * self.safety_margin) as u64;
        let in_use = snapshot.used_memory_bytes;
        let available = snapshot.available_memory_bytes;

        let usable = i128::from(available).min(i128::from(ceiling) - i128::from(in_use));
        let headroom = usable - i128::from(margin);

        // Zero available memory is how monitors report a failed reading.
        if headroom < 0 || available == 0 {
            return Err(ResourceExhaustionError {
                available,
                in_use,
                ceiling,
                margin,
            });
        }
        Ok(u64::try_from(headroom).unwrap_or(u64::MAX))
    }
}

impl Default for Backpressure {
    fn default() -> Self {
        Self::unlimited()
    }
}
