//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

impl PinningStrategy {
    /// Picks the core for worker `id` out of the detected `cores`.
    ///
    /// Workers wrap around when there are more workers than eligible cores.
    pub fn core_for(self, id: usize, cores: &[core_affinity::CoreId]) -> Option<core_affinity::CoreId> {
        if cores.is_empty() {
            return None;
        }
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(cores[id % cores.len()]),
            PinningStrategy::AvoidSMT => {
                let physical = cores.len().div_ceil(2);
                Some(cores[(id % physical) * 2])
            }
        }
    }
}

/// Configuration for a [`SchedulerHandle`](crate::SchedulerHandle).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Core pinning applied to each background worker. Default: none.
    pub pinning: PinningStrategy,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name: String,
    /// Number of events pre-reserved in each worker's TimeLine. Default: 64K.
    pub events_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pinning: PinningStrategy::None,
            thread_name: "forkpool-worker".to_string(),
            events_capacity: 64 * 1024,
        }
    }
}
