//! Resource monitoring: how many agents may run at once right now.
//!
//! The coordinator enforces whatever cap it is given; the monitor is asked
//! once per dispatch and the answer is not renegotiated mid-dispatch.

use std::num::NonZeroUsize;

/// Source of the per-dispatch concurrency cap.
pub trait ResourceMonitor: Send + Sync {
    /// Number of agent executions allowed in flight. Always at least 1.
    fn max_parallel_agents(&self) -> usize;
}

/// Caps parallelism at the machine's available parallelism and a configured ceiling.
#[derive(Debug, Clone, Copy)]
pub struct SystemResourceMonitor {
    ceiling: usize,
}

impl SystemResourceMonitor {
    /// Creates a monitor that never reports more than `ceiling`.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
        }
    }

    fn available_cores() -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

impl Default for SystemResourceMonitor {
    fn default() -> Self {
        Self::new(4)
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn max_parallel_agents(&self) -> usize {
        let cores = Self::available_cores();
        let cap = cores.min(self.ceiling).max(1);
        tracing::debug!(cores, ceiling = self.ceiling, cap, "computed agent concurrency cap");
        cap
    }
}

/// Monitor that always reports the same cap.
#[derive(Debug, Clone, Copy)]
pub struct FixedResourceMonitor(pub usize);

impl ResourceMonitor for FixedResourceMonitor {
    fn max_parallel_agents(&self) -> usize {
        self.0.max(1)
    }
}
