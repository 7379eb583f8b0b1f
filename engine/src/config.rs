use crate::scheduler::Strategy;

/// Fixed worker-pool size used when the configuration does not say
/// otherwise.
pub const DEFAULT_WORKER_COUNT: usize = 16;

/// Speculative attempts per transaction before the engine falls back to
/// the serial tail.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Engine-wide knobs. Everything is plumbed explicitly; there is no
/// global configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parallel workers per block. Zero means "number of CPUs".
    pub worker_count: usize,
    /// Upper bound on speculative re-execution rounds for mispredicted
    /// transactions.
    pub max_retries: usize,
    /// Strategy used for residual rounds. Aria residuals are not
    /// re-validated optimistically, so Aria here degrades to
    /// degree-zero layering.
    pub residual_strategy: Strategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            residual_strategy: Strategy::DegreeZero,
        }
    }
}

impl EngineConfig {
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn effective_workers(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }

    pub fn effective_residual_strategy(&self) -> Strategy {
        match self.residual_strategy {
            Strategy::Aria => Strategy::DegreeZero,
            other => other,
        }
    }
}
