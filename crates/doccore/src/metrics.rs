use serde::{Deserialize, Serialize};

/// Counters and timings scoped to one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,

    /// Completions observed while other nodes were still running.
    pub concurrent_completions: u64,

    pub total_time_ms: u64,
    pub peak_memory_bytes: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl ExecutionMetrics {
    pub fn new(total_nodes: usize) -> Self {
        Self {
            total_nodes,
            ..Self::default()
        }
    }

    /// Aggregate progress as a percentage of completed nodes.
    pub fn progress(&self) -> f64 {
        if self.total_nodes == 0 {
            return 100.0;
        }
        self.completed_nodes as f64 / self.total_nodes as f64 * 100.0
    }
}
