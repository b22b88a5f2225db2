use doccore::{EngineError, ExecutionId, ExecutionMetrics, ExecutorResult, NodeId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Owned state of one `execute_workflow` call.
///
/// Created at call entry and torn down unconditionally when the run
/// ends, success or failure. Only the scheduler that owns the context
/// mutates it; everything observers see is a published snapshot.
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub input_files: Vec<PathBuf>,

    /// Per-execution output directory, created at run start.
    pub output_dir: PathBuf,

    /// Scratch space for intermediate files, deleted at run end.
    pub scratch_dir: PathBuf,

    /// Opaque per-run parameters from the caller.
    pub params: Map<String, Value>,

    /// Node results, append-only while the run is live.
    pub results: HashMap<NodeId, ExecutorResult>,

    /// Shared with the engine's active-execution table so metrics can be
    /// queried while the run is live.
    pub metrics: Arc<Mutex<ExecutionMetrics>>,
}

impl ExecutionContext {
    pub(crate) async fn create(
        execution_id: ExecutionId,
        workflow_id: String,
        input_files: Vec<PathBuf>,
        output_root: &Path,
        params: Map<String, Value>,
        total_nodes: usize,
    ) -> Result<Self, EngineError> {
        let output_dir = output_root.join(execution_id.to_string());
        let scratch_dir = output_dir.join(".scratch");
        tokio::fs::create_dir_all(&scratch_dir).await?;

        Ok(Self {
            execution_id,
            workflow_id,
            input_files,
            output_dir,
            scratch_dir,
            params,
            results: HashMap::new(),
            metrics: Arc::new(Mutex::new(ExecutionMetrics::new(total_nodes))),
        })
    }

    /// Snapshot of the metrics record.
    pub fn metrics_snapshot(&self) -> ExecutionMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Final listing of the execution's output directory.
    pub(crate) async fn list_outputs(&self) -> Result<Vec<PathBuf>, EngineError> {
        let mut outputs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                outputs.push(entry.path());
            }
        }
        outputs.sort();
        Ok(outputs)
    }

    /// Delete the per-run scratch space. A failed cleanup is logged, not
    /// propagated, so it cannot mask the run's own outcome.
    pub(crate) async fn teardown(&self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.scratch_dir).await {
            tracing::debug!(
                "Scratch cleanup failed for {}: {}",
                self.execution_id,
                err
            );
        }
    }
}
