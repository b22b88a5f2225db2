use doccore::{ConfigError, Executor, WorkflowNode};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of executor capabilities, keyed by operation name.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its operation name.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let operation = executor.operation().to_string();
        tracing::info!("Registering executor: {}", operation);
        self.executors.insert(operation, executor);
    }

    /// Look up the executor for an operation.
    pub fn resolve(&self, operation: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(operation).cloned()
    }

    /// Resolve every operation a node list references, failing with the
    /// first unknown name. Runs at graph-load time so a bad workflow is
    /// rejected before any node starts.
    pub fn validate(&self, nodes: &[WorkflowNode]) -> Result<(), ConfigError> {
        for node in nodes {
            if !self.executors.contains_key(node.operation.as_str()) {
                return Err(ConfigError::UnknownOperation(node.operation.clone()));
            }
        }
        Ok(())
    }

    /// All registered operation names.
    pub fn operations(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
