use crate::{ExecError, NodeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Capability interface implemented by every operation the engine can run.
///
/// Implementations are registered by operation name and resolved at
/// graph-load time. The engine owns scheduling, retries and caching;
/// executors only transform files.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Operation name this executor answers to (e.g. "document-merge").
    fn operation(&self) -> &str;

    /// Run the operation. Must be safe to retry: the engine re-invokes a
    /// failed executor until the node's retry budget is exhausted, and
    /// makes no exactly-once guarantee about external side effects.
    async fn execute(&self, input: ExecutorInput) -> Result<ExecutorResult, ExecError>;
}

/// Everything an executor sees for one node invocation.
#[derive(Debug, Clone)]
pub struct ExecutorInput {
    pub node_id: NodeId,

    /// Node configuration, passed through verbatim.
    pub config: Map<String, Value>,

    /// Input files: the execution's original inputs for root nodes, the
    /// concatenated outputs of all dependencies otherwise.
    pub files: Vec<PathBuf>,

    /// Where this execution's outputs belong.
    pub output_dir: PathBuf,

    /// Per-execution scratch space, deleted at run end.
    pub scratch_dir: PathBuf,
}

impl ExecutorInput {
    /// Get required config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, ExecError> {
        self.config
            .get(name)
            .ok_or_else(|| ExecError::MissingConfig(name.to_string()))
    }

    /// Get an integer config value with a default
    pub fn config_u64(&self, name: &str, default: u64) -> u64 {
        self.config
            .get(name)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }

    /// Get a string config value
    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(Value::as_str)
    }
}

/// Result payload of one executor invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorResult {
    /// Files produced by the operation; dependents receive these as input.
    #[serde(default)]
    pub output_files: Vec<PathBuf>,

    /// Opaque structured payload (extracted text, classification, ...).
    #[serde(default)]
    pub data: Value,
}

impl ExecutorResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_files.push(path.into());
        self
    }

    pub fn with_files(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.output_files.extend(paths);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}
