use crate::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Node '{node_id}' failed: {source}")]
    NodeFailed {
        node_id: NodeId,
        #[source]
        source: ExecError,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors detected before any node runs. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
}

/// Errors from a single executor invocation. Retried until the node's
/// retry budget is exhausted, then escalated to `EngineError::NodeFailed`.
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    #[error("Missing config: {0}")]
    MissingConfig(String),

    #[error("Invalid config for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Execution failed: {0}")]
    Failed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(err.to_string())
    }
}
