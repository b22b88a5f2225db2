use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type NodeId = String;

/// One processing step in a workflow graph.
///
/// Dependency sets, parallelizability and priority are computed by the
/// graph optimizer at load time, not supplied here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,

    /// Operation name resolved against the executor registry.
    pub operation: String,

    #[serde(default)]
    pub kind: NodeKind,

    /// Opaque configuration passed verbatim to the executor.
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Per-node override of the retry budget (default 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<NodeId>, operation: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operation: operation.into(),
            kind: NodeKind::default(),
            config: Map::new(),
            max_retries: None,
        }
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Documents the intent of a node. Does not affect scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Input,
    #[default]
    Process,
    Output,
    Condition,
    Parallel,
    Merge,
}

/// Directed dependency: `target` depends on `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Run status of a node. Owned and mutated only by the scheduler that
/// runs the node; observers see published event snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
    Skipped,
}
