use crate::{ExecutionMetrics, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle events published during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    ProgressUpdate {
        execution_id: ExecutionId,
        progress: f64,
        completed_nodes: usize,
        total_nodes: usize,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        execution_time_ms: u64,
        memory_delta_bytes: i64,
        timestamp: DateTime<Utc>,
    },
    NodeError {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        workflow_id: String,
        metrics: ExecutionMetrics,
        output_files: Vec<PathBuf>,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        execution_id: ExecutionId,
        workflow_id: String,
        error: String,
        metrics: ExecutionMetrics,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for execution events.
///
/// Each engine instance owns its own bus, so independent engines can
/// coexist in one process without shared global state.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Lagging or absent subscribers are not an error.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}
