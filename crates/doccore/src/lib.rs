//! Core abstractions for the docflow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on. It carries no scheduling machinery of its own.

mod error;
mod events;
mod executor;
mod metrics;
mod node;

pub use error::{ConfigError, EngineError, ExecError};
pub use events::{EventBus, ExecutionEvent, ExecutionId};
pub use executor::{Executor, ExecutorInput, ExecutorResult};
pub use metrics::ExecutionMetrics;
pub use node::{Edge, NodeId, NodeKind, NodeStatus, WorkflowNode};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
