use crate::cache::ResultCache;
use crate::context::ExecutionContext;
use crate::optimizer;
use crate::pool::WorkerPool;
use crate::registry::ExecutorRegistry;
use crate::scheduler::Scheduler;
use doccore::{
    Edge, EngineError, EventBus, ExecutionEvent, ExecutionId, ExecutionMetrics, ExecutorResult,
    NodeId, WorkflowNode,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Main engine for executing document workflows.
///
/// An injectable instance, not ambient state: every engine owns its own
/// event bus, cache, worker pool and active-execution table, so several
/// engines can coexist in one process.
pub struct WorkflowEngine {
    registry: Arc<ExecutorRegistry>,
    cache: Arc<ResultCache>,
    pool: Arc<WorkerPool>,
    events: EventBus,
    active: Arc<RwLock<HashMap<ExecutionId, ActiveExecution>>>,
    config: EngineConfig,
}

struct ActiveExecution {
    workflow_id: String,
    metrics: Arc<Mutex<ExecutionMetrics>>,
}

impl WorkflowEngine {
    /// Create a new engine with default settings and an empty registry.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new engine with custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(ExecutorRegistry::new()), config)
    }

    /// Create a new engine with a pre-configured registry.
    pub fn with_registry(registry: Arc<ExecutorRegistry>, config: EngineConfig) -> Self {
        let pool = Arc::new(WorkerPool::new(config.worker_pool_size));
        let events = EventBus::new(config.event_buffer_size);

        Self {
            registry,
            cache: Arc::new(ResultCache::new()),
            pool,
            events,
            active: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Access to the executor registry.
    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    /// Execute a workflow graph against the given input files.
    ///
    /// Validates the graph and registry before any node starts; the
    /// execution context is torn down on every exit path.
    pub async fn execute_workflow(
        &self,
        workflow_id: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        edges: Vec<Edge>,
        input_files: Vec<PathBuf>,
        run: RunConfig,
    ) -> Result<ExecutionReport, EngineError> {
        let workflow_id = workflow_id.into();
        let plan = optimizer::plan(&nodes, &edges)?;
        self.registry.validate(&nodes)?;

        let execution_id = Uuid::new_v4();
        let parallelism = run
            .parallelism
            .or(self.config.default_parallelism)
            .unwrap_or_else(|| default_parallelism(plan.len()));
        let node_timeout = run.node_timeout.unwrap_or(self.config.node_timeout);

        let mut ctx = ExecutionContext::create(
            execution_id,
            workflow_id.clone(),
            input_files,
            &self.config.output_root,
            run.params,
            plan.len(),
        )
        .await?;

        self.active.write().await.insert(
            execution_id,
            ActiveExecution {
                workflow_id: workflow_id.clone(),
                metrics: Arc::clone(&ctx.metrics),
            },
        );

        let scheduler = Scheduler::new(
            plan,
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            Arc::clone(&self.pool),
            self.events.clone(),
            parallelism,
            node_timeout,
        );
        let result = scheduler.run(&mut ctx).await;

        // Teardown runs before the outcome is surfaced, success or failure.
        self.active.write().await.remove(&execution_id);
        ctx.teardown().await;

        let output_files = result?;
        Ok(ExecutionReport {
            execution_id,
            workflow_id,
            metrics: ctx.metrics_snapshot(),
            output_files,
            node_results: ctx.results,
        })
    }

    /// Metrics snapshot for a live execution. Returns `None` once the run
    /// has ended and its context is gone.
    pub async fn get_execution_metrics(
        &self,
        execution_id: ExecutionId,
    ) -> Option<ExecutionMetrics> {
        let active = self.active.read().await;
        active
            .get(&execution_id)
            .map(|a| a.metrics.lock().unwrap().clone())
    }

    /// Workflow id of a live execution, if any.
    pub async fn active_workflow(&self, execution_id: ExecutionId) -> Option<String> {
        let active = self.active.read().await;
        active.get(&execution_id).map(|a| a.workflow_id.clone())
    }

    /// Engine-wide counters.
    pub async fn performance_stats(&self) -> PerformanceStats {
        PerformanceStats {
            cache_size: self.cache.len(),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            active_executions: self.active.read().await.len(),
            worker_pool_size: self.pool.size(),
        }
    }

    /// Subscribe to execution events.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// The engine's event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Default parallelism bound for a run: `min(4, ceil(total / 3))`, at
/// least 1.
fn default_parallelism(total_nodes: usize) -> usize {
    total_nodes.div_ceil(3).clamp(1, 4)
}

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// OS worker threads for parallelizable operations.
    pub worker_pool_size: usize,

    /// Fixed parallelism bound for every run; `None` derives it from the
    /// graph size.
    pub default_parallelism: Option<usize>,

    /// Per-node execution timeout.
    pub node_timeout: Duration,

    pub event_buffer_size: usize,

    /// Root under which per-execution output directories are created.
    pub output_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            worker_pool_size: cpus.min(4),
            default_parallelism: None,
            node_timeout: Duration::from_secs(300),
            event_buffer_size: 1024,
            output_root: std::env::temp_dir().join("docflow"),
        }
    }
}

/// Per-run overrides and parameters.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub parallelism: Option<usize>,
    pub node_timeout: Option<Duration>,

    /// Opaque values merged into the execution context.
    pub params: Map<String, Value>,
}

/// Final snapshot returned to the caller of `execute_workflow`.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub metrics: ExecutionMetrics,
    pub output_files: Vec<PathBuf>,
    pub node_results: HashMap<NodeId, ExecutorResult>,
}

/// Engine-wide counters exposed for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceStats {
    pub cache_size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub active_executions: usize,
    pub worker_pool_size: usize,
}
