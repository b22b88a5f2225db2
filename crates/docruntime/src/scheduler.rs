use crate::cache::ResultCache;
use crate::context::ExecutionContext;
use crate::mem;
use crate::optimizer::{ExecutionPlan, PlannedNode};
use crate::pool::WorkerPool;
use crate::registry::ExecutorRegistry;
use chrono::Utc;
use doccore::{
    ConfigError, EngineError, EventBus, ExecError, ExecutionEvent, ExecutionMetrics,
    ExecutorInput, ExecutorResult, NodeId, NodeStatus,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Linear backoff step between retry attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Mutable run state of one node. Owned exclusively by the scheduler
/// that runs it.
#[derive(Debug, Default)]
struct NodeRun {
    status: NodeStatus,
    retry_count: u32,
    progress: u8,
    execution_time_ms: u64,
    memory_delta_bytes: i64,
}

/// What the in-flight set yields back to the loop.
enum TaskOutcome {
    Finished {
        node_id: NodeId,
        result: Result<ExecutorResult, ExecError>,
        cache_key: String,
        elapsed_ms: u64,
        memory_delta: i64,
        memory_after: u64,
    },
    /// A retry backoff elapsed; the node may re-enter the ready set.
    Readmit { node_id: NodeId },
}

/// Drives one workflow execution to completion or terminal failure.
///
/// The loop is event-driven: it suspends only on the next finished node
/// task or retry wake-up, never on a timer.
pub(crate) struct Scheduler {
    plan: ExecutionPlan,
    registry: Arc<ExecutorRegistry>,
    cache: Arc<ResultCache>,
    pool: Arc<WorkerPool>,
    events: EventBus,
    parallelism: usize,
    node_timeout: Duration,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        plan: ExecutionPlan,
        registry: Arc<ExecutorRegistry>,
        cache: Arc<ResultCache>,
        pool: Arc<WorkerPool>,
        events: EventBus,
        parallelism: usize,
        node_timeout: Duration,
    ) -> Self {
        Self {
            plan,
            registry,
            cache,
            pool,
            events,
            parallelism: parallelism.max(1),
            node_timeout,
        }
    }

    pub(crate) async fn run(
        &self,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let started = Instant::now();
        let mut runs: HashMap<NodeId, NodeRun> = self
            .plan
            .ids()
            .map(|id| (id.clone(), NodeRun::default()))
            .collect();
        let mut pending: HashSet<NodeId> = self.plan.ids().cloned().collect();
        let mut running: HashSet<NodeId> = HashSet::new();
        let mut done: HashSet<NodeId> = HashSet::new();
        let mut inflight: FuturesUnordered<BoxFuture<'static, TaskOutcome>> =
            FuturesUnordered::new();
        let mut run_error: Option<EngineError> = None;

        tracing::info!(
            execution = %ctx.execution_id,
            workflow = %ctx.workflow_id,
            nodes = self.plan.len(),
            parallelism = self.parallelism,
            "Starting workflow execution"
        );

        loop {
            // Once the run has failed no new nodes are admitted; in-flight
            // nodes are left to finish or time out naturally.
            if run_error.is_none() {
                self.admit_ready(
                    ctx,
                    &mut runs,
                    &mut pending,
                    &mut running,
                    &mut done,
                    &mut inflight,
                )?;
            }

            if inflight.is_empty() {
                break;
            }

            let Some(outcome) = inflight.next().await else {
                break;
            };
            match outcome {
                TaskOutcome::Readmit { node_id } => {
                    if run_error.is_none() {
                        pending.insert(node_id);
                    }
                }
                TaskOutcome::Finished {
                    node_id,
                    result,
                    cache_key,
                    elapsed_ms,
                    memory_delta,
                    memory_after,
                } => {
                    running.remove(&node_id);
                    if !running.is_empty() {
                        self.with_metrics(ctx, |m| m.concurrent_completions += 1);
                    }
                    match result {
                        Ok(payload) => self.complete_node(
                            ctx,
                            &mut runs,
                            &mut done,
                            &node_id,
                            payload,
                            cache_key,
                            elapsed_ms,
                            memory_delta,
                            memory_after,
                        ),
                        Err(err) => self.fail_node(
                            ctx,
                            &mut runs,
                            &mut pending,
                            &mut done,
                            &mut inflight,
                            &mut run_error,
                            node_id,
                            err,
                            elapsed_ms,
                        ),
                    }
                }
            }
        }

        // A failed run stops admitting; whatever never got to run ends
        // skipped so every node has a terminal status.
        if run_error.is_some() {
            let orphans: Vec<NodeId> = runs
                .iter()
                .filter(|(id, run)| !done.contains(*id) && run.status == NodeStatus::Idle)
                .map(|(id, _)| id.clone())
                .collect();
            for id in orphans {
                if let Some(run) = runs.get_mut(&id) {
                    run.status = NodeStatus::Skipped;
                }
                pending.remove(&id);
                done.insert(id);
                self.with_metrics(ctx, |m| m.skipped_nodes += 1);
            }
        } else if !pending.is_empty() {
            run_error = Some(EngineError::Execution(format!(
                "scheduler stalled with {} pending nodes",
                pending.len()
            )));
        }

        self.with_metrics(ctx, |m| m.total_time_ms = started.elapsed().as_millis() as u64);

        for (id, run) in &runs {
            tracing::debug!(
                node = %id,
                status = ?run.status,
                retries = run.retry_count,
                progress = run.progress,
                elapsed_ms = run.execution_time_ms,
                memory_delta = run.memory_delta_bytes,
                "Node finished"
            );
        }

        if let Some(err) = run_error {
            let metrics = ctx.metrics_snapshot();
            tracing::error!(execution = %ctx.execution_id, error = %err, "Workflow failed");
            self.events.emit(ExecutionEvent::WorkflowFailed {
                execution_id: ctx.execution_id,
                workflow_id: ctx.workflow_id.clone(),
                error: err.to_string(),
                metrics,
                timestamp: Utc::now(),
            });
            return Err(err);
        }

        let output_files = ctx.list_outputs().await?;
        let metrics = ctx.metrics_snapshot();
        tracing::info!(
            execution = %ctx.execution_id,
            completed = metrics.completed_nodes,
            elapsed_ms = metrics.total_time_ms,
            "Workflow completed"
        );
        self.events.emit(ExecutionEvent::WorkflowCompleted {
            execution_id: ctx.execution_id,
            workflow_id: ctx.workflow_id.clone(),
            metrics,
            output_files: output_files.clone(),
            timestamp: Utc::now(),
        });
        Ok(output_files)
    }

    /// Admit ready nodes, highest priority first, until the parallelism
    /// bound is reached. Cache hits complete in place without consuming a
    /// slot, which can unlock dependents within the same pass.
    fn admit_ready(
        &self,
        ctx: &mut ExecutionContext,
        runs: &mut HashMap<NodeId, NodeRun>,
        pending: &mut HashSet<NodeId>,
        running: &mut HashSet<NodeId>,
        done: &mut HashSet<NodeId>,
        inflight: &mut FuturesUnordered<BoxFuture<'static, TaskOutcome>>,
    ) -> Result<(), EngineError> {
        loop {
            let mut ready: Vec<&PlannedNode> = pending
                .iter()
                .filter_map(|id| self.plan.get(id))
                .filter(|pn| {
                    pn.dependencies.iter().all(|dep| {
                        done.contains(dep)
                            && runs
                                .get(dep)
                                .map(|r| r.status == NodeStatus::Completed)
                                .unwrap_or(false)
                    })
                })
                .collect();
            if ready.is_empty() {
                return Ok(());
            }
            ready.sort_by(|a, b| b.priority.cmp(&a.priority));

            let mut progressed = false;
            for pn in ready {
                if running.len() >= self.parallelism {
                    break;
                }

                let input_files = self.resolve_input_files(ctx, pn);
                let cache_key =
                    ResultCache::key(&pn.node.operation, &pn.node.config, &input_files);

                if let Some(cached) = self.cache.get(&cache_key) {
                    // Short-circuit: no executor call, no time charged.
                    pending.remove(&pn.node.id);
                    done.insert(pn.node.id.clone());
                    if let Some(run) = runs.get_mut(&pn.node.id) {
                        run.status = NodeStatus::Completed;
                        run.progress = 100;
                    }
                    ctx.results.insert(pn.node.id.clone(), cached);
                    self.with_metrics(ctx, |m| {
                        m.cache_hits += 1;
                        m.completed_nodes += 1;
                    });
                    tracing::debug!(node = %pn.node.id, "Cache hit");
                    self.emit_node_completed(ctx, &pn.node.id, 0, 0);
                    self.emit_progress(ctx);
                    progressed = true;
                    continue;
                }
                self.with_metrics(ctx, |m| m.cache_misses += 1);

                pending.remove(&pn.node.id);
                running.insert(pn.node.id.clone());
                if let Some(run) = runs.get_mut(&pn.node.id) {
                    run.status = NodeStatus::Running;
                }

                let task = self.spawn_node_task(ctx, pn, input_files, cache_key)?;
                inflight.push(task);
                progressed = true;
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    /// Build the in-flight future for one node: inline on the scheduler's
    /// concurrency unit, or on the worker pool when parallelizable.
    fn spawn_node_task(
        &self,
        ctx: &ExecutionContext,
        pn: &PlannedNode,
        files: Vec<PathBuf>,
        cache_key: String,
    ) -> Result<BoxFuture<'static, TaskOutcome>, EngineError> {
        // Resolution was validated at graph-load time.
        let executor = self.registry.resolve(&pn.node.operation).ok_or_else(|| {
            EngineError::Config(ConfigError::UnknownOperation(pn.node.operation.clone()))
        })?;

        let input = ExecutorInput {
            node_id: pn.node.id.clone(),
            config: pn.node.config.clone(),
            files,
            output_dir: ctx.output_dir.clone(),
            scratch_dir: ctx.scratch_dir.clone(),
        };
        let node_id = pn.node.id.clone();
        let parallelizable = pn.parallelizable;
        let pool = Arc::clone(&self.pool);
        let timeout = self.node_timeout;

        tracing::debug!(
            node = %node_id,
            operation = %pn.node.operation,
            parallel = parallelizable,
            "Starting node"
        );

        Ok(async move {
            let memory_before = mem::resident_bytes();
            let start = Instant::now();
            let result = if parallelizable {
                pool.submit(
                    Box::new(move || async move { executor.execute(input).await }.boxed()),
                    timeout,
                )
                .await
            } else {
                match tokio::time::timeout(timeout, executor.execute(input)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecError::Timeout {
                        seconds: timeout.as_secs(),
                    }),
                }
            };
            let elapsed_ms = start.elapsed().as_millis() as u64;
            let memory_after = mem::resident_bytes();
            TaskOutcome::Finished {
                node_id,
                result,
                cache_key,
                elapsed_ms,
                memory_delta: memory_after as i64 - memory_before as i64,
                memory_after,
            }
        }
        .boxed())
    }

    #[allow(clippy::too_many_arguments)]
    fn complete_node(
        &self,
        ctx: &mut ExecutionContext,
        runs: &mut HashMap<NodeId, NodeRun>,
        done: &mut HashSet<NodeId>,
        node_id: &NodeId,
        payload: ExecutorResult,
        cache_key: String,
        elapsed_ms: u64,
        memory_delta: i64,
        memory_after: u64,
    ) {
        if let Some(run) = runs.get_mut(node_id) {
            run.status = NodeStatus::Completed;
            run.progress = 100;
            run.execution_time_ms = elapsed_ms;
            run.memory_delta_bytes = memory_delta;
        }
        done.insert(node_id.clone());

        if let Some(pn) = self.plan.get(node_id) {
            self.cache.put(&pn.node.operation, cache_key, &payload);
        }
        ctx.results.insert(node_id.clone(), payload);

        self.with_metrics(ctx, |m| {
            m.completed_nodes += 1;
            if memory_after > m.peak_memory_bytes {
                m.peak_memory_bytes = memory_after;
            }
        });
        tracing::info!(node = %node_id, elapsed_ms, "Node completed");
        self.emit_node_completed(ctx, node_id, elapsed_ms, memory_delta);
        self.emit_progress(ctx);
    }

    #[allow(clippy::too_many_arguments)]
    fn fail_node(
        &self,
        ctx: &mut ExecutionContext,
        runs: &mut HashMap<NodeId, NodeRun>,
        pending: &mut HashSet<NodeId>,
        done: &mut HashSet<NodeId>,
        inflight: &mut FuturesUnordered<BoxFuture<'static, TaskOutcome>>,
        run_error: &mut Option<EngineError>,
        node_id: NodeId,
        err: ExecError,
        elapsed_ms: u64,
    ) {
        let max_retries = self.plan.get(&node_id).map(|pn| pn.max_retries).unwrap_or(0);
        let retry_count = runs.get(&node_id).map(|r| r.retry_count).unwrap_or(0);

        if run_error.is_none() && retry_count < max_retries {
            let attempt = retry_count + 1;
            if let Some(run) = runs.get_mut(&node_id) {
                run.retry_count = attempt;
                run.status = NodeStatus::Idle;
            }
            tracing::warn!(
                node = %node_id,
                attempt,
                max = max_retries,
                error = %err,
                "Node failed, retrying"
            );
            // The node stays out of the ready set until the backoff
            // wake-up fires.
            let delay = RETRY_BACKOFF * attempt;
            inflight.push(
                async move {
                    tokio::time::sleep(delay).await;
                    TaskOutcome::Readmit { node_id }
                }
                .boxed(),
            );
            return;
        }

        if let Some(run) = runs.get_mut(&node_id) {
            run.status = NodeStatus::Error;
            run.execution_time_ms = elapsed_ms;
        }
        done.insert(node_id.clone());
        self.with_metrics(ctx, |m| m.failed_nodes += 1);
        tracing::error!(node = %node_id, error = %err, "Node failed terminally");
        self.events.emit(ExecutionEvent::NodeError {
            execution_id: ctx.execution_id,
            node_id: node_id.clone(),
            error: err.to_string(),
            execution_time_ms: elapsed_ms,
            timestamp: Utc::now(),
        });

        self.skip_dependents(ctx, runs, pending, done, &node_id);

        if run_error.is_none() {
            *run_error = Some(EngineError::NodeFailed {
                node_id,
                source: err,
            });
        }
    }

    /// A dependency that ends in error propagates `Skipped` to all its
    /// transitive dependents, never silently.
    fn skip_dependents(
        &self,
        ctx: &mut ExecutionContext,
        runs: &mut HashMap<NodeId, NodeRun>,
        pending: &mut HashSet<NodeId>,
        done: &mut HashSet<NodeId>,
        failed: &NodeId,
    ) {
        let mut stack = vec![failed.clone()];
        while let Some(id) = stack.pop() {
            let Some(pn) = self.plan.get(&id) else {
                continue;
            };
            for dep_id in &pn.dependents {
                if pending.remove(dep_id) {
                    if let Some(run) = runs.get_mut(dep_id) {
                        run.status = NodeStatus::Skipped;
                    }
                    done.insert(dep_id.clone());
                    self.with_metrics(ctx, |m| m.skipped_nodes += 1);
                    tracing::warn!(node = %dep_id, after = %id, "Node skipped");
                    stack.push(dep_id.clone());
                }
            }
        }
    }

    /// Root nodes read the execution's original inputs; everything else
    /// concatenates the output files of its dependencies, in dependency
    /// order.
    fn resolve_input_files(&self, ctx: &ExecutionContext, pn: &PlannedNode) -> Vec<PathBuf> {
        if pn.dependencies.is_empty() {
            return ctx.input_files.clone();
        }
        pn.dependencies
            .iter()
            .filter_map(|dep| ctx.results.get(dep))
            .flat_map(|result| result.output_files.iter().cloned())
            .collect()
    }

    fn with_metrics(&self, ctx: &ExecutionContext, f: impl FnOnce(&mut ExecutionMetrics)) {
        f(&mut ctx.metrics.lock().unwrap());
    }

    fn emit_node_completed(
        &self,
        ctx: &ExecutionContext,
        node_id: &NodeId,
        execution_time_ms: u64,
        memory_delta_bytes: i64,
    ) {
        self.events.emit(ExecutionEvent::NodeCompleted {
            execution_id: ctx.execution_id,
            node_id: node_id.clone(),
            execution_time_ms,
            memory_delta_bytes,
            timestamp: Utc::now(),
        });
    }

    fn emit_progress(&self, ctx: &ExecutionContext) {
        let (progress, completed_nodes, total_nodes) = {
            let metrics = ctx.metrics.lock().unwrap();
            (metrics.progress(), metrics.completed_nodes, metrics.total_nodes)
        };
        self.events.emit(ExecutionEvent::ProgressUpdate {
            execution_id: ctx.execution_id,
            progress,
            completed_nodes,
            total_nodes,
            timestamp: Utc::now(),
        });
    }
}
