// crates/docruntime/tests/engine_test.rs

use async_trait::async_trait;
use doccore::{
    ConfigError, Edge, EngineError, ExecError, ExecutionEvent, Executor, ExecutorInput,
    ExecutorResult, WorkflowNode,
};
use docruntime::{EngineConfig, ExecutorRegistry, RunConfig, WorkflowEngine};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Executor that records invocation order and returns a canned payload.
struct RecordingExecutor {
    operation: String,
    calls: Arc<AtomicUsize>,
    order: Arc<Mutex<Vec<String>>>,
    delay_ms: u64,
    write_name: Option<String>,
}

impl RecordingExecutor {
    fn new(operation: &str, calls: &Arc<AtomicUsize>, order: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            operation: operation.to_string(),
            calls: Arc::clone(calls),
            order: Arc::clone(order),
            delay_ms: 0,
            write_name: None,
        }
    }

    fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn with_output(mut self, name: &str) -> Self {
        self.write_name = Some(name.to_string());
        self
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    fn operation(&self) -> &str {
        &self.operation
    }

    async fn execute(&self, input: ExecutorInput) -> Result<ExecutorResult, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.order.lock().unwrap().push(input.node_id.clone());
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let mut result = ExecutorResult::new()
            .with_files(input.files.clone())
            .with_data(json!({ "operation": self.operation }));
        if let Some(name) = &self.write_name {
            let target = input.output_dir.join(name);
            tokio::fs::write(&target, input.node_id.as_bytes()).await?;
            result.output_files = vec![target];
        }
        Ok(result)
    }
}

/// Executor that always fails.
struct FailingExecutor {
    operation: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Executor for FailingExecutor {
    fn operation(&self) -> &str {
        &self.operation
    }

    async fn execute(&self, _input: ExecutorInput) -> Result<ExecutorResult, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExecError::Failed("boom".to_string()))
    }
}

/// Executor that tracks how many invocations overlap.
struct GaugeExecutor {
    operation: String,
    current: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
}

#[async_trait]
impl Executor for GaugeExecutor {
    fn operation(&self) -> &str {
        &self.operation
    }

    async fn execute(&self, _input: ExecutorInput) -> Result<ExecutorResult, ExecError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(ExecutorResult::new().with_data(json!({ "ok": true })))
    }
}

fn engine_with(executors: Vec<Arc<dyn Executor>>, tmp: &TempDir) -> WorkflowEngine {
    let mut registry = ExecutorRegistry::new();
    for executor in executors {
        registry.register(executor);
    }
    let config = EngineConfig {
        output_root: tmp.path().to_path_buf(),
        ..EngineConfig::default()
    };
    WorkflowEngine::with_registry(Arc::new(registry), config)
}

fn input_file(tmp: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = tmp.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>,
) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn linear_workflow_runs_in_dependency_order() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let engine = engine_with(
        vec![
            Arc::new(RecordingExecutor::new("ingest", &calls, &order)),
            Arc::new(RecordingExecutor::new("transform", &calls, &order)),
            Arc::new(RecordingExecutor::new("assemble", &calls, &order).with_output("final.txt")),
        ],
        &tmp,
    );
    let mut events = engine.subscribe_events();

    let nodes = vec![
        WorkflowNode::new("input", "ingest"),
        WorkflowNode::new("split", "transform"),
        WorkflowNode::new("output", "assemble"),
    ];
    let edges = vec![Edge::new("input", "split"), Edge::new("split", "output")];
    let inputs = vec![input_file(&tmp, "doc.txt", "hello")];

    let report = engine
        .execute_workflow("wf-linear", nodes, edges, inputs, RunConfig::default())
        .await
        .unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec!["input".to_string(), "split".to_string(), "output".to_string()]
    );
    assert_eq!(report.metrics.completed_nodes, 3);
    assert_eq!(report.metrics.failed_nodes, 0);
    assert_eq!(report.metrics.skipped_nodes, 0);
    assert_eq!(report.output_files.len(), 1);
    assert!(report.output_files[0].ends_with("final.txt"));

    let events = drain_events(&mut events);
    let completed = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeCompleted { .. }))
        .count();
    assert_eq!(completed, 3);
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::WorkflowCompleted { .. })));
    let final_progress = events.iter().rev().find_map(|e| match e {
        ExecutionEvent::ProgressUpdate { progress, .. } => Some(*progress),
        _ => None,
    });
    assert_eq!(final_progress, Some(100.0));
}

#[tokio::test]
async fn diamond_dependencies_complete_before_dependents() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let engine = engine_with(
        vec![Arc::new(
            RecordingExecutor::new("transform", &calls, &order).with_delay(20),
        )],
        &tmp,
    );

    let nodes = vec![
        WorkflowNode::new("a", "transform"),
        WorkflowNode::new("b", "transform"),
        WorkflowNode::new("c", "transform"),
        WorkflowNode::new("d", "transform"),
    ];
    let edges = vec![
        Edge::new("a", "b"),
        Edge::new("a", "c"),
        Edge::new("b", "d"),
        Edge::new("c", "d"),
    ];

    let report = engine
        .execute_workflow(
            "wf-diamond",
            nodes,
            edges,
            vec![],
            RunConfig {
                parallelism: Some(2),
                ..RunConfig::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.metrics.completed_nodes, 4);
    let order = order.lock().unwrap();
    assert_eq!(order[0], "a");
    assert_eq!(order[3], "d");
}

#[tokio::test]
async fn running_nodes_never_exceed_parallelism_bound() {
    let tmp = TempDir::new().unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let engine = engine_with(
        vec![Arc::new(GaugeExecutor {
            operation: "transform".to_string(),
            current: Arc::clone(&current),
            max_seen: Arc::clone(&max_seen),
        })],
        &tmp,
    );

    let nodes: Vec<WorkflowNode> = (0..6)
        .map(|i| WorkflowNode::new(format!("n{i}"), "transform"))
        .collect();

    let report = engine
        .execute_workflow(
            "wf-parallel",
            nodes,
            vec![],
            vec![],
            RunConfig {
                parallelism: Some(2),
                ..RunConfig::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.metrics.completed_nodes, 6);
    assert!(max_seen.load(Ordering::SeqCst) <= 2);
    assert!(report.metrics.concurrent_completions > 0);
}

#[tokio::test]
async fn higher_priority_node_is_admitted_first() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let engine = engine_with(
        vec![
            // "document-split" carries a higher base priority than an
            // unlisted operation.
            Arc::new(RecordingExecutor::new("document-split", &calls, &order)),
            Arc::new(RecordingExecutor::new("transform", &calls, &order)),
        ],
        &tmp,
    );

    let nodes = vec![
        WorkflowNode::new("plain", "transform"),
        WorkflowNode::new("splitter", "document-split"),
    ];
    let inputs = vec![input_file(&tmp, "doc.txt", "0123456789")];

    engine
        .execute_workflow(
            "wf-priority",
            nodes,
            vec![],
            inputs,
            RunConfig {
                parallelism: Some(1),
                ..RunConfig::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec!["splitter".to_string(), "plain".to_string()]
    );
}

#[tokio::test]
async fn failing_node_retries_then_fails_the_run() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let engine = engine_with(
        vec![Arc::new(FailingExecutor {
            operation: "flaky-op".to_string(),
            calls: Arc::clone(&calls),
        })],
        &tmp,
    );
    let mut events = engine.subscribe_events();

    let nodes = vec![WorkflowNode::new("flaky", "flaky-op").with_max_retries(2)];
    let err = engine
        .execute_workflow("wf-retry", nodes, vec![], vec![], RunConfig::default())
        .await
        .unwrap_err();

    // One initial attempt plus exactly two retries.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match err {
        EngineError::NodeFailed { node_id, .. } => assert_eq!(node_id, "flaky"),
        other => panic!("expected NodeFailed, got {other:?}"),
    }

    let events = drain_events(&mut events);
    let failed_metrics = events.iter().find_map(|e| match e {
        ExecutionEvent::WorkflowFailed { metrics, .. } => Some(metrics.clone()),
        _ => None,
    });
    let failed_metrics = failed_metrics.expect("workflowFailed event");
    assert_eq!(failed_metrics.failed_nodes, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::NodeError { .. })));
}

#[tokio::test]
async fn failed_dependency_skips_dependents_and_lets_running_nodes_settle() {
    let tmp = TempDir::new().unwrap();
    let fail_calls = Arc::new(AtomicUsize::new(0));
    let down_calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let engine = engine_with(
        vec![
            Arc::new(FailingExecutor {
                operation: "bad-op".to_string(),
                calls: Arc::clone(&fail_calls),
            }),
            Arc::new(RecordingExecutor::new("down-op", &down_calls, &order)),
            Arc::new(RecordingExecutor::new("side-op", &down_calls, &order).with_delay(50)),
        ],
        &tmp,
    );
    let mut events = engine.subscribe_events();

    let nodes = vec![
        WorkflowNode::new("bad", "bad-op").with_max_retries(0),
        WorkflowNode::new("down", "down-op"),
        WorkflowNode::new("side", "side-op"),
    ];
    let edges = vec![Edge::new("bad", "down")];

    let err = engine
        .execute_workflow(
            "wf-skip",
            nodes,
            edges,
            vec![],
            RunConfig {
                parallelism: Some(2),
                ..RunConfig::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NodeFailed { .. }));

    // The dependent of the failed node never ran.
    assert!(!order.lock().unwrap().contains(&"down".to_string()));

    let events = drain_events(&mut events);
    let metrics = events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::WorkflowFailed { metrics, .. } => Some(metrics.clone()),
            _ => None,
        })
        .expect("workflowFailed event");
    assert_eq!(metrics.failed_nodes, 1);
    assert_eq!(metrics.skipped_nodes, 1);
    // The independent node was already running and settled normally.
    assert_eq!(metrics.completed_nodes, 1);
}

#[tokio::test]
async fn cacheable_operation_hits_across_executions() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let engine = engine_with(
        vec![Arc::new(
            RecordingExecutor::new("ocr-extract", &calls, &order),
        )],
        &tmp,
    );

    let node = WorkflowNode::new("ocr", "ocr-extract").with_config("language", "en");
    let inputs = vec![input_file(&tmp, "scan.png", "pixels")];

    let first = engine
        .execute_workflow(
            "wf-cache",
            vec![node.clone()],
            vec![],
            inputs.clone(),
            RunConfig::default(),
        )
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.metrics.cache_hits, 0);
    assert_eq!(first.metrics.cache_misses, 1);

    let second = engine
        .execute_workflow(
            "wf-cache",
            vec![node],
            vec![],
            inputs,
            RunConfig::default(),
        )
        .await
        .unwrap();

    // The executor was not invoked a second time and both payloads match.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.metrics.cache_hits, 1);
    assert_eq!(second.metrics.cache_misses, 0);
    assert_eq!(first.node_results["ocr"], second.node_results["ocr"]);

    let stats = engine.performance_stats().await;
    assert_eq!(stats.cache_size, 1);
    assert!(stats.cache_hits >= 1);
}

#[tokio::test]
async fn unknown_operation_fails_before_any_node_runs() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with(vec![], &tmp);
    let mut events = engine.subscribe_events();

    let nodes = vec![WorkflowNode::new("a", "no-such-op")];
    let err = engine
        .execute_workflow("wf-unknown", nodes, vec![], vec![], RunConfig::default())
        .await
        .unwrap_err();

    match err {
        EngineError::Config(ConfigError::UnknownOperation(op)) => {
            assert_eq!(op, "no-such-op");
        }
        other => panic!("expected UnknownOperation, got {other:?}"),
    }
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn cyclic_graph_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));
    let engine = engine_with(
        vec![Arc::new(RecordingExecutor::new("transform", &calls, &order))],
        &tmp,
    );

    let nodes = vec![
        WorkflowNode::new("a", "transform"),
        WorkflowNode::new("b", "transform"),
    ];
    let edges = vec![Edge::new("a", "b"), Edge::new("b", "a")];

    let err = engine
        .execute_workflow("wf-cycle", nodes, edges, vec![], RunConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Config(ConfigError::CyclicDependency)
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn timed_out_node_is_retried_like_any_failure() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let engine = engine_with(
        vec![Arc::new(
            RecordingExecutor::new("slow-op", &calls, &order).with_delay(10_000),
        )],
        &tmp,
    );

    let nodes = vec![WorkflowNode::new("slow", "slow-op").with_max_retries(1)];
    let err = engine
        .execute_workflow(
            "wf-timeout",
            nodes,
            vec![],
            vec![],
            RunConfig {
                node_timeout: Some(Duration::from_millis(50)),
                ..RunConfig::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    match err {
        EngineError::NodeFailed { source, .. } => {
            assert!(matches!(source, ExecError::Timeout { .. }));
        }
        other => panic!("expected NodeFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn metrics_are_queryable_only_while_the_run_is_live() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let engine = Arc::new(engine_with(
        vec![Arc::new(
            RecordingExecutor::new("transform", &calls, &order).with_delay(200),
        )],
        &tmp,
    ));
    let mut events = engine.subscribe_events();

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .execute_workflow(
                    "wf-live",
                    vec![WorkflowNode::new("slow", "transform")],
                    vec![],
                    vec![],
                    RunConfig::default(),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = engine.performance_stats().await;
    assert_eq!(stats.active_executions, 1);

    let report = runner.await.unwrap().unwrap();
    assert!(engine
        .get_execution_metrics(report.execution_id)
        .await
        .is_none());
    assert_eq!(engine.performance_stats().await.active_executions, 0);

    // The live query during the run saw the same execution id the report
    // carries.
    let seen_live = {
        let events = drain_events(&mut events);
        events.iter().any(|e| {
            matches!(e, ExecutionEvent::WorkflowCompleted { execution_id, .. }
                if *execution_id == report.execution_id)
        })
    };
    assert!(seen_live);
}

#[tokio::test]
async fn context_is_torn_down_after_success_and_failure() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let engine = engine_with(
        vec![
            Arc::new(RecordingExecutor::new("transform", &calls, &order)),
            Arc::new(FailingExecutor {
                operation: "bad-op".to_string(),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        ],
        &tmp,
    );

    let ok = engine
        .execute_workflow(
            "wf-clean",
            vec![WorkflowNode::new("a", "transform")],
            vec![],
            vec![],
            RunConfig::default(),
        )
        .await
        .unwrap();
    assert!(engine.get_execution_metrics(ok.execution_id).await.is_none());
    // Output directory survives teardown, scratch space does not.
    let output_dir = tmp.path().join(ok.execution_id.to_string());
    assert!(output_dir.exists());
    assert!(!output_dir.join(".scratch").exists());

    let err = engine
        .execute_workflow(
            "wf-clean",
            vec![WorkflowNode::new("b", "bad-op").with_max_retries(0)],
            vec![],
            vec![],
            RunConfig::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NodeFailed { .. }));
    assert_eq!(engine.performance_stats().await.active_executions, 0);
}

#[tokio::test]
async fn dependency_outputs_become_dependent_inputs() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen_files = Arc::new(Mutex::new(Vec::new()));

    /// Executor that records the files it was handed.
    struct FileProbe {
        operation: String,
        seen: Arc<Mutex<Vec<PathBuf>>>,
    }

    #[async_trait]
    impl Executor for FileProbe {
        fn operation(&self) -> &str {
            &self.operation
        }

        async fn execute(&self, input: ExecutorInput) -> Result<ExecutorResult, ExecError> {
            self.seen.lock().unwrap().extend(input.files.clone());
            Ok(ExecutorResult::new().with_data(json!({ "ok": true })))
        }
    }

    let engine = engine_with(
        vec![
            Arc::new(
                RecordingExecutor::new("producer-op", &calls, &order).with_output("stage.txt"),
            ),
            Arc::new(FileProbe {
                operation: "consumer-op".to_string(),
                seen: Arc::clone(&seen_files),
            }),
        ],
        &tmp,
    );

    let nodes = vec![
        WorkflowNode::new("producer", "producer-op"),
        WorkflowNode::new("consumer", "consumer-op"),
    ];
    let edges = vec![Edge::new("producer", "consumer")];
    let inputs = vec![input_file(&tmp, "orig.txt", "data")];

    engine
        .execute_workflow("wf-files", nodes, edges, inputs.clone(), RunConfig::default())
        .await
        .unwrap();

    let seen = seen_files.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].ends_with("stage.txt"), "consumer got {seen:?}");
}
