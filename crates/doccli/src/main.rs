use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doccore::{Edge, ExecutionEvent, NodeKind, WorkflowNode};
use docruntime::{EngineConfig, ExecutorRegistry, RunConfig, WorkflowEngine};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "Document workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input document paths
        #[arg(short, long)]
        input: Vec<PathBuf>,

        /// Root directory for execution outputs
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Maximum concurrently running nodes
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Show progress events
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available operations
    Ops,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

/// On-disk workflow representation.
#[derive(Debug, Serialize, Deserialize)]
struct WorkflowFile {
    workflow_id: String,
    nodes: Vec<WorkflowNode>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            output_dir,
            parallelism,
            verbose,
        } => run(file, input, output_dir, parallelism, verbose).await,
        Commands::Validate { file } => validate(&file),
        Commands::Ops => ops(),
        Commands::Init { output } => init(&output),
    }
}

fn build_registry() -> Arc<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    docops::register_all(&mut registry);
    Arc::new(registry)
}

fn load_workflow(path: &Path) -> Result<WorkflowFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn run(
    file: PathBuf,
    input: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    parallelism: Option<usize>,
    verbose: bool,
) -> Result<()> {
    let workflow = load_workflow(&file)?;

    let mut config = EngineConfig::default();
    if let Some(dir) = output_dir {
        config.output_root = dir;
    }
    let engine = WorkflowEngine::with_registry(build_registry(), config);

    let mut events = engine.subscribe_events();
    let mut printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::ProgressUpdate {
                    progress,
                    completed_nodes,
                    total_nodes,
                    ..
                } if verbose => {
                    println!("progress: {progress:.0}% ({completed_nodes}/{total_nodes})");
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    execution_time_ms,
                    ..
                } => {
                    println!("node {node_id} completed in {execution_time_ms}ms");
                }
                ExecutionEvent::NodeError { node_id, error, .. } => {
                    eprintln!("node {node_id} failed: {error}");
                }
                ExecutionEvent::WorkflowCompleted { .. }
                | ExecutionEvent::WorkflowFailed { .. } => break,
                _ => {}
            }
        }
    });

    let report = engine
        .execute_workflow(
            workflow.workflow_id,
            workflow.nodes,
            workflow.edges,
            input,
            RunConfig {
                parallelism,
                ..RunConfig::default()
            },
        )
        .await;

    // Config errors fail before any event is published; don't wait on one.
    if tokio::time::timeout(Duration::from_secs(1), &mut printer)
        .await
        .is_err()
    {
        printer.abort();
    }

    let report = report?;
    println!("execution {} completed", report.execution_id);
    println!(
        "  nodes: {} completed, {} failed, {} skipped",
        report.metrics.completed_nodes, report.metrics.failed_nodes, report.metrics.skipped_nodes
    );
    println!(
        "  cache: {} hits, {} misses",
        report.metrics.cache_hits, report.metrics.cache_misses
    );
    println!("  wall time: {}ms", report.metrics.total_time_ms);
    for file in &report.output_files {
        println!("  output: {}", file.display());
    }
    Ok(())
}

fn validate(file: &Path) -> Result<()> {
    let workflow = load_workflow(file)?;
    let plan = docruntime::plan(&workflow.nodes, &workflow.edges)?;
    build_registry().validate(&workflow.nodes)?;
    println!(
        "workflow '{}' is valid: {} nodes, {} edges",
        workflow.workflow_id,
        plan.len(),
        workflow.edges.len()
    );
    Ok(())
}

fn ops() -> Result<()> {
    let mut operations = build_registry().operations();
    operations.sort();
    println!("Available operations:");
    for operation in operations {
        println!("  {operation}");
    }
    Ok(())
}

fn init(output: &Path) -> Result<()> {
    let example = WorkflowFile {
        workflow_id: "example".to_string(),
        nodes: vec![
            WorkflowNode::new("split", "document-split")
                .with_kind(NodeKind::Input)
                .with_config("parts", 2),
            WorkflowNode::new("extract", "text-extract"),
            WorkflowNode::new("combine", "document-merge")
                .with_kind(NodeKind::Output)
                .with_config("output_name", "combined.txt"),
        ],
        edges: vec![Edge::new("split", "extract"), Edge::new("extract", "combine")],
    };

    let json = serde_json::to_string_pretty(&example)?;
    std::fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;
    println!("wrote example workflow to {}", output.display());
    Ok(())
}
