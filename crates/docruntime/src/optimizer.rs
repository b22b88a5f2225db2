use doccore::{ConfigError, Edge, NodeId, WorkflowNode};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet};

/// Operations dispatched to the worker pool when they have at most one
/// dependency.
const PARALLEL_OPS: &[&str] = &[
    "document-split",
    "document-merge",
    "image-convert",
    "ocr-extract",
    "thumbnail-render",
];

const DEFAULT_BASE_PRIORITY: i32 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fixed per-operation priority bias; operations without an entry get the
/// default.
fn base_priority(operation: &str) -> i32 {
    match operation {
        "document-split" => 50,
        "document-merge" => 45,
        "ocr-extract" => 40,
        "ai-classify" | "ai-extract" | "ai-summarize" => 35,
        _ => DEFAULT_BASE_PRIORITY,
    }
}

/// A node annotated with everything the scheduler needs to run it.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub node: WorkflowNode,

    /// Ids this node depends on (edges where it is the target).
    pub dependencies: Vec<NodeId>,

    /// Ids depending on this node (edges where it is the source).
    pub dependents: Vec<NodeId>,

    /// Whether the node is dispatched to the worker pool.
    pub parallelizable: bool,

    /// Preference among simultaneously ready nodes; higher wins.
    pub priority: i32,

    pub max_retries: u32,
}

/// Annotated execution plan for one workflow graph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    nodes: HashMap<NodeId, PlannedNode>,
}

impl ExecutionPlan {
    pub fn get(&self, id: &str) -> Option<&PlannedNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedNode> {
        self.nodes.values()
    }
}

/// Annotate a node list with dependency sets, parallelizability and
/// priority, rejecting graphs that are not finite DAGs.
///
/// Pure: the same input always yields the same plan, and nothing is
/// mutated along the way.
pub fn plan(nodes: &[WorkflowNode], edges: &[Edge]) -> Result<ExecutionPlan, ConfigError> {
    let mut ids = HashSet::new();
    for node in nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(ConfigError::DuplicateNode(node.id.clone()));
        }
    }
    for edge in edges {
        for id in [&edge.source, &edge.target] {
            if !ids.contains(id.as_str()) {
                return Err(ConfigError::UnknownNode(id.clone()));
            }
        }
    }

    // Cycle check on a petgraph mirror of the edge set.
    let mut graph = DiGraph::<&str, ()>::new();
    let mut indices = HashMap::new();
    for node in nodes {
        indices.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for edge in edges {
        graph.add_edge(
            indices[edge.source.as_str()],
            indices[edge.target.as_str()],
            (),
        );
    }
    if toposort(&graph, None).is_err() {
        return Err(ConfigError::CyclicDependency);
    }

    let mut planned = HashMap::new();
    for node in nodes {
        let dependencies: Vec<NodeId> = edges
            .iter()
            .filter(|e| e.target == node.id)
            .map(|e| e.source.clone())
            .collect();
        let dependents: Vec<NodeId> = edges
            .iter()
            .filter(|e| e.source == node.id)
            .map(|e| e.target.clone())
            .collect();

        let parallelizable =
            PARALLEL_OPS.contains(&node.operation.as_str()) && dependencies.len() <= 1;
        let priority = 10 * dependents.len() as i32 - 5 * dependencies.len() as i32
            + base_priority(&node.operation);

        planned.insert(
            node.id.clone(),
            PlannedNode {
                max_retries: node.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                node: node.clone(),
                dependencies,
                dependents,
                parallelizable,
                priority,
            },
        );
    }

    Ok(ExecutionPlan { nodes: planned })
}
