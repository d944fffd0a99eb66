//! Sequential executor for named nodes joined by conditional edges.
//!
//! One node runs at a time: every node sees the state produced by its
//! predecessor. Edges are pure predicates over the state; only nodes do I/O.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::graph::error::{GraphError, GraphResult, NodeError};
use crate::graph::state::{GraphState, StateUpdate, StepError};
use crate::metrics::METRICS;
use crate::obs;

/// Conventional name for the implicit terminal. Never registered as a node.
pub const END: &str = "__end__";

/// Default hard ceiling on node steps per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// A unit of work in a workflow graph.
#[async_trait]
pub trait GraphNode<C>: Send + Sync {
    /// Unique name within its graph.
    fn name(&self) -> &str;

    /// Skip guard. When this returns false the engine advances without
    /// executing the node.
    fn should_execute(&self, _state: &GraphState<C>) -> bool {
        true
    }

    async fn execute(
        &self,
        state: &GraphState<C>,
        cancel: &CancellationToken,
    ) -> Result<StateUpdate<C>, NodeError>;

    /// Recovery hook. `None` means the node declares no recovery and the
    /// failure halts the run.
    fn on_error(&self, _state: &GraphState<C>, _error: &NodeError) -> Option<StateUpdate<C>> {
        None
    }
}

/// Pure predicate deciding whether an edge is taken.
pub type EdgeCondition<C> = Arc<dyn Fn(&GraphState<C>) -> bool + Send + Sync>;

pub struct GraphEdge<C> {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition<C>>,
}

impl<C> GraphEdge<C> {
    fn matches(&self, state: &GraphState<C>) -> bool {
        self.condition.as_ref().map_or(true, |cond| cond(state))
    }
}

impl<C> fmt::Debug for GraphEdge<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphEdge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// A validated, immutable workflow graph. Reusable across runs.
pub struct WorkflowGraph<C> {
    entry: String,
    nodes: HashMap<String, Arc<dyn GraphNode<C>>>,
    edges: Vec<GraphEdge<C>>,
    max_iterations: usize,
}

impl<C: Send + Sync> WorkflowGraph<C> {
    pub fn builder(entry: impl Into<String>) -> WorkflowGraphBuilder<C> {
        WorkflowGraphBuilder::new(entry)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// First edge out of `from` whose condition holds, in declaration order.
    fn next_step(&self, from: &str, state: &GraphState<C>) -> Option<&str> {
        self.edges
            .iter()
            .filter(|edge| edge.from == from)
            .find(|edge| edge.matches(state))
            .map(|edge| edge.to.as_str())
    }
}

/// Collects nodes and edges, then validates the shape in [`build`](Self::build).
pub struct WorkflowGraphBuilder<C> {
    entry: String,
    nodes: Vec<Arc<dyn GraphNode<C>>>,
    edges: Vec<GraphEdge<C>>,
    max_iterations: usize,
}

impl<C: Send + Sync> WorkflowGraphBuilder<C> {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn node(mut self, node: impl GraphNode<C> + 'static) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(GraphEdge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    pub fn conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&GraphState<C>) -> bool + Send + Sync + 'static,
    {
        self.edges.push(GraphEdge {
            from: from.into(),
            to: to.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    /// Override the iteration ceiling. Values below 1 are raised to 1.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn build(self) -> GraphResult<WorkflowGraph<C>> {
        if self.nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for node in self.nodes {
            let name = node.name().to_string();
            if nodes.contains_key(&name) {
                return Err(GraphError::DuplicateNode { name });
            }
            nodes.insert(name, node);
        }
        if !nodes.contains_key(&self.entry) {
            return Err(GraphError::MissingEntryNode { entry: self.entry });
        }
        let registered: HashSet<&String> = nodes.keys().collect();
        if let Some(edge) = self.edges.iter().find(|e| !registered.contains(&e.from)) {
            return Err(GraphError::UnknownEdgeSource {
                from: edge.from.clone(),
            });
        }
        Ok(WorkflowGraph {
            entry: self.entry,
            nodes,
            edges: self.edges,
            max_iterations: self.max_iterations,
        })
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The current step names no registered node.
    Completed,
    /// No outgoing edge matched after `at`.
    DeadEnd { at: String },
    /// The iteration ceiling was reached; accumulated state is preserved.
    IterationLimit,
    /// `node` failed without declaring a recovery.
    Halted { node: String },
    Cancelled,
}

impl Termination {
    /// True for the outcomes that are not failures.
    pub fn is_normal(&self) -> bool {
        matches!(self, Termination::Completed | Termination::DeadEnd { .. })
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::DeadEnd { .. } => write!(f, "dead_end"),
            Termination::IterationLimit => write!(f, "iteration_limit"),
            Termination::Halted { .. } => write!(f, "halted"),
            Termination::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final state of a run plus how it ended.
#[derive(Debug, Clone)]
pub struct WorkflowRun<C> {
    pub run_id: String,
    pub state: GraphState<C>,
    pub termination: Termination,
    /// Node steps consumed, skipped nodes included.
    pub iterations: usize,
}

/// Execute `graph` from its entry node (or from `state.current_step` when the
/// caller has set one).
///
/// Never returns an error: node failures are recorded in `state.errors` and
/// reflected in [`Termination`]. Shape errors are caught by the builder.
#[instrument(skip_all, fields(entry = %graph.entry))]
pub async fn run_workflow<C>(
    graph: &WorkflowGraph<C>,
    initial: GraphState<C>,
    cancel: &CancellationToken,
) -> WorkflowRun<C>
where
    C: Clone + Send + Sync,
{
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut state = initial;
    if state.current_step.is_empty() {
        state.current_step = graph.entry.clone();
    }
    obs::emit_workflow_started(&run_id, &state.current_step);

    let mut iterations = 0usize;
    let termination = loop {
        if cancel.is_cancelled() {
            break Termination::Cancelled;
        }
        let Some(node) = graph.nodes.get(&state.current_step).cloned() else {
            break Termination::Completed;
        };
        if iterations >= graph.max_iterations {
            break Termination::IterationLimit;
        }
        iterations += 1;
        METRICS.inc_workflow_iterations();

        let name = node.name().to_string();
        if node.should_execute(&state) {
            let outcome = AssertUnwindSafe(node.execute(&state, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(NodeError::Panicked(panic_message(panic))));
            match outcome {
                Ok(update) => state.apply(update),
                Err(err) => {
                    let recovery = node.on_error(&state, &err);
                    obs::emit_node_failed(&run_id, &name, &err, recovery.is_some());
                    state.errors.push(StepError {
                        step: name.clone(),
                        error: err.to_string(),
                    });
                    match recovery {
                        Some(update) => state.apply(update),
                        None => break Termination::Halted { node: name },
                    }
                }
            }
        } else {
            debug!(node = %name, "skip guard declined; advancing");
        }

        match graph.next_step(&name, &state) {
            Some(next) => state.current_step = next.to_string(),
            None => break Termination::DeadEnd { at: name },
        }
    };

    obs::emit_workflow_finished(&run_id, iterations, &termination.to_string());
    WorkflowRun {
        run_id,
        state,
        termination,
        iterations,
    }
}

pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Ok(s) = panic.downcast::<String>() {
        *s
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        name: &'static str,
    }

    #[async_trait]
    impl GraphNode<u32> for Counter {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(
            &self,
            state: &GraphState<u32>,
            _cancel: &CancellationToken,
        ) -> Result<StateUpdate<u32>, NodeError> {
            Ok(StateUpdate::context(state.context + 1))
        }
    }

    #[test]
    fn test_build_rejects_missing_entry() {
        let err = WorkflowGraph::<u32>::builder("nope")
            .node(Counter { name: "a" })
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            GraphError::MissingEntryNode {
                entry: "nope".into()
            }
        );
    }

    #[test]
    fn test_build_rejects_duplicate_node() {
        let err = WorkflowGraph::<u32>::builder("a")
            .node(Counter { name: "a" })
            .node(Counter { name: "a" })
            .build()
            .err()
            .unwrap();
        assert_eq!(err, GraphError::DuplicateNode { name: "a".into() });
    }

    #[test]
    fn test_build_rejects_edge_from_unknown_node() {
        let err = WorkflowGraph::<u32>::builder("a")
            .node(Counter { name: "a" })
            .edge("ghost", "a")
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            GraphError::UnknownEdgeSource {
                from: "ghost".into()
            }
        );
    }

    #[test]
    fn test_build_rejects_empty_graph() {
        let err = WorkflowGraph::<u32>::builder("a").build().err().unwrap();
        assert_eq!(err, GraphError::EmptyGraph);
    }

    #[tokio::test]
    async fn test_linear_run_completes_at_end() {
        let graph = WorkflowGraph::builder("a")
            .node(Counter { name: "a" })
            .node(Counter { name: "b" })
            .edge("a", "b")
            .edge("b", END)
            .build()
            .unwrap();
        let run = run_workflow(&graph, GraphState::new(0), &CancellationToken::new()).await;
        assert_eq!(run.termination, Termination::Completed);
        assert_eq!(run.state.context, 2);
        assert_eq!(run.iterations, 2);
        assert_eq!(run.state.current_step, END);
    }

    #[tokio::test]
    async fn test_dead_end_when_no_edge_matches() {
        let graph = WorkflowGraph::builder("a")
            .node(Counter { name: "a" })
            .conditional_edge("a", END, |s: &GraphState<u32>| s.context > 10)
            .build()
            .unwrap();
        let run = run_workflow(&graph, GraphState::new(0), &CancellationToken::new()).await;
        assert_eq!(run.termination, Termination::DeadEnd { at: "a".into() });
        assert_eq!(run.state.context, 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_executes_nothing() {
        let graph = WorkflowGraph::builder("a")
            .node(Counter { name: "a" })
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = run_workflow(&graph, GraphState::new(0), &cancel).await;
        assert_eq!(run.termination, Termination::Cancelled);
        assert_eq!(run.iterations, 0);
        assert_eq!(run.state.context, 0);
    }
}
