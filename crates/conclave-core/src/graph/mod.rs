//! Generic workflow graph engine.
//!
//! Nodes are registered under unique names and joined by edges carrying
//! optional predicates. [`run_workflow`] walks the graph one node at a time,
//! merging each node's [`StateUpdate`] into the run's [`GraphState`].

pub mod engine;
pub mod error;
pub mod state;

pub use engine::{
    run_workflow, EdgeCondition, GraphEdge, GraphNode, Termination, WorkflowGraph,
    WorkflowGraphBuilder, WorkflowRun, DEFAULT_MAX_ITERATIONS, END,
};
pub use error::{GraphError, GraphResult, NodeError};
pub use state::{GraphState, StateUpdate, StepError};
