//! Integration tests for the workflow graph engine.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use conclave_core::graph::{
    run_workflow, GraphNode, GraphState, NodeError, StateUpdate, Termination, WorkflowGraph, END,
};

/// Counts its own executions in the context.
struct Counter(&'static str);

#[async_trait]
impl GraphNode<u32> for Counter {
    fn name(&self) -> &str {
        self.0
    }

    async fn execute(
        &self,
        state: &GraphState<u32>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<u32>, NodeError> {
        Ok(StateUpdate::context(state.context + 1))
    }
}

/// Always fails; optionally recovers by adding 100.
struct Flaky {
    recover: bool,
}

#[async_trait]
impl GraphNode<u32> for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn execute(
        &self,
        _state: &GraphState<u32>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<u32>, NodeError> {
        Err(NodeError::Failed("upstream unavailable".to_string()))
    }

    fn on_error(&self, state: &GraphState<u32>, _error: &NodeError) -> Option<StateUpdate<u32>> {
        self.recover
            .then(|| StateUpdate::context(state.context + 100))
    }
}

/// Skips itself once the counter passes a limit.
struct Guarded;

#[async_trait]
impl GraphNode<u32> for Guarded {
    fn name(&self) -> &str {
        "guarded"
    }

    fn should_execute(&self, state: &GraphState<u32>) -> bool {
        state.context < 2
    }

    async fn execute(
        &self,
        _state: &GraphState<u32>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<u32>, NodeError> {
        Ok(StateUpdate::context(1000))
    }
}

#[tokio::test]
async fn self_loop_stops_at_iteration_ceiling() {
    let graph = WorkflowGraph::builder("tick")
        .node(Counter("tick"))
        .edge("tick", "tick")
        .build()
        .expect("build");

    let run = run_workflow(&graph, GraphState::new(0), &CancellationToken::new()).await;

    assert_eq!(run.termination, Termination::IterationLimit);
    assert_eq!(run.iterations, 20);
    assert_eq!(run.state.context, 20);
    assert!(run.state.errors.is_empty());
}

#[tokio::test]
async fn custom_ceiling_is_honored() {
    let graph = WorkflowGraph::builder("tick")
        .node(Counter("tick"))
        .edge("tick", "tick")
        .max_iterations(3)
        .build()
        .expect("build");

    let run = run_workflow(&graph, GraphState::new(0), &CancellationToken::new()).await;
    assert_eq!(run.iterations, 3);
    assert_eq!(run.state.context, 3);
}

#[tokio::test]
async fn conditional_edges_are_tested_in_declaration_order() {
    let graph = WorkflowGraph::builder("tick")
        .node(Counter("tick"))
        .node(Counter("done"))
        .conditional_edge("tick", "done", |s: &GraphState<u32>| s.context >= 3)
        .edge("tick", "tick")
        .edge("done", END)
        .build()
        .expect("build");

    let run = run_workflow(&graph, GraphState::new(0), &CancellationToken::new()).await;
    assert_eq!(run.termination, Termination::Completed);
    // three ticks, then one pass through "done"
    assert_eq!(run.state.context, 4);
    assert_eq!(run.iterations, 4);
}

#[tokio::test]
async fn failure_with_recovery_continues() {
    let graph = WorkflowGraph::builder("flaky")
        .node(Flaky { recover: true })
        .node(Counter("after"))
        .edge("flaky", "after")
        .edge("after", END)
        .build()
        .expect("build");

    let run = run_workflow(&graph, GraphState::new(0), &CancellationToken::new()).await;
    assert_eq!(run.termination, Termination::Completed);
    assert_eq!(run.state.context, 101);
    assert_eq!(run.state.errors.len(), 1);
    assert_eq!(run.state.errors[0].step, "flaky");
    assert!(run.state.errors[0].error.contains("upstream unavailable"));
}

#[tokio::test]
async fn failure_without_recovery_halts() {
    let graph = WorkflowGraph::builder("flaky")
        .node(Flaky { recover: false })
        .node(Counter("after"))
        .edge("flaky", "after")
        .build()
        .expect("build");

    let run = run_workflow(&graph, GraphState::new(7), &CancellationToken::new()).await;
    assert_eq!(
        run.termination,
        Termination::Halted {
            node: "flaky".to_string()
        }
    );
    assert_eq!(run.state.context, 7);
    assert_eq!(run.state.errors.len(), 1);
}

#[tokio::test]
async fn skip_guard_advances_without_executing() {
    let graph = WorkflowGraph::builder("guarded")
        .node(Guarded)
        .node(Counter("after"))
        .edge("guarded", "after")
        .edge("after", END)
        .build()
        .expect("build");

    let run = run_workflow(&graph, GraphState::new(5), &CancellationToken::new()).await;
    assert_eq!(run.termination, Termination::Completed);
    assert_eq!(run.state.context, 6);
    assert_eq!(run.iterations, 2);
}
