//! Conclave Core Library
//!
//! Multi-agent orchestration under audit and governance: a workflow graph
//! engine, a dependency-wave plan executor, a weighted council consensus
//! protocol, and the governance gate every output must pass.

pub mod config;
pub mod council;
pub mod domain;
pub mod fakes;
pub mod governance;
pub mod graph;
pub mod metrics;
pub mod obs;
pub mod plan;
pub mod provider;
pub mod telemetry;
pub mod workflows;

pub use config::{
    ConclaveConfig, CouncilConfig, EngineConfig, LoggingConfig, PlanConfig, ProviderConfig,
};

pub use domain::{ConclaveError, Result};

pub use graph::{
    run_workflow, GraphError, GraphNode, GraphState, NodeError, StateUpdate, Termination,
    WorkflowGraph, WorkflowRun, END,
};

pub use plan::{
    HandlerRegistry, MessageEnvelope, OrchestrationResult, Plan, PlanError, PlanExecutor,
    PlanStep, StepHandler,
};

pub use council::{
    run_council, tally_votes, AgentVote, Council, CouncilAgent, CouncilError, CouncilResult,
    VoteChoice,
};

pub use governance::{
    check_proposal, sanitize_proposal, GovernanceContext, GovernanceGate, GovernanceResult,
    Proposal,
};

pub use workflows::{ChatFlow, QuickCouncil, QuickCouncilOutcome};

pub use provider::{GenerationRequest, HttpTextGenerator, ProviderError, TextGenerator};

pub use metrics::METRICS;
pub use obs::run_span;
pub use telemetry::init_tracing;

/// Conclave version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
