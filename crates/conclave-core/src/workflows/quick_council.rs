//! Single-query council without voting, built on the workflow engine.
//!
//! ```text
//! prepare -> generate_perspectives -> detect_novelty -+-> synthesize ------+-> finalize
//!                                                     +-> handle_deadlock -+
//! ```
//!
//! The first perspective is the baseline. A later perspective is novel when
//! its word-set Jaccard similarity to every earlier one is below the
//! similarity threshold. With no novel contribution there is nothing to
//! synthesize and the run reports a deadlock instead.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use conclave_state::{AuditStore, SessionKind, SessionRecord};

use crate::config::{CouncilConfig, EngineConfig};
use crate::council::prompts::system_prompt;
use crate::council::CouncilAgent;
use crate::governance::{GovernanceContext, GovernanceGate, GovernanceResult, Proposal};
use crate::graph::engine::panic_message;
use crate::graph::{
    run_workflow, GraphNode, GraphResult, GraphState, NodeError, StateUpdate, StepError,
    Termination, WorkflowGraph, END,
};
use crate::obs;
use crate::provider::{generate_with_timeout, ChatMessage, GenerationRequest, TextGenerator};

pub const PREPARE: &str = "prepare";
pub const GENERATE_PERSPECTIVES: &str = "generate_perspectives";
pub const DETECT_NOVELTY: &str = "detect_novelty";
pub const SYNTHESIZE: &str = "synthesize";
pub const HANDLE_DEADLOCK: &str = "handle_deadlock";
pub const FINALIZE: &str = "finalize";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perspective {
    pub agent_id: String,
    pub content: String,
}

/// Typed context threaded through the quick council graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuickCouncilContext {
    pub query: String,
    pub agents: Vec<CouncilAgent>,
    pub perspectives: Vec<Perspective>,
    /// Agent ids whose perspective added something new.
    pub novel: Vec<String>,
    pub deadlocked: bool,
    pub outcome: Option<String>,
    pub governance: Option<GovernanceResult>,
}

/// Word-set Jaccard similarity in `0..=1`. Two empty texts are identical.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    fn words(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
    let (a, b) = (words(a), words(b));
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Ids of perspectives dissimilar to every earlier one. The first
/// perspective is the baseline and never counts as novel.
pub fn novel_contributions(perspectives: &[Perspective], threshold: f64) -> Vec<String> {
    perspectives
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(i, p)| {
            perspectives[..*i]
                .iter()
                .all(|earlier| jaccard_similarity(&p.content, &earlier.content) < threshold)
        })
        .map(|(_, p)| p.agent_id.clone())
        .collect()
}

type Ctx = QuickCouncilContext;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

struct Prepare;

#[async_trait]
impl GraphNode<Ctx> for Prepare {
    fn name(&self) -> &str {
        PREPARE
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let query = state.context.query.trim();
        if query.is_empty() {
            return Err(NodeError::Failed("query is empty".to_string()));
        }
        if state.context.agents.is_empty() {
            return Err(NodeError::Failed("no council members".to_string()));
        }
        let mut context = state.context.clone();
        context.query = query.to_string();
        Ok(StateUpdate::context(context).with_message(ChatMessage::user(query)))
    }
}

struct GeneratePerspectives {
    generator: Arc<dyn TextGenerator>,
    config: CouncilConfig,
}

#[async_trait]
impl GraphNode<Ctx> for GeneratePerspectives {
    fn name(&self) -> &str {
        GENERATE_PERSPECTIVES
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let query = &state.context.query;
        let calls = state.context.agents.iter().map(|agent| {
            let request = GenerationRequest::new(
                system_prompt(agent),
                format!("Give your own perspective on:\n{query}"),
            )
            .with_temperature(self.config.temperature);
            let call = generate_with_timeout(
                self.generator.as_ref(),
                request,
                self.config.call_timeout(),
                cancel,
            );
            async move {
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(panic) => Err(panic_message(panic)),
                }
            }
        });
        let replies = join_all(calls).await;

        let mut context = state.context.clone();
        let mut failures = Vec::new();
        for (agent, reply) in state.context.agents.iter().zip(replies) {
            match reply {
                Ok(content) => context.perspectives.push(Perspective {
                    agent_id: agent.id.clone(),
                    content,
                }),
                Err(error) => {
                    warn!(agent_id = %agent.id, error = %error, "perspective unavailable");
                    failures.push(json!({"agent_id": agent.id, "error": error}));
                }
            }
        }
        if context.perspectives.is_empty() {
            return Err(NodeError::Failed(format!(
                "all {} perspective calls failed",
                failures.len()
            )));
        }
        Ok(StateUpdate::context(context).with_metadata("perspective_failures", json!(failures)))
    }

    /// Zero perspectives is survivable: novelty detection finds nothing and
    /// the run ends in a reported deadlock.
    fn on_error(&self, _state: &GraphState<Ctx>, error: &NodeError) -> Option<StateUpdate<Ctx>> {
        Some(StateUpdate::none().with_metadata("perspective_error", json!(error.to_string())))
    }
}

struct DetectNovelty {
    similarity_threshold: f64,
}

#[async_trait]
impl GraphNode<Ctx> for DetectNovelty {
    fn name(&self) -> &str {
        DETECT_NOVELTY
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let mut context = state.context.clone();
        context.novel = novel_contributions(&context.perspectives, self.similarity_threshold);
        Ok(StateUpdate::context(context))
    }
}

struct Synthesize {
    generator: Arc<dyn TextGenerator>,
    config: CouncilConfig,
}

fn render_perspectives(context: &Ctx) -> String {
    context
        .perspectives
        .iter()
        .map(|p| format!("[{}] {}", p.agent_id, p.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl GraphNode<Ctx> for Synthesize {
    fn name(&self) -> &str {
        SYNTHESIZE
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let request = GenerationRequest::new(
            "You synthesize a council's perspectives into one balanced answer. \
             Keep every distinct point that survives scrutiny.",
            format!(
                "Question:\n{}\n\nPerspectives:\n{}\n\nWrite the synthesis.",
                state.context.query,
                render_perspectives(&state.context)
            ),
        )
        .with_temperature(self.config.temperature);
        let text =
            generate_with_timeout(self.generator.as_ref(), request, self.config.call_timeout(), cancel)
                .await?;
        let mut context = state.context.clone();
        context.outcome = Some(text.clone());
        Ok(StateUpdate::context(context).with_message(ChatMessage::assistant(text)))
    }

    /// Fall back to presenting the perspectives side by side.
    fn on_error(&self, state: &GraphState<Ctx>, _error: &NodeError) -> Option<StateUpdate<Ctx>> {
        let mut context = state.context.clone();
        context.outcome = Some(format!(
            "Synthesis unavailable. Perspectives:\n{}",
            render_perspectives(&context)
        ));
        Some(StateUpdate::context(context))
    }
}

struct HandleDeadlock;

#[async_trait]
impl GraphNode<Ctx> for HandleDeadlock {
    fn name(&self) -> &str {
        HANDLE_DEADLOCK
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let mut context = state.context.clone();
        context.deadlocked = true;
        let message = format!(
            "The council reached no consensus: {} of {} members offered a perspective and none added a novel contribution.",
            context.perspectives.len(),
            context.agents.len()
        );
        context.outcome = Some(message.clone());
        Ok(StateUpdate::context(context).with_message(ChatMessage::assistant(message)))
    }
}

struct Finalize {
    gate: GovernanceGate,
    sink: Option<Arc<dyn AuditStore>>,
}

#[async_trait]
impl GraphNode<Ctx> for Finalize {
    fn name(&self) -> &str {
        FINALIZE
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let mut context = state.context.clone();
        let outcome = context.outcome.clone().unwrap_or_default();
        let session_id = format!("quick-{}", uuid::Uuid::new_v4());
        let proposal = Proposal::new(&session_id, "council_outcome", &context.query, &outcome);
        let governance = self.gate.check(&proposal, &GovernanceContext::default());
        if !governance.approved {
            context.outcome = Some(format!(
                "Outcome withheld by governance: {}",
                governance.violation_summary()
            ));
        }
        context.governance = Some(governance);

        if let Some(sink) = &self.sink {
            let record = SessionRecord {
                id: session_id.clone(),
                kind: SessionKind::QuickCouncil,
                subject: context.query.clone(),
                created_at: Utc::now(),
                payload: serde_json::to_value(&context)
                    .map_err(|e| NodeError::Failed(e.to_string()))?,
            };
            sink.append_session(record).await?;
        }
        Ok(StateUpdate::context(context).with_metadata("session_id", json!(session_id)))
    }

    /// A persistence failure is logged; the gated outcome stands.
    fn on_error(&self, _state: &GraphState<Ctx>, error: &NodeError) -> Option<StateUpdate<Ctx>> {
        obs::emit_sink_error(FINALIZE, error);
        Some(StateUpdate::none())
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// What a quick council run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickCouncilOutcome {
    pub run_id: String,
    pub query: String,
    pub perspectives: Vec<Perspective>,
    pub novel: Vec<String>,
    pub deadlocked: bool,
    pub outcome: Option<String>,
    pub governance: Option<GovernanceResult>,
    pub termination: Termination,
    pub errors: Vec<StepError>,
}

/// The six-node quick council graph, reusable across runs.
pub struct QuickCouncil {
    graph: WorkflowGraph<Ctx>,
}

impl QuickCouncil {
    pub fn new(generator: Arc<dyn TextGenerator>, config: CouncilConfig) -> GraphResult<Self> {
        Self::with_parts(
            generator,
            config,
            EngineConfig::default(),
            GovernanceGate::standard(),
            None,
        )
    }

    pub fn with_parts(
        generator: Arc<dyn TextGenerator>,
        config: CouncilConfig,
        engine: EngineConfig,
        gate: GovernanceGate,
        sink: Option<Arc<dyn AuditStore>>,
    ) -> GraphResult<Self> {
        let graph = WorkflowGraph::builder(PREPARE)
            .node(Prepare)
            .node(GeneratePerspectives {
                generator: Arc::clone(&generator),
                config: config.clone(),
            })
            .node(DetectNovelty {
                similarity_threshold: config.similarity_threshold,
            })
            .node(Synthesize {
                generator,
                config,
            })
            .node(HandleDeadlock)
            .node(Finalize { gate, sink })
            .edge(PREPARE, GENERATE_PERSPECTIVES)
            .edge(GENERATE_PERSPECTIVES, DETECT_NOVELTY)
            .conditional_edge(DETECT_NOVELTY, SYNTHESIZE, |s: &GraphState<Ctx>| {
                !s.context.novel.is_empty()
            })
            .edge(DETECT_NOVELTY, HANDLE_DEADLOCK)
            .edge(SYNTHESIZE, FINALIZE)
            .edge(HANDLE_DEADLOCK, FINALIZE)
            .edge(FINALIZE, END)
            .max_iterations(engine.max_iterations)
            .build()?;
        Ok(Self { graph })
    }

    pub fn graph(&self) -> &WorkflowGraph<Ctx> {
        &self.graph
    }

    #[instrument(skip_all, fields(agents = agents.len()))]
    pub async fn run(
        &self,
        query: &str,
        agents: &[CouncilAgent],
        cancel: &CancellationToken,
    ) -> QuickCouncilOutcome {
        let initial = GraphState::new(QuickCouncilContext {
            query: query.to_string(),
            agents: agents.to_vec(),
            ..QuickCouncilContext::default()
        });
        let run = run_workflow(&self.graph, initial, cancel).await;
        let context = run.state.context;
        QuickCouncilOutcome {
            run_id: run.run_id,
            query: context.query,
            perspectives: context.perspectives,
            novel: context.novel,
            deadlocked: context.deadlocked,
            outcome: context.outcome,
            governance: context.governance,
            termination: run.termination,
            errors: run.state.errors,
        }
    }
}
