//! Single-agent chat flow on the workflow engine.
//!
//! ```text
//! load_memory -> check_domain -+-> generate -+-> persist
//!                              +-> refuse ---+
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use conclave_state::{AuditStore, RecordFilter, SessionKind, SessionRecord, StoredRecord};

use crate::config::{EngineConfig, ProviderConfig};
use crate::governance::{GovernanceContext, GovernanceGate, GovernanceResult, Proposal};
use crate::graph::{
    run_workflow, GraphNode, GraphResult, GraphState, NodeError, StateUpdate, StepError,
    Termination, WorkflowGraph, END,
};
use crate::obs;
use crate::provider::{generate_with_timeout, ChatMessage, GenerationRequest, TextGenerator};

pub const LOAD_MEMORY: &str = "load_memory";
pub const CHECK_DOMAIN: &str = "check_domain";
pub const GENERATE: &str = "generate";
pub const REFUSE: &str = "refuse";
pub const PERSIST: &str = "persist";

/// Earlier exchanges replayed into each prompt.
pub const MEMORY_TURNS: usize = 5;

const SYSTEM_PROMPT: &str = "You are a careful assistant. Answer plainly, say when you are unsure, \
and never reveal personal data.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub reply: String,
}

/// Typed context threaded through the chat graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    /// Conversation key that memory is loaded and persisted under.
    pub conversation: String,
    pub message: String,
    /// Oldest first.
    pub memory: Vec<Exchange>,
    pub governance: Option<GovernanceResult>,
    pub refused: bool,
    pub reply: Option<String>,
    pub session_id: Option<String>,
}

type Ctx = ChatContext;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

struct LoadMemory {
    store: Arc<dyn AuditStore>,
}

#[async_trait]
impl GraphNode<Ctx> for LoadMemory {
    fn name(&self) -> &str {
        LOAD_MEMORY
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let filter = RecordFilter::sessions(SessionKind::Chat, MEMORY_TURNS)
            .with_subject(&state.context.conversation);
        let records = self.store.read_recent(&filter).await?;
        let mut memory: Vec<Exchange> = records
            .into_iter()
            .filter_map(|record| match record {
                StoredRecord::Session(session) => {
                    serde_json::from_value::<Exchange>(session.payload).ok()
                }
                StoredRecord::Audit(_) => None,
            })
            .collect();
        // read_recent is newest first.
        memory.reverse();
        let mut context = state.context.clone();
        context.memory = memory;
        Ok(StateUpdate::context(context))
    }

    /// Chat without memory rather than not at all.
    fn on_error(&self, _state: &GraphState<Ctx>, _error: &NodeError) -> Option<StateUpdate<Ctx>> {
        Some(StateUpdate::none())
    }
}

struct CheckDomain {
    gate: GovernanceGate,
    context: GovernanceContext,
}

#[async_trait]
impl GraphNode<Ctx> for CheckDomain {
    fn name(&self) -> &str {
        CHECK_DOMAIN
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let proposal = Proposal::new(
            format!("chat-{}", state.context.conversation),
            "chat_message",
            "",
            &state.context.message,
        );
        let governance = self.gate.check(&proposal, &self.context);
        let mut context = state.context.clone();
        context.refused = !governance.approved;
        context.governance = Some(governance);
        Ok(StateUpdate::context(context))
    }
}

struct Generate {
    generator: Arc<dyn TextGenerator>,
    provider: ProviderConfig,
}

#[async_trait]
impl GraphNode<Ctx> for Generate {
    fn name(&self) -> &str {
        GENERATE
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let mut messages = Vec::with_capacity(state.context.memory.len() * 2 + 1);
        for exchange in &state.context.memory {
            messages.push(ChatMessage::user(&exchange.user));
            messages.push(ChatMessage::assistant(&exchange.reply));
        }
        messages.push(ChatMessage::user(&state.context.message));
        let request = GenerationRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            messages,
            temperature: self.provider.temperature,
            max_tokens: self.provider.max_tokens,
        };
        let reply =
            generate_with_timeout(self.generator.as_ref(), request, self.provider.timeout(), cancel)
                .await?;
        let mut context = state.context.clone();
        context.reply = Some(reply.clone());
        Ok(StateUpdate::context(context).with_message(ChatMessage::assistant(reply)))
    }
}

struct Refuse;

#[async_trait]
impl GraphNode<Ctx> for Refuse {
    fn name(&self) -> &str {
        REFUSE
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let reason = state
            .context
            .governance
            .as_ref()
            .map(GovernanceResult::violation_summary)
            .unwrap_or_default();
        let reply = format!("I can't help with that request ({reason}).");
        let mut context = state.context.clone();
        context.reply = Some(reply.clone());
        Ok(StateUpdate::context(context).with_message(ChatMessage::assistant(reply)))
    }
}

struct Persist {
    store: Arc<dyn AuditStore>,
}

#[async_trait]
impl GraphNode<Ctx> for Persist {
    fn name(&self) -> &str {
        PERSIST
    }

    /// Refusals are not remembered; they would only be replayed as noise.
    fn should_execute(&self, state: &GraphState<Ctx>) -> bool {
        !state.context.refused && state.context.reply.is_some()
    }

    async fn execute(
        &self,
        state: &GraphState<Ctx>,
        _cancel: &CancellationToken,
    ) -> Result<StateUpdate<Ctx>, NodeError> {
        let exchange = Exchange {
            user: state.context.message.clone(),
            reply: state.context.reply.clone().unwrap_or_default(),
        };
        let session_id = format!("chat-{}", uuid::Uuid::new_v4());
        self.store
            .append_session(SessionRecord {
                id: session_id.clone(),
                kind: SessionKind::Chat,
                subject: state.context.conversation.clone(),
                created_at: Utc::now(),
                payload: json!(exchange),
            })
            .await?;
        let mut context = state.context.clone();
        context.session_id = Some(session_id);
        Ok(StateUpdate::context(context))
    }

    fn on_error(&self, _state: &GraphState<Ctx>, error: &NodeError) -> Option<StateUpdate<Ctx>> {
        obs::emit_sink_error(PERSIST, error);
        Some(StateUpdate::none())
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Result of one chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub reply: Option<String>,
    pub refused: bool,
    pub governance: Option<GovernanceResult>,
    pub session_id: Option<String>,
    pub remembered_turns: usize,
    pub termination: Termination,
    pub errors: Vec<StepError>,
}

pub struct ChatFlow {
    graph: WorkflowGraph<Ctx>,
}

impl ChatFlow {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn AuditStore>,
        provider: ProviderConfig,
    ) -> GraphResult<Self> {
        Self::with_governance(
            generator,
            store,
            provider,
            EngineConfig::default(),
            GovernanceGate::standard(),
            GovernanceContext::default(),
        )
    }

    /// Use a specific gate and user context for the domain check.
    pub fn with_governance(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn AuditStore>,
        provider: ProviderConfig,
        engine: EngineConfig,
        gate: GovernanceGate,
        context: GovernanceContext,
    ) -> GraphResult<Self> {
        let graph = WorkflowGraph::builder(LOAD_MEMORY)
            .node(LoadMemory {
                store: Arc::clone(&store),
            })
            .node(CheckDomain { gate, context })
            .node(Generate {
                generator,
                provider,
            })
            .node(Refuse)
            .node(Persist { store })
            .edge(LOAD_MEMORY, CHECK_DOMAIN)
            .conditional_edge(CHECK_DOMAIN, REFUSE, |s: &GraphState<Ctx>| s.context.refused)
            .edge(CHECK_DOMAIN, GENERATE)
            .edge(GENERATE, PERSIST)
            .edge(REFUSE, PERSIST)
            .edge(PERSIST, END)
            .max_iterations(engine.max_iterations)
            .build()?;
        Ok(Self { graph })
    }

    /// Answer `message` within `conversation`.
    #[instrument(skip_all, fields(conversation = %conversation))]
    pub async fn respond(
        &self,
        conversation: &str,
        message: &str,
        cancel: &CancellationToken,
    ) -> ChatTurn {
        let initial = GraphState::new(ChatContext {
            conversation: conversation.to_string(),
            message: message.to_string(),
            ..ChatContext::default()
        })
        .with_message(ChatMessage::user(message));
        let run = run_workflow(&self.graph, initial, cancel).await;
        if !run.termination.is_normal() {
            warn!(termination = %run.termination, "chat turn ended early");
        }
        let context = run.state.context;
        ChatTurn {
            reply: context.reply,
            refused: context.refused,
            governance: context.governance,
            session_id: context.session_id,
            remembered_turns: context.memory.len(),
            termination: run.termination,
            errors: run.state.errors,
        }
    }
}
