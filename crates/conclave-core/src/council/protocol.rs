//! The three-phase council session: analysis, deliberation, voting.
//!
//! Phases are strictly ordered because each prompt embeds the previous
//! phase's transcript; within a phase every member is asked concurrently and
//! the phase joins before the next one starts.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use conclave_state::{AuditStore, SessionKind, SessionRecord};

use crate::config::CouncilConfig;
use crate::council::agent::CouncilAgent;
use crate::council::consensus::tally_votes;
use crate::council::error::CouncilError;
use crate::council::parsing::{cited_principles, extract_confidence, parse_vote, summary_line};
use crate::council::prompts;
use crate::council::vote::{AgentDeliberation, AgentVote, DeliberationPhase};
use crate::governance::{GovernanceContext, GovernanceGate, GovernanceResult, Proposal};
use crate::graph::engine::panic_message;
use crate::metrics::METRICS;
use crate::obs;
use crate::provider::{generate_with_timeout, GenerationRequest, TextGenerator};

/// A provider failure attributed to one member in one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouncilPhaseError {
    pub agent_id: String,
    pub phase: DeliberationPhase,
    pub error: String,
}

/// Full outcome of a session, transcript included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilResult {
    pub session_id: String,
    pub query: String,
    pub threshold: f64,
    pub total_votes: usize,
    pub approve_count: usize,
    pub reject_count: usize,
    pub abstain_count: usize,
    pub conditional_count: usize,
    pub weighted_approval: f64,
    pub consensus_reached: bool,
    pub final_recommendation: String,
    pub deliberations: Vec<AgentDeliberation>,
    pub votes: Vec<AgentVote>,
    pub errors: Vec<CouncilPhaseError>,
    pub governance: GovernanceResult,
}

impl CouncilResult {
    /// Transcript entries of one phase, in member order.
    pub fn phase(&self, phase: DeliberationPhase) -> impl Iterator<Item = &AgentDeliberation> {
        self.deliberations.iter().filter(move |d| d.phase == phase)
    }
}

/// Runs council sessions against a text generator.
pub struct Council {
    generator: Arc<dyn TextGenerator>,
    config: CouncilConfig,
    gate: GovernanceGate,
    sink: Option<Arc<dyn AuditStore>>,
}

impl Council {
    pub fn new(generator: Arc<dyn TextGenerator>, config: CouncilConfig) -> Self {
        Self {
            generator,
            config,
            gate: GovernanceGate::standard(),
            sink: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.config.threshold = threshold;
        self
    }

    pub fn with_gate(mut self, gate: GovernanceGate) -> Self {
        self.gate = gate;
        self
    }

    /// Append every finished session to `sink`. Sink failures are logged only.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditStore>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    fn validate(&self, agents: &[CouncilAgent]) -> Result<(), CouncilError> {
        let threshold = self.config.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CouncilError::InvalidThreshold(threshold));
        }
        if agents.is_empty() {
            return Err(CouncilError::NoAgents);
        }
        let mut seen = HashSet::new();
        for agent in agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(CouncilError::DuplicateAgent {
                    id: agent.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Run one session over `query`.
    ///
    /// Only an invalid setup is an `Err`. Failed provider calls are listed in
    /// `errors`; a vote that cannot be obtained or parsed is an abstention
    /// with zero weight.
    #[instrument(skip_all, fields(session_id = tracing::field::Empty, agents = agents.len()))]
    pub async fn run(
        &self,
        query: &str,
        agents: &[CouncilAgent],
        cancel: &CancellationToken,
    ) -> Result<CouncilResult, CouncilError> {
        self.validate(agents)?;
        let session_id = format!("council-{}", uuid::Uuid::new_v4());
        tracing::Span::current().record("session_id", session_id.as_str());
        METRICS.inc_council_sessions();

        let mut deliberations: Vec<AgentDeliberation> = Vec::new();
        let mut errors: Vec<CouncilPhaseError> = Vec::new();

        // Phase 1: independent analysis.
        let replies = self
            .ask_all(agents, cancel, |agent| prompts::analysis_prompt(agent, query))
            .await;
        let analyses = self.collect_phase(
            &session_id,
            DeliberationPhase::Analysis,
            agents,
            replies,
            &mut deliberations,
            &mut errors,
        );

        // Phase 2: cross-informed deliberation.
        let analysis_transcript = prompts::transcript(agents, &analyses);
        let replies = self
            .ask_all(agents, cancel, |agent| {
                prompts::deliberation_prompt(agent, query, &analysis_transcript)
            })
            .await;
        let rounds = self.collect_phase(
            &session_id,
            DeliberationPhase::Deliberation,
            agents,
            replies,
            &mut deliberations,
            &mut errors,
        );

        // Phase 3: structured votes.
        let deliberation_transcript = prompts::transcript(agents, &rounds);
        let replies = self
            .ask_all(agents, cancel, |agent| {
                prompts::voting_prompt(agent, query, &deliberation_transcript)
            })
            .await;
        let mut votes = Vec::with_capacity(agents.len());
        for (agent, reply) in agents.iter().zip(replies) {
            match reply {
                Ok(text) => {
                    let vote = parse_vote(agent, &text);
                    deliberations.push(AgentDeliberation {
                        agent_id: agent.id.clone(),
                        phase: DeliberationPhase::Voting,
                        content: text,
                        reasoning: vote.reasoning.clone(),
                        confidence: vote.confidence,
                        cited_principles: cited_principles(&vote.reasoning),
                    });
                    votes.push(vote);
                }
                Err(error) => {
                    warn!(agent_id = %agent.id, error = %error, "vote unavailable");
                    votes.push(AgentVote::abstain(&agent.id, format!("vote unavailable: {error}")));
                    errors.push(CouncilPhaseError {
                        agent_id: agent.id.clone(),
                        phase: DeliberationPhase::Voting,
                        error,
                    });
                }
            }
        }
        let vote_errors = errors
            .iter()
            .filter(|e| e.phase == DeliberationPhase::Voting)
            .count();
        obs::emit_council_phase(&session_id, "voting", votes.len(), vote_errors);

        let outcome = tally_votes(&votes, self.config.threshold);
        let governance =
            self.gate_recommendation(&session_id, query, &outcome.final_recommendation, &votes);
        let final_recommendation = if governance.approved {
            outcome.final_recommendation
        } else {
            format!(
                "[blocked by governance: {}] {}",
                governance.violation_summary(),
                outcome.final_recommendation
            )
        };

        let result = CouncilResult {
            session_id,
            query: query.to_string(),
            threshold: self.config.threshold,
            total_votes: outcome.total_votes,
            approve_count: outcome.approve_count,
            reject_count: outcome.reject_count,
            abstain_count: outcome.abstain_count,
            conditional_count: outcome.conditional_count,
            weighted_approval: outcome.weighted_approval,
            consensus_reached: outcome.consensus_reached,
            final_recommendation,
            deliberations,
            votes,
            errors,
            governance,
        };

        obs::emit_council_finished(
            &result.session_id,
            result.weighted_approval,
            result.consensus_reached,
        );
        self.persist(&result).await;
        METRICS.flush();
        Ok(result)
    }

    /// One bounded call per member, all in flight at once. Replies come back
    /// in member order; a panic inside the provider becomes an error string.
    async fn ask_all<F>(
        &self,
        agents: &[CouncilAgent],
        cancel: &CancellationToken,
        user_prompt: F,
    ) -> Vec<Result<String, String>>
    where
        F: Fn(&CouncilAgent) -> String,
    {
        let timeout = self.config.call_timeout();
        let calls = agents.iter().map(|agent| {
            let request = GenerationRequest::new(prompts::system_prompt(agent), user_prompt(agent))
                .with_temperature(self.config.temperature);
            let call = generate_with_timeout(self.generator.as_ref(), request, timeout, cancel);
            async move {
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(Ok(text)) => Ok(text),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(panic) => Err(format!("provider panicked: {}", panic_message(panic))),
                }
            }
        });
        join_all(calls).await
    }

    /// Record one free-text phase. Returns that phase's entries for the next
    /// transcript.
    fn collect_phase<'a>(
        &self,
        session_id: &str,
        phase: DeliberationPhase,
        agents: &[CouncilAgent],
        replies: Vec<Result<String, String>>,
        deliberations: &'a mut Vec<AgentDeliberation>,
        errors: &mut Vec<CouncilPhaseError>,
    ) -> Vec<&'a AgentDeliberation> {
        let first = deliberations.len();
        let mut failed = 0;
        for (agent, reply) in agents.iter().zip(replies) {
            match reply {
                Ok(content) => deliberations.push(AgentDeliberation {
                    agent_id: agent.id.clone(),
                    phase,
                    reasoning: summary_line(&content),
                    confidence: extract_confidence(&content).unwrap_or_else(|| agent.weight()),
                    cited_principles: cited_principles(&content),
                    content,
                }),
                Err(error) => {
                    failed += 1;
                    warn!(agent_id = %agent.id, phase = %phase, error = %error, "council call failed");
                    errors.push(CouncilPhaseError {
                        agent_id: agent.id.clone(),
                        phase,
                        error,
                    });
                }
            }
        }
        obs::emit_council_phase(session_id, &phase.to_string(), deliberations.len() - first, failed);
        deliberations[first..].iter().collect()
    }

    fn gate_recommendation(
        &self,
        session_id: &str,
        query: &str,
        recommendation: &str,
        votes: &[AgentVote],
    ) -> GovernanceResult {
        let proposal = Proposal::new(session_id, "council_recommendation", query, recommendation)
            .with_payload(json!({
                "votes": votes
                    .iter()
                    .map(|v| json!({
                        "agent_id": v.agent_id,
                        "vote": v.vote,
                        "reasoning": v.reasoning,
                        "conditions": v.conditions,
                    }))
                    .collect::<Vec<_>>(),
            }));
        self.gate.check(&proposal, &GovernanceContext::default())
    }

    async fn persist(&self, result: &CouncilResult) {
        let Some(sink) = &self.sink else {
            return;
        };
        let outcome = match serde_json::to_value(result) {
            Ok(payload) => sink
                .append_session(SessionRecord {
                    id: result.session_id.clone(),
                    kind: SessionKind::Council,
                    subject: result.query.clone(),
                    created_at: Utc::now(),
                    payload,
                })
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(err) = outcome {
            obs::emit_sink_error(&result.session_id, &err);
        }
    }
}

/// Run a session with default settings and the given threshold.
pub async fn run_council(
    generator: Arc<dyn TextGenerator>,
    query: &str,
    agents: &[CouncilAgent],
    threshold: f64,
    cancel: &CancellationToken,
) -> Result<CouncilResult, CouncilError> {
    Council::new(generator, CouncilConfig::default())
        .with_threshold(threshold)
        .run(query, agents, cancel)
        .await
}
