//! Role handlers for plan steps.
//!
//! A [`HandlerRegistry`] maps an open role tag to a [`StepHandler`]; adding a
//! role means registering a handler, not editing a dispatch match.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::plan::envelope::{EnvelopeOutputs, MessageEnvelope, RiskAssessment};
use crate::plan::error::StepFailure;
use crate::plan::heuristics;
use crate::plan::model::PlanStep;
use crate::provider::{generate_with_timeout, GenerationRequest, TextGenerator};

/// Everything a handler needs to run one step. Owned so it can move into a
/// spawned task.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub task_id: String,
    pub objective: String,
    pub step: PlanStep,
    /// Envelopes of the step's dependencies, in dependency order.
    pub upstream: Vec<MessageEnvelope>,
    pub timeout: Duration,
}

impl StepInput {
    /// User message: the action, its acceptance criteria and upstream claims.
    pub fn prompt(&self) -> String {
        let mut prompt = String::new();
        if !self.objective.is_empty() {
            prompt.push_str(&format!("Objective: {}\n", self.objective));
        }
        prompt.push_str(&format!("Task: {}\n", self.step.action));
        if !self.step.acceptance_criteria.is_empty() {
            prompt.push_str("Acceptance criteria:\n");
            for criterion in &self.step.acceptance_criteria {
                prompt.push_str(&format!("- {criterion}\n"));
            }
        }
        for envelope in &self.upstream {
            prompt.push_str(&format!("\nInput from {} ({}):\n", envelope.step_id, envelope.actor));
            for claim in &envelope.outputs.claims {
                prompt.push_str(&format!("- {claim}\n"));
            }
            for citation in &envelope.outputs.citations {
                prompt.push_str(&format!("  source: {citation}\n"));
            }
        }
        prompt
    }
}

/// What a handler produced; the executor seals it into an envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub outputs: EnvelopeOutputs,
    pub risk: RiskAssessment,
    pub confidence: f64,
    pub tools: Vec<String>,
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Role tag this handler serves.
    fn role(&self) -> &str;

    async fn handle(
        &self,
        input: &StepInput,
        generator: &dyn TextGenerator,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepFailure>;
}

const TEXT_GENERATION_TOOL: &str = "text_generation";

async fn generate(
    system_prompt: &str,
    input: &StepInput,
    generator: &dyn TextGenerator,
    cancel: &CancellationToken,
) -> Result<String, StepFailure> {
    let request = GenerationRequest::new(system_prompt, input.prompt());
    Ok(generate_with_timeout(generator, request, input.timeout, cancel).await?)
}

fn base_output(text: &str, citations: Vec<String>) -> StepOutput {
    let hallucination = heuristics::hallucination_risk(text, &citations);
    StepOutput {
        outputs: EnvelopeOutputs {
            claims: heuristics::extract_claims(text),
            artifacts: vec![text.to_string()],
            citations,
        },
        risk: RiskAssessment {
            hallucination,
            ..RiskAssessment::default()
        },
        confidence: 1.0 - hallucination,
        tools: vec![TEXT_GENERATION_TOOL.to_string()],
    }
}

/// Gathers facts with sources. Scans for personal data and cited URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResearcherHandler;

const RESEARCHER_PROMPT: &str = "You are a meticulous researcher. Gather the facts needed for \
the task, cite every source with a full URL, and flag anything you could not verify.";

#[async_trait]
impl StepHandler for ResearcherHandler {
    fn role(&self) -> &str {
        "researcher"
    }

    async fn handle(
        &self,
        input: &StepInput,
        generator: &dyn TextGenerator,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepFailure> {
        let text = generate(RESEARCHER_PROMPT, input, generator, cancel).await?;
        let citations = heuristics::extract_citations(&text);
        let mut output = base_output(&text, citations);
        output.risk.pii = heuristics::detect_pii(&text);
        Ok(output)
    }
}

/// Produces the artifact. Scans for licensing markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreatorHandler;

const CREATOR_PROMPT: &str = "You are a careful creator. Produce the requested artifact from \
the provided inputs. Do not invent facts that the inputs do not support.";

#[async_trait]
impl StepHandler for CreatorHandler {
    fn role(&self) -> &str {
        "creator"
    }

    async fn handle(
        &self,
        input: &StepInput,
        generator: &dyn TextGenerator,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepFailure> {
        let text = generate(CREATOR_PROMPT, input, generator, cancel).await?;
        // Creators build on upstream research, so inherited sources count.
        let mut citations = heuristics::extract_citations(&text);
        for envelope in &input.upstream {
            for c in &envelope.outputs.citations {
                if !citations.contains(c) {
                    citations.push(c.clone());
                }
            }
        }
        let mut output = base_output(&text, citations);
        output.risk.licensing = heuristics::licensing_flags(&text);
        Ok(output)
    }
}

/// Reviews upstream work. Raises safety flags on fact-check keywords.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriticHandler;

const CRITIC_PROMPT: &str = "You are a rigorous critic. Review the inputs against the \
acceptance criteria. Call out unverified or misleading claims explicitly.";

#[async_trait]
impl StepHandler for CriticHandler {
    fn role(&self) -> &str {
        "critic"
    }

    async fn handle(
        &self,
        input: &StepInput,
        generator: &dyn TextGenerator,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepFailure> {
        let text = generate(CRITIC_PROMPT, input, generator, cancel).await?;
        let mut output = base_output(&text, heuristics::extract_citations(&text));
        output.risk.safety_flags = heuristics::fact_check_flags(&text);
        Ok(output)
    }
}

/// Fallback for role tags without a dedicated handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericHandler;

#[async_trait]
impl StepHandler for GenericHandler {
    fn role(&self) -> &str {
        "*"
    }

    async fn handle(
        &self,
        input: &StepInput,
        generator: &dyn TextGenerator,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepFailure> {
        let system = format!(
            "You are acting as the {} on a multi-agent team. Complete the task precisely.",
            input.step.agent_role
        );
        let text = generate(&system, input, generator, cancel).await?;
        Ok(base_output(&text, heuristics::extract_citations(&text)))
    }
}

/// Role tag to handler map, with an optional fallback.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    fallback: Option<Arc<dyn StepHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut roles: Vec<&String> = self.handlers.keys().collect();
        roles.sort();
        f.debug_struct("HandlerRegistry")
            .field("roles", &roles)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl HandlerRegistry {
    /// An empty registry: every role must be registered explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Researcher, creator and critic, plus the generic fallback.
    pub fn standard() -> Self {
        Self::new()
            .register(ResearcherHandler)
            .register(CreatorHandler)
            .register(CriticHandler)
            .with_fallback(GenericHandler)
    }

    /// Register under the handler's own role tag (case-insensitive).
    pub fn register(mut self, handler: impl StepHandler + 'static) -> Self {
        self.handlers
            .insert(handler.role().to_lowercase(), Arc::new(handler));
        self
    }

    pub fn with_fallback(mut self, handler: impl StepHandler + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    pub fn resolve(&self, role: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .get(&role.to_lowercase())
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn handles(&self, role: &str) -> bool {
        self.fallback.is_some() || self.handlers.contains_key(&role.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedGenerator;

    fn input(role: &str) -> StepInput {
        StepInput {
            task_id: "t".into(),
            objective: "Write a brief".into(),
            step: PlanStep::new("s", role, "Summarize the topic").with_criterion("cite sources"),
            upstream: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_registry_resolution() {
        let registry = HandlerRegistry::standard();
        assert_eq!(registry.resolve("Researcher").unwrap().role(), "researcher");
        assert_eq!(registry.resolve("translator").unwrap().role(), "*");

        let strict = HandlerRegistry::standard().without_fallback();
        assert!(strict.resolve("translator").is_none());
        assert!(!strict.handles("translator"));
        assert!(strict.handles("CRITIC"));
    }

    #[test]
    fn test_prompt_includes_criteria() {
        let prompt = input("researcher").prompt();
        assert!(prompt.contains("Task: Summarize the topic"));
        assert!(prompt.contains("- cite sources"));
    }

    #[tokio::test]
    async fn test_researcher_reports_pii_and_citations() {
        let generator = ScriptedGenerator::new(
            "Contact jane@example.com. Source: https://data.example/report.",
        );
        let out = ResearcherHandler
            .handle(&input("researcher"), &generator, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.risk.pii, vec!["email"]);
        assert_eq!(out.outputs.citations, vec!["https://data.example/report"]);
        assert!(out.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_critic_raises_safety_flags() {
        let generator = ScriptedGenerator::new("The second claim is unverified.");
        let out = CriticHandler
            .handle(&input("critic"), &generator, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.risk.safety_flags, vec!["fact_check:unverified"]);
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_step_failure() {
        let generator = ScriptedGenerator::new("x")
            .fail_when("Summarize", crate::provider::ProviderError::Network("down".into()));
        let err = GenericHandler
            .handle(&input("translator"), &generator, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepFailure::Provider(_)));
    }
}
