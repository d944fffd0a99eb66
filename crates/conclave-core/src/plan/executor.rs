//! Dependency-wave plan executor.
//!
//! Each wave dispatches every step whose dependencies have all completed,
//! runs them concurrently (bounded by a semaphore), and joins before the next
//! wave is computed. Step failures are isolated: a failed step is audited and
//! its dependents are reported as blocked, while independent steps carry on.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use conclave_state::AuditStore;

use crate::config::PlanConfig;
use crate::governance::{GovernanceContext, GovernanceGate, Proposal};
use crate::graph::engine::panic_message;
use crate::metrics::METRICS;
use crate::obs;
use crate::plan::audit::{AuditAction, AuditEvent, AuditTrail};
use crate::plan::envelope::{EnvelopeDraft, MessageEnvelope, PolicyRef, Provenance};
use crate::plan::error::{PlanError, PlanResult, StepFailure};
use crate::plan::handlers::{HandlerRegistry, StepInput, StepOutput};
use crate::plan::model::{FailedStep, OrchestrationResult, Plan, PlanStep};
use crate::provider::TextGenerator;

const ORCHESTRATOR: &str = "orchestrator";

/// Result of one spawned step task.
struct StepRun {
    step_id: String,
    started_at: chrono::DateTime<Utc>,
    outcome: Result<StepOutput, StepFailure>,
}

/// Runs plans against a text generator.
pub struct PlanExecutor {
    generator: Arc<dyn TextGenerator>,
    registry: HandlerRegistry,
    gate: GovernanceGate,
    config: PlanConfig,
    sink: Option<Arc<dyn AuditStore>>,
}

impl PlanExecutor {
    /// Standard handlers and the audit-requiring governance gate.
    pub fn new(generator: Arc<dyn TextGenerator>, config: PlanConfig) -> Self {
        Self {
            generator,
            registry: HandlerRegistry::standard(),
            gate: GovernanceGate::with_audit_requirement(),
            config,
            sink: None,
        }
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_gate(mut self, gate: GovernanceGate) -> Self {
        self.gate = gate;
        self
    }

    /// Mirror every audit event into `sink`. Sink failures are logged only.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditStore>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Shape checks only; nothing is dispatched.
    pub fn validate(&self, plan: &Plan) -> PlanResult<()> {
        plan.validate(|role| self.registry.handles(role))
    }

    /// Run `plan` to completion.
    ///
    /// Returns `Err` only for configuration errors; every step-level failure
    /// is reported inside the [`OrchestrationResult`].
    #[instrument(skip_all, fields(task_id = tracing::field::Empty, steps = plan.steps.len()))]
    pub async fn orchestrate(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> PlanResult<OrchestrationResult> {
        self.validate(plan)?;

        let task_id = if plan.id.is_empty() {
            format!("task-{}", uuid::Uuid::new_v4())
        } else {
            plan.id.clone()
        };
        tracing::Span::current().record("task_id", task_id.as_str());
        let started = Instant::now();
        obs::emit_plan_started(&task_id, plan.steps.len());

        let mut trail = AuditTrail::new(&task_id);
        self.record(
            &mut trail,
            ORCHESTRATOR,
            AuditAction::PlanStarted,
            json!(null),
            json!({
                "objective": plan.objective,
                "steps": plan.steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            }),
        )
        .await?;

        let mut completed: HashMap<String, MessageEnvelope> = HashMap::new();
        let mut outputs: Vec<MessageEnvelope> = Vec::new();
        let mut failed_steps: Vec<FailedStep> = Vec::new();
        let mut blocked_steps: Vec<String> = Vec::new();
        let mut wave = 0usize;

        loop {
            let pending: Vec<&PlanStep> = {
                let settled: HashSet<&str> = completed
                    .keys()
                    .map(String::as_str)
                    .chain(failed_steps.iter().map(|f| f.step_id.as_str()))
                    .chain(blocked_steps.iter().map(String::as_str))
                    .collect();
                plan.steps
                    .iter()
                    .filter(|s| !settled.contains(s.id.as_str()))
                    .collect()
            };
            if pending.is_empty() {
                break;
            }

            let newly_blocked: Vec<(String, Vec<String>)> = {
                let dead: HashSet<&str> = failed_steps
                    .iter()
                    .map(|f| f.step_id.as_str())
                    .chain(blocked_steps.iter().map(String::as_str))
                    .collect();
                pending
                    .iter()
                    .filter_map(|s| {
                        let culprits: Vec<String> = s
                            .dependencies
                            .iter()
                            .filter(|d| dead.contains(d.as_str()))
                            .cloned()
                            .collect();
                        (!culprits.is_empty()).then(|| (s.id.clone(), culprits))
                    })
                    .collect()
            };
            if !newly_blocked.is_empty() {
                for (step_id, culprits) in newly_blocked {
                    warn!(step_id = %step_id, blocked_by = ?culprits, "step blocked by failed dependency");
                    self.record(
                        &mut trail,
                        ORCHESTRATOR,
                        AuditAction::StepBlocked,
                        json!({"step_id": step_id, "blocked_by": culprits}),
                        json!(null),
                    )
                    .await?;
                    blocked_steps.push(step_id);
                }
                continue;
            }

            if cancel.is_cancelled() {
                for step in pending {
                    let failure = StepFailure::Cancelled;
                    self.fail_step(&mut trail, &mut failed_steps, step, wave + 1, failure)
                        .await?;
                }
                break;
            }

            let ready: Vec<&PlanStep> = pending
                .iter()
                .copied()
                .filter(|s| s.dependencies.iter().all(|d| completed.contains_key(d)))
                .collect();
            if ready.is_empty() {
                return Err(PlanError::Unsatisfiable {
                    pending: pending.iter().map(|s| s.id.clone()).collect(),
                });
            }

            wave += 1;
            info!(wave = wave, ready = ready.len(), "dispatching wave");
            let mut join_set = self.spawn_wave(&task_id, plan, &ready, &completed, cancel);
            let mut reported: HashSet<String> = HashSet::new();

            while let Some(joined) = join_set.join_next().await {
                let run = match joined {
                    Ok(run) => run,
                    Err(err) => {
                        warn!(error = %err, "step task did not complete");
                        continue;
                    }
                };
                reported.insert(run.step_id.clone());
                let Some(step) = plan.step(&run.step_id) else {
                    continue;
                };
                let sealed = run.outcome.and_then(|output| {
                    seal(&task_id, step, output, run.started_at)
                        .map_err(|e| StepFailure::Envelope(e.to_string()))
                });
                match sealed {
                    Ok(envelope) => {
                        METRICS.inc_steps_executed();
                        obs::emit_step_finished(&task_id, &step.id, wave, true);
                        self.record(
                            &mut trail,
                            &step.agent_role,
                            AuditAction::StepExecuted,
                            json!({"step_id": step.id, "dependencies": step.dependencies}),
                            json!({
                                "wave": wave,
                                "envelope_signature": envelope.signature,
                                "confidence": envelope.confidence,
                                "hallucination": envelope.risk.hallucination,
                                "safety_flags": envelope.risk.safety_flags,
                            }),
                        )
                        .await?;
                        outputs.push(envelope.clone());
                        completed.insert(step.id.clone(), envelope);
                    }
                    Err(failure) => {
                        self.fail_step(&mut trail, &mut failed_steps, step, wave, failure)
                            .await?;
                    }
                }
            }

            // A task that vanished without reporting (aborted runtime) still
            // has to settle, or the loop would never advance.
            for step in &ready {
                if !reported.contains(&step.id) {
                    let failure = StepFailure::Handler("step task aborted".to_string());
                    self.fail_step(&mut trail, &mut failed_steps, step, wave, failure)
                        .await?;
                }
            }
        }

        let governance = self.final_gate(&task_id, plan, &outputs, trail.len());
        let mut reasons = Vec::new();
        if !governance.approved {
            reasons.push(format!("governance: {}", governance.violation_summary()));
        }
        for envelope in &outputs {
            if envelope.risk.hallucination > self.config.hallucination_review_threshold {
                reasons.push(format!(
                    "step {}: hallucination risk {:.2} exceeds {:.2}",
                    envelope.step_id,
                    envelope.risk.hallucination,
                    self.config.hallucination_review_threshold
                ));
            }
            if !envelope.risk.safety_flags.is_empty() {
                reasons.push(format!(
                    "step {}: safety flags [{}]",
                    envelope.step_id,
                    envelope.risk.safety_flags.join(", ")
                ));
            }
        }
        let requires_human_review = !reasons.is_empty();
        let success = failed_steps.is_empty() && blocked_steps.is_empty();

        self.record(
            &mut trail,
            ORCHESTRATOR,
            AuditAction::PlanCompleted,
            json!(null),
            json!({
                "success": success,
                "outputs": outputs.len(),
                "failed": failed_steps.iter().map(|f| f.step_id.as_str()).collect::<Vec<_>>(),
                "blocked": blocked_steps,
                "requires_human_review": requires_human_review,
                "waves": wave,
            }),
        )
        .await?;

        obs::emit_plan_finished(
            &task_id,
            started.elapsed().as_millis() as u64,
            outputs.len(),
            success,
            requires_human_review,
        );
        METRICS.flush();

        Ok(OrchestrationResult {
            task_id,
            success,
            outputs,
            audit_trail: trail.into_events(),
            requires_human_review,
            review_reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
            failed_steps,
            blocked_steps,
            governance,
            waves: wave,
        })
    }

    fn spawn_wave(
        &self,
        task_id: &str,
        plan: &Plan,
        ready: &[&PlanStep],
        completed: &HashMap<String, MessageEnvelope>,
        cancel: &CancellationToken,
    ) -> JoinSet<StepRun> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut join_set = JoinSet::new();

        for step in ready {
            let input = StepInput {
                task_id: task_id.to_string(),
                objective: plan.objective.clone(),
                step: (*step).clone(),
                upstream: step
                    .dependencies
                    .iter()
                    .filter_map(|d| completed.get(d).cloned())
                    .collect(),
                timeout: self.config.step_timeout(),
            };
            // Validation guarantees a handler for every role.
            let handler = self.registry.resolve(&step.agent_role);
            let generator = Arc::clone(&self.generator);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let timeout = self.config.step_timeout();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let started_at = Utc::now();
                let step_id = input.step.id.clone();
                let Some(handler) = handler else {
                    return StepRun {
                        step_id,
                        started_at,
                        outcome: Err(StepFailure::Handler("no handler".to_string())),
                    };
                };
                let work = AssertUnwindSafe(handler.handle(&input, generator.as_ref(), &cancel))
                    .catch_unwind();
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(StepFailure::Cancelled),
                    res = tokio::time::timeout(timeout, work) => match res {
                        Err(_) => Err(StepFailure::TimedOut(timeout.as_secs())),
                        Ok(Err(panic)) => Err(StepFailure::Panicked(panic_message(panic))),
                        Ok(Ok(outcome)) => outcome,
                    },
                };
                StepRun {
                    step_id,
                    started_at,
                    outcome,
                }
            });
        }
        join_set
    }

    async fn fail_step(
        &self,
        trail: &mut AuditTrail,
        failed_steps: &mut Vec<FailedStep>,
        step: &PlanStep,
        wave: usize,
        failure: StepFailure,
    ) -> PlanResult<()> {
        METRICS.inc_steps_failed();
        obs::emit_step_finished(trail.task_id(), &step.id, wave, false);
        warn!(step_id = %step.id, error = %failure, "step failed");
        self.record(
            trail,
            &step.agent_role,
            AuditAction::StepFailed,
            json!({"step_id": step.id, "dependencies": step.dependencies}),
            json!({"wave": wave, "error": failure}),
        )
        .await?;
        failed_steps.push(FailedStep {
            step_id: step.id.clone(),
            wave,
            error: failure,
        });
        Ok(())
    }

    /// Sign and append an event, then mirror it to the sink.
    async fn record(
        &self,
        trail: &mut AuditTrail,
        actor: &str,
        action: AuditAction,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> PlanResult<()> {
        let event = trail
            .record(actor, action, before, after)
            .map_err(|e| PlanError::Audit(e.to_string()))?
            .clone();
        self.mirror(&event).await;
        Ok(())
    }

    async fn mirror(&self, event: &AuditEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        let result = match event.to_record() {
            Ok(record) => sink.append_audit_log(record).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(err) = result {
            obs::emit_sink_error(&event.id, &err);
        }
    }

    fn final_gate(
        &self,
        task_id: &str,
        plan: &Plan,
        outputs: &[MessageEnvelope],
        audit_event_count: usize,
    ) -> crate::governance::GovernanceResult {
        let payload = json!({
            "outputs": outputs
                .iter()
                .map(|e| json!({
                    "step_id": e.step_id,
                    "actor": e.actor,
                    "claims": e.outputs.claims,
                    "artifacts": e.outputs.artifacts,
                    "citations": e.outputs.citations,
                }))
                .collect::<Vec<_>>(),
        });
        let proposal = Proposal::new(
            task_id,
            "plan_output",
            plan.objective.clone(),
            format!(
                "Aggregated output of {} of {} plan steps",
                outputs.len(),
                plan.steps.len()
            ),
        )
        .with_payload(payload);
        let context = GovernanceContext::default().with_audit_event_count(audit_event_count);
        self.gate.check(&proposal, &context)
    }
}

fn seal(
    task_id: &str,
    step: &PlanStep,
    output: StepOutput,
    started_at: chrono::DateTime<Utc>,
) -> crate::domain::error::Result<MessageEnvelope> {
    MessageEnvelope::seal(EnvelopeDraft {
        task_id: task_id.to_string(),
        step_id: step.id.clone(),
        actor: step.agent_role.clone(),
        intent: step.action.clone(),
        inputs: json!({
            "dependencies": step.dependencies,
            "acceptance_criteria": step.acceptance_criteria,
        }),
        outputs: output.outputs,
        risk: output.risk,
        policy: PolicyRef::default(),
        provenance: Provenance {
            tools: output.tools,
            timestamps: vec![started_at, Utc::now()],
        },
        confidence: output.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedGenerator;

    fn executor(generator: ScriptedGenerator) -> PlanExecutor {
        PlanExecutor::new(Arc::new(generator), PlanConfig::default())
    }

    #[tokio::test]
    async fn test_empty_plan_succeeds_with_start_and_completion_events() {
        let result = executor(ScriptedGenerator::new("unused"))
            .orchestrate(&Plan::new("nothing", vec![]), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.waves, 0);
        assert_eq!(result.audit_trail.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fails_every_step() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let generator = Arc::new(ScriptedGenerator::new("text"));
        let plan = Plan::new(
            "o",
            vec![
                PlanStep::new("a", "researcher", "x"),
                PlanStep::new("b", "critic", "y").depends_on("a"),
            ],
        );
        let result = PlanExecutor::new(generator.clone(), PlanConfig::default())
            .orchestrate(&plan, &cancel)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(generator.calls(), 0);
        assert!(result
            .failed_steps
            .iter()
            .all(|f| f.error == StepFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let generator = ScriptedGenerator::new("Independent result. https://ok.example")
            .panic_when("explode");
        let plan = Plan::new(
            "o",
            vec![
                PlanStep::new("bad", "researcher", "explode now"),
                PlanStep::new("good", "researcher", "stay calm"),
            ],
        );
        let result = executor(generator)
            .orchestrate(&plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.failed_steps.len(), 1);
        assert!(matches!(result.failed_steps[0].error, StepFailure::Panicked(_)));
    }
}
