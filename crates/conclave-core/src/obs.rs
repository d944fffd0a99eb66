//! Structured observability hooks for plan, workflow, council and
//! governance lifecycle events.
//!
//! Every emitter logs at `info!` (failures at `warn!`) with a stable
//! `event` field so that log pipelines can key on it.

use tracing::{info, warn};

/// Span tagging everything inside one run with its kind and id.
///
/// ```ignore
/// use tracing::Instrument;
/// executor.orchestrate(&plan, &cancel).instrument(run_span("plan", "task-12345")).await
/// ```
pub fn run_span(run_kind: &str, run_id: &str) -> tracing::Span {
    tracing::info_span!("conclave.run", run_kind = %run_kind, run_id = %run_id)
}

pub fn emit_plan_started(task_id: &str, steps: usize) {
    info!(event = "plan.started", task_id = %task_id, steps = steps);
}

/// Emit event: one step finished (successfully or not) within a wave.
pub fn emit_step_finished(task_id: &str, step_id: &str, wave: usize, success: bool) {
    if success {
        info!(event = "plan.step_finished", task_id = %task_id, step_id = %step_id, wave = wave, success = true);
    } else {
        warn!(event = "plan.step_finished", task_id = %task_id, step_id = %step_id, wave = wave, success = false);
    }
}

pub fn emit_plan_finished(
    task_id: &str,
    duration_ms: u64,
    outputs: usize,
    success: bool,
    requires_human_review: bool,
) {
    info!(
        event = "plan.finished",
        task_id = %task_id,
        duration_ms = duration_ms,
        outputs = outputs,
        success = success,
        requires_human_review = requires_human_review,
    );
}

pub fn emit_workflow_started(run_id: &str, entry: &str) {
    info!(event = "workflow.started", run_id = %run_id, entry = %entry);
}

pub fn emit_node_failed(run_id: &str, node: &str, error: &dyn std::fmt::Display, recovered: bool) {
    warn!(event = "workflow.node_failed", run_id = %run_id, node = %node, error = %error, recovered = recovered);
}

pub fn emit_workflow_finished(run_id: &str, iterations: usize, termination: &str) {
    info!(event = "workflow.finished", run_id = %run_id, iterations = iterations, termination = %termination);
}

pub fn emit_council_phase(session_id: &str, phase: &str, entries: usize, errors: usize) {
    info!(event = "council.phase_completed", session_id = %session_id, phase = %phase, entries = entries, errors = errors);
}

pub fn emit_council_finished(session_id: &str, weighted_approval: f64, consensus_reached: bool) {
    info!(
        event = "council.finished",
        session_id = %session_id,
        weighted_approval = weighted_approval,
        consensus_reached = consensus_reached,
    );
}

pub fn emit_governance_evaluated(proposal_id: &str, violations: usize, warnings: usize) {
    info!(
        event = "governance.evaluated",
        proposal_id = %proposal_id,
        approved = violations == 0,
        violations = violations,
        warnings = warnings,
    );
}

/// Emit event: the audit sink rejected a write (warning level, never fatal).
pub fn emit_sink_error(record_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.sink_error", record_id = %record_id, error = %error);
}
