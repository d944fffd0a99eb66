//! Append-only, signed audit trail for plan runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use conclave_state::AuditRecord;

use crate::domain::digest::{signature_of, verify_signature};
use crate::domain::error::Result;

/// State transitions worth recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PlanStarted,
    StepExecuted,
    StepFailed,
    StepBlocked,
    PlanCompleted,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::PlanStarted => "plan_started",
            AuditAction::StepExecuted => "step_executed",
            AuditAction::StepFailed => "step_failed",
            AuditAction::StepBlocked => "step_blocked",
            AuditAction::PlanCompleted => "plan_completed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub signature: String,
}

impl AuditEvent {
    pub fn new(
        task_id: &str,
        actor: &str,
        action: AuditAction,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Result<Self> {
        let mut event = Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            before,
            after,
            signature: String::new(),
        };
        event.signature = signature_of(&event)?;
        Ok(event)
    }

    pub fn verify(&self) -> Result<()> {
        verify_signature(self, &self.signature)
    }

    /// Persistence form; the full signed event rides in the payload so it can
    /// be replayed and re-verified.
    pub fn to_record(&self) -> Result<AuditRecord> {
        Ok(AuditRecord {
            id: self.id.clone(),
            task_id: self.task_id.clone(),
            actor: self.actor.clone(),
            action: self.action.to_string(),
            recorded_at: self.timestamp,
            payload: serde_json::to_value(self)?,
        })
    }
}

/// Events for one task, in the order they were recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    task_id: String,
    events: Vec<AuditEvent>,
}

impl AuditTrail {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            events: Vec::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Sign and append an event; returns the stored copy.
    pub fn record(
        &mut self,
        actor: &str,
        action: AuditAction,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Result<&AuditEvent> {
        let event = AuditEvent::new(&self.task_id, actor, action, before, after)?;
        self.events.push(event);
        Ok(&self.events[self.events.len() - 1])
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.events.iter().filter(|e| e.action == action).count()
    }

    /// Verify every event's signature; stops at the first mismatch.
    pub fn verify_all(&self) -> Result<()> {
        self.events.iter().try_for_each(AuditEvent::verify)
    }

    pub fn into_events(self) -> Vec<AuditEvent> {
        self.events
    }
}
