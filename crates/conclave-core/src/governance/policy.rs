//! Proposal, context and policy contracts for the governance gate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::governance::error::{GovernanceError, PolicyResult};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A proposed change or output submitted for gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    /// Free-form classification, e.g. `"plan_output"` or `"config_change"`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Proposal {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            title: title.into(),
            description: description.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Title, description and serialized payload joined by newlines. This is
    /// the text pattern policies scan.
    pub fn searchable_text(&self) -> PolicyResult<String> {
        let payload = match &self.payload {
            serde_json::Value::Null => String::new(),
            other => serde_json::to_string(other)?,
        };
        Ok(format!("{}\n{}\n{}", self.title, self.description, payload))
    }

    /// Size of the proposal's JSON encoding in bytes.
    pub fn encoded_len(&self) -> PolicyResult<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

/// A prior decision a user made about a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub proposal_id: String,
    #[serde(default)]
    pub title: String,
    /// `"accepted"` or `"rejected"`.
    pub decision: String,
}

/// Small, deterministic context policies may consult.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceContext {
    pub user_preferences: BTreeMap<String, serde_json::Value>,
    pub history: Vec<HistoryEntry>,
    pub platform: BTreeMap<String, serde_json::Value>,
    /// Number of audit events recorded for the run under review. Required by
    /// the audit-trail policy; irrelevant elsewhere.
    pub audit_event_count: Option<usize>,
}

impl GovernanceContext {
    pub fn with_audit_event_count(mut self, count: usize) -> Self {
        self.audit_event_count = Some(count);
        self
    }

    /// String list stored under `key` in the user preferences.
    pub fn preference_list(&self, key: &str) -> Vec<String> {
        self.user_preferences
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn platform_u64(&self, key: &str) -> Option<u64> {
        self.platform.get(key).and_then(|v| v.as_u64())
    }
}

// ---------------------------------------------------------------------------
// Policy contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Critical and high failures block; medium and low only warn.
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCategory {
    Safety,
    Security,
    Privacy,
    Transparency,
    UserAutonomy,
    Quality,
}

/// Outcome of one policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceCheckResult {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
}

impl GovernanceCheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
            recommendation: None,
            blocked_by: None,
        }
    }

    pub fn fail(
        policy_id: &str,
        reason: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            recommendation: Some(recommendation.into()),
            blocked_by: Some(policy_id.to_string()),
        }
    }
}

/// A stateless, independent rule. Implementations must not touch the
/// network or the clock so that repeated checks agree.
pub trait GovernancePolicy: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn category(&self) -> PolicyCategory;
    fn severity(&self) -> Severity;
    fn check(
        &self,
        proposal: &Proposal,
        context: &GovernanceContext,
    ) -> Result<GovernanceCheckResult, GovernanceError>;
}

// ---------------------------------------------------------------------------
// Gate output
// ---------------------------------------------------------------------------

/// A failed check, annotated with the policy that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFinding {
    pub policy_id: String,
    pub policy_name: String,
    pub severity: Severity,
    pub category: PolicyCategory,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub blocked_by: String,
}

/// Verdict over all registered policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceResult {
    pub approved: bool,
    pub violations: Vec<PolicyFinding>,
    pub warnings: Vec<PolicyFinding>,
}

impl GovernanceResult {
    /// One-line summary of blocking findings, e.g. for review reasons.
    pub fn violation_summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.policy_id, v.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
