//! Built-in governance policies.

use std::sync::Arc;

use crate::governance::error::{GovernanceError, PolicyResult};
use crate::governance::patterns;
use crate::governance::policy::{
    GovernanceCheckResult, GovernanceContext, GovernancePolicy, PolicyCategory, Proposal, Severity,
};

/// Default ceiling for `proposal-size-limit`; `platform.max_proposal_bytes`
/// overrides it.
pub const DEFAULT_MAX_PROPOSAL_BYTES: u64 = 64 * 1024;

/// Descriptions shorter than this (after trimming) draw a warning.
pub const MIN_DESCRIPTION_CHARS: usize = 20;

pub const NO_REMOVE_SAFETY_FEATURES: &str = "no-remove-safety-features";
pub const NO_PRIVILEGE_ESCALATION: &str = "no-privilege-escalation";
pub const NO_PII_EXPOSURE: &str = "no-pii-exposure";
pub const NO_SCRIPT_INJECTION: &str = "no-script-injection";
pub const AUDIT_TRAIL_REQUIRED: &str = "audit-trail-required";
pub const RESPECT_USER_PREFERENCES: &str = "respect-user-preferences";
pub const REQUIRE_DESCRIPTION: &str = "require-description";
pub const PROPOSAL_SIZE_LIMIT: &str = "proposal-size-limit";

/// The standard policy set (everything except the audit-trail requirement,
/// which only makes sense for gated runs).
pub fn standard_policies() -> Vec<Arc<dyn GovernancePolicy>> {
    vec![
        Arc::new(NoRemoveSafetyFeatures),
        Arc::new(NoPrivilegeEscalation),
        Arc::new(NoPiiExposure),
        Arc::new(NoScriptInjection),
        Arc::new(RespectUserPreferences),
        Arc::new(RequireDescription),
        Arc::new(ProposalSizeLimit),
    ]
}

macro_rules! policy_meta {
    ($id:expr, $name:expr, $category:expr, $severity:expr) => {
        fn id(&self) -> &str {
            $id
        }
        fn name(&self) -> &str {
            $name
        }
        fn category(&self) -> PolicyCategory {
            $category
        }
        fn severity(&self) -> Severity {
            $severity
        }
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoveSafetyFeatures;

impl GovernancePolicy for NoRemoveSafetyFeatures {
    policy_meta!(
        NO_REMOVE_SAFETY_FEATURES,
        "Do not remove safety features",
        PolicyCategory::Safety,
        Severity::Critical
    );

    fn check(&self, proposal: &Proposal, _: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
        let text = proposal.searchable_text()?;
        let hit = patterns::safety_removal()?
            .find(&text)
            .or(patterns::safety_removal_reversed()?.find(&text));
        Ok(match hit {
            Some(m) => GovernanceCheckResult::fail(
                self.id(),
                format!("proposal would weaken a safety mechanism (\"{}\")", m.as_str().trim()),
                "keep safety features enabled; propose a scoped adjustment instead",
            ),
            None => GovernanceCheckResult::pass(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrivilegeEscalation;

impl GovernancePolicy for NoPrivilegeEscalation {
    policy_meta!(
        NO_PRIVILEGE_ESCALATION,
        "No privilege escalation",
        PolicyCategory::Security,
        Severity::Critical
    );

    fn check(&self, proposal: &Proposal, _: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
        let text = proposal.searchable_text()?;
        let hit = patterns::privilege_grant()?
            .find(&text)
            .or(patterns::privilege_command()?.find(&text));
        Ok(match hit {
            Some(m) => GovernanceCheckResult::fail(
                self.id(),
                format!("proposal requests elevated privileges (\"{}\")", m.as_str().trim()),
                "request the narrowest permission needed through the access workflow",
            ),
            None => GovernanceCheckResult::pass(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPiiExposure;

impl GovernancePolicy for NoPiiExposure {
    policy_meta!(
        NO_PII_EXPOSURE,
        "No exposure of personal data",
        PolicyCategory::Privacy,
        Severity::High
    );

    fn check(&self, proposal: &Proposal, _: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
        let text = proposal.searchable_text()?;
        let mut kinds = Vec::new();
        if patterns::ssn()?.is_match(&text) {
            kinds.push("ssn");
        }
        if patterns::email()?.is_match(&text) {
            kinds.push("email");
        }
        Ok(if kinds.is_empty() {
            GovernanceCheckResult::pass()
        } else {
            GovernanceCheckResult::fail(
                self.id(),
                format!("personal data detected: {}", kinds.join(", ")),
                "redact personal identifiers before publishing",
            )
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoScriptInjection;

impl GovernancePolicy for NoScriptInjection {
    policy_meta!(
        NO_SCRIPT_INJECTION,
        "No script injection",
        PolicyCategory::Security,
        Severity::High
    );

    fn check(&self, proposal: &Proposal, _: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
        let text = proposal.searchable_text()?;
        Ok(match patterns::script_injection()?.find(&text) {
            Some(m) => GovernanceCheckResult::fail(
                self.id(),
                format!("executable markup found (\"{}\")", m.as_str()),
                "run the proposal through sanitization before resubmitting",
            ),
            None => GovernanceCheckResult::pass(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditTrailRequired;

impl GovernancePolicy for AuditTrailRequired {
    policy_meta!(
        AUDIT_TRAIL_REQUIRED,
        "Audit trail required",
        PolicyCategory::Transparency,
        Severity::High
    );

    fn check(&self, _: &Proposal, context: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
        let count = context
            .audit_event_count
            .ok_or(GovernanceError::MissingContext("audit_event_count"))?;
        Ok(if count == 0 {
            GovernanceCheckResult::fail(
                self.id(),
                "no audit events were recorded for this run",
                "record every state transition before publishing results",
            )
        } else {
            GovernanceCheckResult::pass()
        })
    }
}

/// Honors `blocked_topics` and `blocked_kinds` preference lists and refuses to
/// resubmit a title the user already rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct RespectUserPreferences;

impl GovernancePolicy for RespectUserPreferences {
    policy_meta!(
        RESPECT_USER_PREFERENCES,
        "Respect user preferences",
        PolicyCategory::UserAutonomy,
        Severity::Medium
    );

    fn check(&self, proposal: &Proposal, context: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
        let text = proposal.searchable_text()?.to_lowercase();
        if let Some(topic) = context
            .preference_list("blocked_topics")
            .into_iter()
            .find(|t| !t.is_empty() && text.contains(&t.to_lowercase()))
        {
            return Ok(GovernanceCheckResult::fail(
                self.id(),
                format!("touches blocked topic \"{topic}\""),
                "drop the topic or ask the user to lift the block",
            ));
        }
        if context
            .preference_list("blocked_kinds")
            .iter()
            .any(|k| k == &proposal.kind)
        {
            return Ok(GovernanceCheckResult::fail(
                self.id(),
                format!("user opted out of {} proposals", proposal.kind),
                "do not submit this kind of proposal for this user",
            ));
        }
        let previously_rejected = context.history.iter().any(|entry| {
            entry.decision.eq_ignore_ascii_case("rejected")
                && (entry.proposal_id == proposal.id
                    || (!entry.title.is_empty() && entry.title.eq_ignore_ascii_case(&proposal.title)))
        });
        Ok(if previously_rejected {
            GovernanceCheckResult::fail(
                self.id(),
                "user already rejected this proposal",
                "revise the proposal before resubmitting",
            )
        } else {
            GovernanceCheckResult::pass()
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequireDescription;

impl GovernancePolicy for RequireDescription {
    policy_meta!(
        REQUIRE_DESCRIPTION,
        "Require a description",
        PolicyCategory::Quality,
        Severity::Low
    );

    fn check(&self, proposal: &Proposal, _: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
        let len = proposal.description.trim().chars().count();
        Ok(if len < MIN_DESCRIPTION_CHARS {
            GovernanceCheckResult::fail(
                self.id(),
                format!("description has {len} characters, expected at least {MIN_DESCRIPTION_CHARS}"),
                "explain what the proposal changes and why",
            )
        } else {
            GovernanceCheckResult::pass()
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalSizeLimit;

impl GovernancePolicy for ProposalSizeLimit {
    policy_meta!(
        PROPOSAL_SIZE_LIMIT,
        "Proposal size limit",
        PolicyCategory::Quality,
        Severity::Low
    );

    fn check(&self, proposal: &Proposal, context: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
        let limit = context
            .platform_u64("max_proposal_bytes")
            .unwrap_or(DEFAULT_MAX_PROPOSAL_BYTES);
        let size = proposal.encoded_len()? as u64;
        Ok(if size > limit {
            GovernanceCheckResult::fail(
                self.id(),
                format!("proposal is {size} bytes, limit is {limit}"),
                "split the proposal into smaller changes",
            )
        } else {
            GovernanceCheckResult::pass()
        })
    }
}
