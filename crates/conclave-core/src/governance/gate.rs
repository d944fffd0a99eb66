//! The governance gate: evaluates every registered policy against a proposal.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::governance::error::GovernanceError;
use crate::governance::policy::{
    GovernanceCheckResult, GovernanceContext, GovernancePolicy, GovernanceResult, PolicyFinding,
    Proposal,
};
use crate::governance::rules::{standard_policies, AuditTrailRequired};
use crate::metrics::METRICS;
use crate::obs;

/// An immutable, process-wide set of policies.
#[derive(Clone)]
pub struct GovernanceGate {
    policies: Vec<Arc<dyn GovernancePolicy>>,
}

impl Default for GovernanceGate {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for GovernanceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceGate")
            .field("policies", &self.policy_ids())
            .finish()
    }
}

impl GovernanceGate {
    /// A gate with no policies; approves everything.
    pub fn empty() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// The standard policy set.
    pub fn standard() -> Self {
        Self {
            policies: standard_policies(),
        }
    }

    /// The standard set plus `audit-trail-required`, used for plan output.
    pub fn with_audit_requirement() -> Self {
        Self::standard().with_policy(AuditTrailRequired)
    }

    pub fn with_policy(mut self, policy: impl GovernancePolicy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn policy_ids(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.id()).collect()
    }

    /// Evaluate every policy. Critical/high failures become violations,
    /// medium/low failures become warnings. A policy that errors or panics
    /// counts as a violation regardless of its severity.
    pub fn check(&self, proposal: &Proposal, context: &GovernanceContext) -> GovernanceResult {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for policy in &self.policies {
            let outcome = catch_unwind(AssertUnwindSafe(|| policy.check(proposal, context)))
                .unwrap_or_else(|panic| {
                    Err(GovernanceError::Panicked {
                        policy: policy.id().to_string(),
                        message: crate::graph::engine::panic_message(panic),
                    })
                });
            match outcome {
                Ok(result) if result.passed => {}
                Ok(result) => {
                    let finding = finding(policy.as_ref(), result);
                    if policy.severity().is_blocking() {
                        violations.push(finding);
                    } else {
                        warnings.push(finding);
                    }
                }
                Err(err) => {
                    let failed = GovernanceCheckResult::fail(
                        policy.id(),
                        format!("policy check failed: {err}"),
                        "fix the policy input and re-run the check",
                    );
                    violations.push(finding(policy.as_ref(), failed));
                }
            }
        }

        obs::emit_governance_evaluated(&proposal.id, violations.len(), warnings.len());
        METRICS.add_governance_violations(violations.len() as u64);

        GovernanceResult {
            approved: violations.is_empty(),
            violations,
            warnings,
        }
    }
}

fn finding(policy: &dyn GovernancePolicy, result: GovernanceCheckResult) -> PolicyFinding {
    PolicyFinding {
        policy_id: policy.id().to_string(),
        policy_name: policy.name().to_string(),
        severity: policy.severity(),
        category: policy.category(),
        reason: result
            .reason
            .unwrap_or_else(|| format!("{} failed", policy.id())),
        recommendation: result.recommendation,
        blocked_by: result.blocked_by.unwrap_or_else(|| policy.id().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::error::PolicyResult;
    use crate::governance::policy::{PolicyCategory, Severity};

    struct Exploding;

    impl GovernancePolicy for Exploding {
        fn id(&self) -> &str {
            "exploding"
        }
        fn name(&self) -> &str {
            "Exploding"
        }
        fn category(&self) -> PolicyCategory {
            PolicyCategory::Quality
        }
        fn severity(&self) -> Severity {
            Severity::Low
        }
        fn check(&self, _: &Proposal, _: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
            panic!("boom")
        }
    }

    struct Erroring;

    impl GovernancePolicy for Erroring {
        fn id(&self) -> &str {
            "erroring"
        }
        fn name(&self) -> &str {
            "Erroring"
        }
        fn category(&self) -> PolicyCategory {
            PolicyCategory::Quality
        }
        fn severity(&self) -> Severity {
            Severity::Medium
        }
        fn check(&self, _: &Proposal, _: &GovernanceContext) -> PolicyResult<GovernanceCheckResult> {
            Err(GovernanceError::MissingContext("anything"))
        }
    }

    fn clean() -> Proposal {
        Proposal::new(
            "p1",
            "config_change",
            "Tune retry backoff",
            "Raise the retry backoff ceiling from 5s to 10s for the sync job.",
        )
    }

    #[test]
    fn test_clean_proposal_approved() {
        let result = GovernanceGate::standard().check(&clean(), &GovernanceContext::default());
        assert!(result.approved);
        assert!(result.violations.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_low_severity_only_warns() {
        let p = Proposal::new("p2", "config_change", "Tune", "short");
        let result = GovernanceGate::standard().check(&p, &GovernanceContext::default());
        assert!(result.approved);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].policy_id, "require-description");
    }

    #[test]
    fn test_panicking_policy_is_a_violation() {
        let gate = GovernanceGate::empty().with_policy(Exploding);
        let result = gate.check(&clean(), &GovernanceContext::default());
        assert!(!result.approved);
        assert_eq!(result.violations[0].blocked_by, "exploding");
        assert!(result.violations[0].reason.contains("boom"));
    }

    #[test]
    fn test_erroring_policy_is_a_violation_even_when_medium() {
        let gate = GovernanceGate::empty().with_policy(Erroring);
        let result = gate.check(&clean(), &GovernanceContext::default());
        assert!(!result.approved);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_audit_gate_without_count_fails_closed() {
        let result =
            GovernanceGate::with_audit_requirement().check(&clean(), &GovernanceContext::default());
        assert!(!result.approved);
        assert_eq!(result.violations[0].policy_id, "audit-trail-required");
    }
}
