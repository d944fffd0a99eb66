//! Rule-based governance gate.
//!
//! Every proposed action or output passes through [`GovernanceGate::check`]
//! before it is accepted. Policies are pure functions of
//! `(proposal, context)`, so the same inputs always produce the same verdict.

pub mod error;
pub mod gate;
pub mod patterns;
pub mod policy;
pub mod rules;
pub mod sanitize;

pub use error::{GovernanceError, PolicyResult};
pub use gate::GovernanceGate;
pub use policy::{
    GovernanceCheckResult, GovernanceContext, GovernancePolicy, GovernanceResult, HistoryEntry,
    PolicyCategory, PolicyFinding, Proposal, Severity,
};
pub use rules::standard_policies;
pub use sanitize::{sanitize_proposal, sanitize_text};

/// Convenience wrapper over the standard gate.
pub fn check_proposal(proposal: &Proposal, context: &GovernanceContext) -> GovernanceResult {
    GovernanceGate::standard().check(proposal, context)
}
