use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;

/// Configuration-shaped plan failures. Raised before any step is dispatched
/// (or, for `Unsatisfiable`, the moment no further progress is possible) and
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("duplicate step id: {id}")]
    DuplicateStep { id: String },

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("no handler registered for role {role} (step {step})")]
    MissingHandler { step: String, role: String },

    #[error("dependency cycle among steps: {}", steps.join(", "))]
    DependencyCycle { steps: Vec<String> },

    #[error("no step is ready but {} remain: {}", pending.len(), pending.join(", "))]
    Unsatisfiable { pending: Vec<String> },

    #[error("audit trail could not be signed: {0}")]
    Audit(String),
}

/// Why one step produced no output. Isolated to that step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StepFailure {
    #[error("provider failure: {0}")]
    Provider(String),

    #[error("step timed out after {0}s")]
    TimedOut(u64),

    #[error("step cancelled")]
    Cancelled,

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("envelope could not be sealed: {0}")]
    Envelope(String),

    #[error("{0}")]
    Handler(String),
}

impl From<ProviderError> for StepFailure {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout { after_secs } => StepFailure::TimedOut(after_secs),
            ProviderError::Cancelled => StepFailure::Cancelled,
            other => StepFailure::Provider(other.to_string()),
        }
    }
}

pub type PlanResult<T> = std::result::Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_steps() {
        let err = PlanError::DependencyCycle {
            steps: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle among steps: a, b");
    }

    #[test]
    fn test_provider_timeout_maps_to_timed_out() {
        let failure: StepFailure = ProviderError::Timeout { after_secs: 9 }.into();
        assert_eq!(failure, StepFailure::TimedOut(9));
    }
}
