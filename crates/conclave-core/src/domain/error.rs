//! Crate-level error taxonomy for Conclave.
//!
//! Each subsystem owns its own error enum; [`ConclaveError`] unifies them for
//! callers that drive more than one subsystem. Only configuration-shaped
//! failures ever reach a caller as `Err`: provider failures, parse failures
//! and safety escalations are carried as data inside the structured results.

use crate::council::error::CouncilError;
use crate::governance::error::GovernanceError;
use crate::graph::error::GraphError;
use crate::plan::error::PlanError;
use crate::provider::ProviderError;

/// Conclave errors.
#[derive(Debug, thiserror::Error)]
pub enum ConclaveError {
    #[error("workflow configuration error: {0}")]
    Graph(#[from] GraphError),

    #[error("plan configuration error: {0}")]
    Plan(#[from] PlanError),

    #[error("council error: {0}")]
    Council(#[from] CouncilError),

    #[error("governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("non-canonical value: {0}")]
    NonCanonical(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] conclave_state::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Conclave operations.
pub type Result<T> = std::result::Result<T, ConclaveError>;
