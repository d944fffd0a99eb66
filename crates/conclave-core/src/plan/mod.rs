//! Dependency-graph plan executor with a signed audit trail.

pub mod audit;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod heuristics;
pub mod model;

pub use audit::{AuditAction, AuditEvent, AuditTrail};
pub use envelope::{
    EnvelopeDraft, EnvelopeOutputs, MessageEnvelope, PolicyRef, Provenance, RiskAssessment,
};
pub use error::{PlanError, PlanResult, StepFailure};
pub use executor::PlanExecutor;
pub use handlers::{
    CreatorHandler, CriticHandler, GenericHandler, HandlerRegistry, ResearcherHandler,
    StepHandler, StepInput, StepOutput,
};
pub use model::{FailedStep, OrchestrationResult, Plan, PlanStep};
