/// Internal failure of a policy check.
///
/// The gate never propagates these: a policy that errors (or panics) is
/// recorded as a failed check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GovernanceError {
    #[error("pattern failed to compile: {0}")]
    Pattern(String),

    #[error("proposal could not be serialized: {0}")]
    Serialization(String),

    #[error("context is missing {0}")]
    MissingContext(&'static str),

    #[error("policy {policy} panicked: {message}")]
    Panicked { policy: String, message: String },
}

impl From<serde_json::Error> for GovernanceError {
    fn from(err: serde_json::Error) -> Self {
        GovernanceError::Serialization(err.to_string())
    }
}

pub type PolicyResult<T> = std::result::Result<T, GovernanceError>;
