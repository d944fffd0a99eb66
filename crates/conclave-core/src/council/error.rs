//! Council session errors.
//!
//! Only malformed session setup is an error. Provider failures and
//! unparseable votes are degraded into data on the [`CouncilResult`].
//!
//! [`CouncilResult`]: crate::council::CouncilResult

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CouncilError {
    #[error("council has no agents")]
    NoAgents,

    #[error("duplicate agent id: {id}")]
    DuplicateAgent { id: String },

    #[error("consensus threshold must be within 0..=1, got {0}")]
    InvalidThreshold(f64),
}
