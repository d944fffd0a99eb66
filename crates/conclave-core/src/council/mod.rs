//! Weighted multi-phase council consensus.
//!
//! Members analyze a query independently, deliberate over each other's
//! analyses, then cast structured votes. [`tally_votes`] turns the votes into
//! a weighted verdict.

pub mod agent;
pub mod consensus;
pub mod error;
pub mod parsing;
pub mod prompts;
pub mod protocol;
pub mod vote;

pub use agent::CouncilAgent;
pub use consensus::{tally_votes, ConsensusOutcome};
pub use error::CouncilError;
pub use parsing::parse_vote;
pub use protocol::{run_council, Council, CouncilPhaseError, CouncilResult};
pub use vote::{AgentDeliberation, AgentVote, DeliberationPhase, VoteChoice};
