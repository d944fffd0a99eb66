//! Stock workflows built on the graph engine.

pub mod chat;
pub mod quick_council;

pub use chat::{ChatContext, ChatFlow, ChatTurn, Exchange};
pub use quick_council::{
    jaccard_similarity, novel_contributions, Perspective, QuickCouncil, QuickCouncilContext,
    QuickCouncilOutcome,
};
