//! Votes and deliberation transcript entries.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
    Conditional,
    Abstain,
}

impl VoteChoice {
    /// Whether this choice counts toward weighted approval.
    pub fn is_supportive(&self) -> bool {
        matches!(self, VoteChoice::Approve | VoteChoice::Conditional)
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoteChoice::Approve => "approve",
            VoteChoice::Reject => "reject",
            VoteChoice::Conditional => "conditional",
            VoteChoice::Abstain => "abstain",
        };
        write!(f, "{s}")
    }
}

/// A single cast vote. `weight` is fixed when the vote is cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVote {
    pub agent_id: String,
    pub vote: VoteChoice,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    pub weight: f64,
}

impl AgentVote {
    pub fn new(agent_id: impl Into<String>, vote: VoteChoice, confidence: f64, weight: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            vote,
            reasoning: String::new(),
            confidence: confidence.clamp(0.0, 1.0),
            conditions: Vec::new(),
            weight: weight.max(0.0),
        }
    }

    /// The safe default for a vote that could not be obtained or parsed.
    pub fn abstain(agent_id: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            ..Self::new(agent_id, VoteChoice::Abstain, 0.0, 0.0)
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliberationPhase {
    Analysis,
    Deliberation,
    Voting,
    Reflection,
}

impl fmt::Display for DeliberationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliberationPhase::Analysis => "analysis",
            DeliberationPhase::Deliberation => "deliberation",
            DeliberationPhase::Voting => "voting",
            DeliberationPhase::Reflection => "reflection",
        };
        write!(f, "{s}")
    }
}

/// One agent's contribution to one phase. Entries accumulate; none is ever
/// overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDeliberation {
    pub agent_id: String,
    pub phase: DeliberationPhase,
    pub content: String,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default)]
    pub cited_principles: Vec<String>,
}
