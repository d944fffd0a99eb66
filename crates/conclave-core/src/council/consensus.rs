//! Weighted consensus over a set of cast votes.

use serde::{Deserialize, Serialize};

use crate::council::vote::{AgentVote, VoteChoice};

/// Vote counts plus the weighted verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub total_votes: usize,
    pub approve_count: usize,
    pub reject_count: usize,
    pub abstain_count: usize,
    pub conditional_count: usize,
    pub weighted_approval: f64,
    pub consensus_reached: bool,
    pub final_recommendation: String,
}

/// Tally `votes` against `threshold`.
///
/// Weighted approval is `sum(weight * confidence)` over approve and
/// conditional votes, divided by the sum of all weights (0 when every
/// weight is 0). Consensus is inclusive: `weighted_approval >= threshold`.
/// When consensus is not reached, the raw reject and approve counts only
/// choose how the outcome is phrased.
pub fn tally_votes(votes: &[AgentVote], threshold: f64) -> ConsensusOutcome {
    let count = |choice: VoteChoice| votes.iter().filter(|v| v.vote == choice).count();
    let approve_count = count(VoteChoice::Approve);
    let reject_count = count(VoteChoice::Reject);
    let abstain_count = count(VoteChoice::Abstain);
    let conditional_count = count(VoteChoice::Conditional);

    let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
    let supporting: f64 = votes
        .iter()
        .filter(|v| v.vote.is_supportive())
        .map(|v| v.weight * v.confidence)
        .sum();
    let weighted_approval = if total_weight > 0.0 {
        (supporting / total_weight).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let consensus_reached = weighted_approval >= threshold;

    let final_recommendation = if consensus_reached {
        let mut conditions: Vec<&str> = Vec::new();
        for vote in votes.iter().filter(|v| v.vote == VoteChoice::Conditional) {
            for condition in &vote.conditions {
                if !conditions.contains(&condition.as_str()) {
                    conditions.push(condition);
                }
            }
        }
        let verdict = format!(
            "Council approves (weighted approval {weighted_approval:.2} >= threshold {threshold:.2})"
        );
        if conditions.is_empty() {
            verdict
        } else {
            format!("{verdict}, subject to conditions: {}", conditions.join("; "))
        }
    } else if reject_count > approve_count {
        format!(
            "Council recommends rejection (weighted approval {weighted_approval:.2} < threshold {threshold:.2})"
        )
    } else {
        format!(
            "Council could not reach consensus (weighted approval {weighted_approval:.2} < threshold {threshold:.2})"
        )
    };

    ConsensusOutcome {
        total_votes: votes.len(),
        approve_count,
        reject_count,
        abstain_count,
        conditional_count,
        weighted_approval,
        consensus_reached,
        final_recommendation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(id: &str, choice: VoteChoice, confidence: f64, weight: f64) -> AgentVote {
        AgentVote::new(id, choice, confidence, weight)
    }

    #[test]
    fn test_five_member_split_misses_threshold() {
        let votes = vec![
            vote("a", VoteChoice::Approve, 0.9, 0.8),
            vote("b", VoteChoice::Approve, 0.9, 0.8),
            vote("c", VoteChoice::Approve, 0.9, 0.8),
            vote("d", VoteChoice::Reject, 0.8, 0.6),
            vote("e", VoteChoice::Reject, 0.8, 0.6),
        ];
        let outcome = tally_votes(&votes, 0.66);
        assert!((outcome.weighted_approval - 0.60).abs() < 1e-9);
        assert!(!outcome.consensus_reached);
        assert!(outcome.final_recommendation.contains("could not reach consensus"));
        assert_eq!((outcome.approve_count, outcome.reject_count), (3, 2));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let votes = vec![
            vote("a", VoteChoice::Approve, 1.0, 0.5),
            vote("b", VoteChoice::Reject, 1.0, 0.5),
        ];
        let outcome = tally_votes(&votes, 0.5);
        assert_eq!(outcome.weighted_approval, 0.5);
        assert!(outcome.consensus_reached);
    }

    #[test]
    fn test_reject_majority_phrasing() {
        let votes = vec![
            vote("a", VoteChoice::Approve, 0.9, 0.5),
            vote("b", VoteChoice::Reject, 0.9, 0.5),
            vote("c", VoteChoice::Reject, 0.9, 0.5),
        ];
        let outcome = tally_votes(&votes, 0.66);
        assert!(outcome.final_recommendation.contains("recommends rejection"));
    }

    #[test]
    fn test_conditions_are_aggregated() {
        let votes = vec![
            vote("a", VoteChoice::Conditional, 1.0, 1.0).with_condition("add audit logging"),
            vote("b", VoteChoice::Conditional, 1.0, 1.0)
                .with_condition("add audit logging")
                .with_condition("limit rollout"),
            vote("c", VoteChoice::Approve, 1.0, 1.0),
        ];
        let outcome = tally_votes(&votes, 0.66);
        assert!(outcome.consensus_reached);
        assert_eq!(outcome.conditional_count, 2);
        assert!(outcome
            .final_recommendation
            .ends_with("subject to conditions: add audit logging; limit rollout"));
    }

    #[test]
    fn test_zero_weight_votes_yield_zero_approval() {
        let votes = vec![AgentVote::abstain("a", "unparseable"), AgentVote::abstain("b", "")];
        let outcome = tally_votes(&votes, 0.0);
        assert_eq!(outcome.weighted_approval, 0.0);
        assert_eq!(outcome.abstain_count, 2);
        assert!(tally_votes(&[], 0.66).final_recommendation.contains("could not reach"));
    }

    #[test]
    fn test_adding_full_confidence_approval_never_lowers_approval() {
        let mut votes = vec![
            vote("a", VoteChoice::Approve, 0.7, 0.6),
            vote("b", VoteChoice::Reject, 0.9, 0.9),
            vote("c", VoteChoice::Conditional, 0.4, 0.3),
        ];
        let mut previous = tally_votes(&votes, 0.66).weighted_approval;
        for (i, weight) in [0.1, 0.5, 1.0, 0.2].into_iter().enumerate() {
            votes.push(vote(&format!("n{i}"), VoteChoice::Approve, 1.0, weight));
            let next = tally_votes(&votes, 0.66).weighted_approval;
            assert!(next >= previous);
            previous = next;
        }
    }
}
