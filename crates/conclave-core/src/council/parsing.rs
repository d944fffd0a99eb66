//! Lenient extraction of structured votes from free-form model replies.
//!
//! Nothing here fails: a reply that cannot be understood becomes an
//! abstention with zero weight. A deliberate abstention keeps the agent's
//! weight.

use serde::Deserialize;

use crate::council::agent::CouncilAgent;
use crate::council::prompts::PRINCIPLES;
use crate::council::vote::{AgentVote, VoteChoice};

const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct RawVote {
    vote: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    conditions: Vec<String>,
}

/// The outermost `{ ... }` span of `text`, if any.
fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn choice(raw: &str) -> Option<VoteChoice> {
    match raw.trim().to_lowercase().as_str() {
        "approve" | "approved" | "yes" | "for" => Some(VoteChoice::Approve),
        "reject" | "rejected" | "no" | "against" => Some(VoteChoice::Reject),
        "conditional" | "approve_with_conditions" | "conditional_approve" => {
            Some(VoteChoice::Conditional)
        }
        "abstain" | "abstained" => Some(VoteChoice::Abstain),
        _ => None,
    }
}

/// Parse `reply` into `agent`'s vote, weighted by the agent's standing.
///
/// Every recognized vote, an explicit abstention included, carries the
/// agent's weight. Malformed replies and unknown vote words become weight-0
/// abstentions.
pub fn parse_vote(agent: &CouncilAgent, reply: &str) -> AgentVote {
    let Some(object) = json_object(reply) else {
        return AgentVote::abstain(&agent.id, "no structured vote in reply");
    };
    let raw: RawVote = match serde_json::from_str(object) {
        Ok(raw) => raw,
        Err(err) => return AgentVote::abstain(&agent.id, format!("malformed vote: {err}")),
    };
    let Some(vote) = choice(&raw.vote) else {
        return AgentVote::abstain(&agent.id, format!("unrecognized vote '{}'", raw.vote));
    };
    let confidence = raw
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_CONFIDENCE);
    AgentVote {
        conditions: raw
            .conditions
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        ..AgentVote::new(&agent.id, vote, confidence, agent.weight()).with_reasoning(raw.reasoning)
    }
}

/// A self-reported `confidence: 0.8` (or `80%`) in prose, clamped to `0..=1`.
pub fn extract_confidence(text: &str) -> Option<f64> {
    let lower = text.to_lowercase();
    let at = lower.find("confidence")?;
    let rest = lower[at + "confidence".len()..].trim_start_matches(|c: char| {
        c == ':' || c == '=' || c == '"' || c.is_whitespace() || c == '*'
    });
    let number: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = number.trim_end_matches('.').parse().ok()?;
    let is_percent = rest[number.len()..].starts_with('%') || value > 1.0;
    let value = if is_percent { value / 100.0 } else { value };
    Some(value.clamp(0.0, 1.0))
}

/// Shared principles mentioned by name in `text`, in canonical order.
pub fn cited_principles(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    PRINCIPLES
        .iter()
        .filter(|p| lower.contains(&p.to_lowercase()))
        .map(|p| p.to_string())
        .collect()
}

/// First non-empty line, used as the short reasoning of a transcript entry.
pub fn summary_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> CouncilAgent {
        CouncilAgent::new("a1", "Ada").with_scores(0.8, 0.6)
    }

    #[test]
    fn test_parse_fenced_vote() {
        let reply = "Here is my vote:\n```json\n{\"vote\": \"approve\", \"reasoning\": \"sound\", \"confidence\": 0.9}\n```";
        let vote = parse_vote(&agent(), reply);
        assert_eq!(vote.vote, VoteChoice::Approve);
        assert_eq!(vote.confidence, 0.9);
        assert!((vote.weight - 0.7).abs() < 1e-9);
        assert_eq!(vote.reasoning, "sound");
    }

    #[test]
    fn test_conditional_vote_keeps_conditions() {
        let reply = r#"{"vote":"Conditional","confidence":2.0,"conditions":["add logging"," ",""]}"#;
        let vote = parse_vote(&agent(), reply);
        assert_eq!(vote.vote, VoteChoice::Conditional);
        assert_eq!(vote.confidence, 1.0);
        assert_eq!(vote.conditions, vec!["add logging"]);
    }

    #[test]
    fn test_malformed_replies_abstain_with_zero_weight() {
        for reply in [
            "I approve wholeheartedly",
            "{\"vote\": approve}",
            "{\"vote\": \"maybe\"}",
            "} backwards {",
        ] {
            let vote = parse_vote(&agent(), reply);
            assert_eq!(vote.vote, VoteChoice::Abstain, "reply: {reply}");
            assert_eq!(vote.weight, 0.0);
        }
    }

    #[test]
    fn test_explicit_abstain_keeps_agent_weight() {
        let vote = parse_vote(
            &agent(),
            r#"{"vote":"abstain","reasoning":"conflict of interest","confidence":0.9}"#,
        );
        assert_eq!(vote.vote, VoteChoice::Abstain);
        assert!((vote.weight - 0.7).abs() < 1e-9);
        assert_eq!(vote.confidence, 0.9);
        assert_eq!(vote.reasoning, "conflict of interest");
    }

    #[test]
    fn test_missing_confidence_defaults() {
        let vote = parse_vote(&agent(), r#"{"vote":"reject"}"#);
        assert_eq!(vote.vote, VoteChoice::Reject);
        assert_eq!(vote.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_extract_confidence_forms() {
        assert_eq!(extract_confidence("Confidence: 0.75."), Some(0.75));
        assert_eq!(extract_confidence("my confidence is high"), None);
        assert_eq!(extract_confidence("**Confidence**: 80%"), Some(0.8));
    }

    #[test]
    fn test_cited_principles() {
        let cited = cited_principles("This favors TRANSPARENCY over speed, and respects user autonomy.");
        assert_eq!(cited, vec!["transparency", "user autonomy"]);
    }
}
