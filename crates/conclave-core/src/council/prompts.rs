//! Phase prompts. Every member sees the same principle set; later phases
//! carry the transcript of the phase before.

use crate::council::agent::CouncilAgent;
use crate::council::vote::AgentDeliberation;

/// The shared principles every analysis is framed by.
pub const PRINCIPLES: &[&str] = &[
    "harm avoidance",
    "honesty",
    "transparency",
    "user autonomy",
    "fairness",
    "accountability",
];

pub fn system_prompt(agent: &CouncilAgent) -> String {
    let mut prompt = format!(
        "You are {}, a member of a deliberative council.",
        agent.name
    );
    if !agent.perspective.is_empty() {
        prompt.push_str(&format!(" You argue from the perspective of a {}.", agent.perspective));
    }
    prompt.push_str(" Ground every position in these principles: ");
    prompt.push_str(&PRINCIPLES.join(", "));
    prompt.push_str(". Name the principles you rely on and state your confidence as a number between 0 and 1.");
    prompt
}

pub fn analysis_prompt(agent: &CouncilAgent, query: &str) -> String {
    format!(
        "Question before the council:\n{query}\n\n\
         Provide your independent analysis as {}. Do not assume what other members think.",
        agent.name
    )
}

pub fn deliberation_prompt(agent: &CouncilAgent, query: &str, transcript: &str) -> String {
    format!(
        "Question before the council:\n{query}\n\n\
         Analyses from all members:\n{transcript}\n\
         Respond to the other members as {}. Say where you agree, where you disagree, \
         and propose a compromise if one exists.",
        agent.name
    )
}

pub fn voting_prompt(agent: &CouncilAgent, query: &str, transcript: &str) -> String {
    format!(
        "Question before the council:\n{query}\n\n\
         Deliberation so far:\n{transcript}\n\
         Cast your vote as {}. Reply with a single JSON object: \
         {{\"vote\": \"approve\" | \"reject\" | \"conditional\" | \"abstain\", \
         \"reasoning\": string, \"confidence\": number between 0 and 1, \
         \"conditions\": [string] (only for conditional votes)}}",
        agent.name
    )
}

/// Render phase entries as `label: content` paragraphs for the next phase.
pub fn transcript(agents: &[CouncilAgent], entries: &[&AgentDeliberation]) -> String {
    let mut out = String::new();
    for entry in entries {
        let label = agents
            .iter()
            .find(|a| a.id == entry.agent_id)
            .map(CouncilAgent::label)
            .unwrap_or_else(|| entry.agent_id.clone());
        out.push_str(&format!("{label}:\n{}\n\n", entry.content.trim()));
    }
    out
}
