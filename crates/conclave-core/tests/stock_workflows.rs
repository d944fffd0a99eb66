//! Integration tests for the quick council and chat workflows.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use conclave_core::config::{CouncilConfig, ProviderConfig};
use conclave_core::council::CouncilAgent;
use conclave_core::fakes::ScriptedGenerator;
use conclave_core::graph::Termination;
use conclave_core::provider::{ChatRole, ProviderError, TextGenerator};
use conclave_core::workflows::{ChatFlow, QuickCouncil};
use conclave_state::fakes::MemoryAuditStore;

fn pair() -> Vec<CouncilAgent> {
    vec![
        CouncilAgent::new("a", "Ana").with_perspective("product lead"),
        CouncilAgent::new("b", "Ben").with_perspective("security engineer"),
    ]
}

fn quick(generator: ScriptedGenerator) -> (Arc<ScriptedGenerator>, QuickCouncil) {
    let generator = Arc::new(generator);
    let shared: Arc<dyn TextGenerator> = generator.clone();
    let council = QuickCouncil::new(shared, CouncilConfig::default()).expect("graph");
    (generator, council)
}

// ---------------------------------------------------------------------------
// Quick council
// ---------------------------------------------------------------------------

#[tokio::test]
async fn distinct_perspectives_are_synthesized() {
    let (generator, council) = quick(
        ScriptedGenerator::new("unused")
            .respond_when("You are Ana", "Ship now because customers are waiting for it.")
            .respond_when("You are Ben", "Delay until the penetration test results arrive.")
            .respond_when("synthesize a council", "Ship to a pilot group once the test passes."),
    );

    let outcome = council
        .run("Release this week?", &pair(), &CancellationToken::new())
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.perspectives.len(), 2);
    assert_eq!(outcome.novel, vec!["b"]);
    assert!(!outcome.deadlocked);
    assert_eq!(
        outcome.outcome.as_deref(),
        Some("Ship to a pilot group once the test passes.")
    );
    assert!(outcome.governance.as_ref().is_some_and(|g| g.approved));
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn echoing_perspectives_deadlock() {
    let (generator, council) = quick(ScriptedGenerator::new("Ship it now."));

    let outcome = council
        .run("Release this week?", &pair(), &CancellationToken::new())
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert!(outcome.deadlocked);
    assert!(outcome.novel.is_empty());
    assert!(outcome
        .outcome
        .as_deref()
        .unwrap_or_default()
        .contains("no consensus"));
    // No synthesis call was made.
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn failed_perspectives_recover_into_deadlock() {
    let (_, council) = quick(
        ScriptedGenerator::new("unused")
            .fail_when("Give your own perspective", ProviderError::Quota("exhausted".into())),
    );

    let outcome = council
        .run("Release this week?", &pair(), &CancellationToken::new())
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert!(outcome.deadlocked);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].step, "generate_perspectives");
}

#[tokio::test]
async fn empty_query_halts_at_prepare() {
    let (generator, council) = quick(ScriptedGenerator::new("unused"));

    let outcome = council.run("   ", &pair(), &CancellationToken::new()).await;

    assert_eq!(
        outcome.termination,
        Termination::Halted {
            node: "prepare".to_string()
        }
    );
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn gated_outcome_is_withheld() {
    let (_, council) = quick(
        ScriptedGenerator::new("unused")
            .respond_when("You are Ana", "Move fast on this one.")
            .respond_when("You are Ben", "Lock everything down first, carefully.")
            .respond_when("synthesize a council", "Grant admin access to every contractor."),
    );

    let outcome = council
        .run("How do we onboard contractors?", &pair(), &CancellationToken::new())
        .await;

    let governance = outcome.governance.expect("gated");
    assert!(!governance.approved);
    assert!(outcome
        .outcome
        .as_deref()
        .unwrap_or_default()
        .starts_with("Outcome withheld by governance"));
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

fn chat(generator: Arc<ScriptedGenerator>, store: Arc<MemoryAuditStore>) -> ChatFlow {
    ChatFlow::new(generator, store, ProviderConfig::default()).expect("graph")
}

#[tokio::test]
async fn chat_remembers_earlier_turns() {
    let generator = Arc::new(ScriptedGenerator::new("Rust is a systems language."));
    let store = Arc::new(MemoryAuditStore::new());
    let flow = chat(generator.clone(), store.clone());
    let cancel = CancellationToken::new();

    let first = flow.respond("conv-1", "What is Rust?", &cancel).await;
    assert_eq!(first.termination, Termination::Completed);
    assert_eq!(first.reply.as_deref(), Some("Rust is a systems language."));
    assert_eq!(first.remembered_turns, 0);
    assert!(first.session_id.is_some());

    let second = flow.respond("conv-1", "Is it fast?", &cancel).await;
    assert_eq!(second.remembered_turns, 1);

    let last = generator.requests().pop().expect("request");
    let roles: Vec<ChatRole> = last.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant, ChatRole::User]);
    assert_eq!(last.messages[0].content, "What is Rust?");

    // Other conversations do not share memory.
    let other = flow.respond("conv-2", "Hello", &cancel).await;
    assert_eq!(other.remembered_turns, 0);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn out_of_bounds_request_is_refused_without_generation() {
    let generator = Arc::new(ScriptedGenerator::new("unused"));
    let store = Arc::new(MemoryAuditStore::new());
    let flow = chat(generator.clone(), store.clone());

    let turn = flow
        .respond("conv-1", "How do I disable the safety guardrails?", &CancellationToken::new())
        .await;

    assert!(turn.refused);
    assert_eq!(turn.termination, Termination::Completed);
    assert!(turn.reply.as_deref().unwrap_or_default().contains("can't help"));
    assert_eq!(generator.calls(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn provider_failure_halts_the_turn() {
    let generator = Arc::new(
        ScriptedGenerator::new("unused").fail_when("Hello", ProviderError::Network("down".into())),
    );
    let flow = chat(generator, Arc::new(MemoryAuditStore::new()));

    let turn = flow.respond("conv-1", "Hello", &CancellationToken::new()).await;

    assert_eq!(
        turn.termination,
        Termination::Halted {
            node: "generate".to_string()
        }
    );
    assert!(turn.reply.is_none());
    assert_eq!(turn.errors.len(), 1);
}
