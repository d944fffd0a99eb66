//! Integration tests for the council protocol.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use conclave_core::config::CouncilConfig;
use conclave_core::council::{run_council, Council, CouncilAgent, DeliberationPhase, VoteChoice};
use conclave_core::fakes::ScriptedGenerator;
use conclave_core::provider::TextGenerator;
use conclave_state::fakes::MemoryAuditStore;
use conclave_state::{AuditStore, RecordFilter, SessionKind, StoredRecord};

const ANALYSIS: &str = "The proposal balances honesty and fairness. Confidence: 0.6";

fn five_members() -> Vec<CouncilAgent> {
    vec![
        CouncilAgent::new("ana", "Ana").with_scores(0.8, 0.8),
        CouncilAgent::new("ben", "Ben").with_scores(0.8, 0.8),
        CouncilAgent::new("cy", "Cy").with_scores(0.8, 0.8),
        CouncilAgent::new("dee", "Dee").with_scores(0.6, 0.6),
        CouncilAgent::new("eve", "Eve").with_scores(0.6, 0.6),
    ]
}

fn approve(confidence: f64) -> String {
    format!(r#"{{"vote": "approve", "reasoning": "benefits outweigh costs", "confidence": {confidence}}}"#)
}

fn reject(confidence: f64) -> String {
    format!(r#"{{"vote": "reject", "reasoning": "too early", "confidence": {confidence}}}"#)
}

fn split_generator() -> ScriptedGenerator {
    ScriptedGenerator::new(ANALYSIS)
        .respond_when("Cast your vote as Ana", approve(0.9))
        .respond_when("Cast your vote as Ben", approve(0.9))
        .respond_when("Cast your vote as Cy", approve(0.9))
        .respond_when("Cast your vote as Dee", reject(0.8))
        .respond_when("Cast your vote as Eve", reject(0.8))
}

#[tokio::test]
async fn three_to_two_split_misses_default_threshold() {
    let generator: Arc<dyn TextGenerator> = Arc::new(split_generator());

    let result = run_council(
        generator,
        "Adopt the four-day release cadence?",
        &five_members(),
        0.66,
        &CancellationToken::new(),
    )
    .await
    .expect("council");

    assert_eq!(result.total_votes, 5);
    assert_eq!(result.approve_count, 3);
    assert_eq!(result.reject_count, 2);
    assert_eq!(result.abstain_count, 0);
    assert!((result.weighted_approval - 0.60).abs() < 1e-9);
    assert!(!result.consensus_reached);
    assert!(result.final_recommendation.contains("could not reach consensus"));
    assert!(result.governance.approved);

    // The whole transcript is returned, not just the verdict.
    assert_eq!(result.phase(DeliberationPhase::Analysis).count(), 5);
    assert_eq!(result.phase(DeliberationPhase::Deliberation).count(), 5);
    assert_eq!(result.phase(DeliberationPhase::Voting).count(), 5);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn lower_threshold_reaches_consensus() {
    let generator: Arc<dyn TextGenerator> = Arc::new(split_generator());
    let result = run_council(
        generator,
        "Adopt the four-day release cadence?",
        &five_members(),
        0.55,
        &CancellationToken::new(),
    )
    .await
    .expect("council");

    assert!(result.consensus_reached);
    assert!(result.final_recommendation.starts_with("Council approves"));
}

#[tokio::test]
async fn exact_threshold_counts_as_consensus() {
    let members = vec![
        CouncilAgent::new("a", "Ana").with_scores(0.5, 0.5),
        CouncilAgent::new("b", "Ben").with_scores(0.5, 0.5),
    ];
    let generator: Arc<dyn TextGenerator> = Arc::new(
        ScriptedGenerator::new(ANALYSIS)
            .respond_when("Cast your vote as Ana", approve(1.0))
            .respond_when("Cast your vote as Ben", reject(1.0)),
    );

    let result = run_council(generator, "q", &members, 0.5, &CancellationToken::new())
        .await
        .expect("council");

    assert_eq!(result.weighted_approval, 0.5);
    assert!(result.consensus_reached);
}

#[tokio::test]
async fn malformed_vote_becomes_zero_weight_abstention() {
    let generator: Arc<dyn TextGenerator> = Arc::new(
        split_generator().respond_when("Cast your vote as", "I vote yes, obviously!"),
    );
    let members = vec![CouncilAgent::new("zed", "Zed").with_scores(0.9, 0.9)];
    let mut all = five_members();
    all.extend(members);

    let result = run_council(generator, "q", &all, 0.66, &CancellationToken::new())
        .await
        .expect("a bad vote never fails the session");

    let zed = result.votes.iter().find(|v| v.agent_id == "zed").expect("zed voted");
    assert_eq!(zed.vote, VoteChoice::Abstain);
    assert_eq!(zed.weight, 0.0);
    assert_eq!(result.abstain_count, 1);
    // Zero weight leaves the others' arithmetic untouched.
    assert!((result.weighted_approval - 0.60).abs() < 1e-9);
}

#[tokio::test]
async fn explicit_abstention_dilutes_approval() {
    let members = vec![
        CouncilAgent::new("a", "Ana").with_scores(0.5, 0.5),
        CouncilAgent::new("b", "Ben").with_scores(0.5, 0.5),
        CouncilAgent::new("c", "Cy").with_scores(0.5, 0.5),
    ];
    let generator: Arc<dyn TextGenerator> = Arc::new(
        ScriptedGenerator::new(ANALYSIS)
            .respond_when("Cast your vote as Ana", approve(1.0))
            .respond_when("Cast your vote as Ben", approve(1.0))
            .respond_when(
                "Cast your vote as Cy",
                r#"{"vote": "abstain", "reasoning": "I advised on the draft", "confidence": 1.0}"#,
            ),
    );

    let result = run_council(generator, "q", &members, 0.7, &CancellationToken::new())
        .await
        .expect("council");

    let cy = result.votes.iter().find(|v| v.agent_id == "c").expect("cy voted");
    assert_eq!(cy.vote, VoteChoice::Abstain);
    assert_eq!(cy.weight, 0.5);
    assert_eq!(result.abstain_count, 1);
    // 1.0 / 1.5: the abstainer's weight stays in the denominator.
    assert!((result.weighted_approval - 2.0 / 3.0).abs() < 1e-9);
    assert!(!result.consensus_reached);
}

#[tokio::test]
async fn conditional_votes_aggregate_conditions() {
    let members = vec![
        CouncilAgent::new("a", "Ana").with_scores(1.0, 1.0),
        CouncilAgent::new("b", "Ben").with_scores(1.0, 1.0),
    ];
    let generator: Arc<dyn TextGenerator> = Arc::new(
        ScriptedGenerator::new(ANALYSIS)
            .respond_when(
                "Cast your vote as Ana",
                r#"{"vote":"conditional","confidence":0.9,"conditions":["publish a rollback plan"]}"#,
            )
            .respond_when(
                "Cast your vote as Ben",
                r#"{"vote":"conditional","confidence":0.9,"conditions":["notify users a week ahead"]}"#,
            ),
    );

    let result = run_council(generator, "Migrate the store?", &members, 0.66, &CancellationToken::new())
        .await
        .expect("council");

    assert!(result.consensus_reached);
    assert_eq!(result.conditional_count, 2);
    assert!(result.final_recommendation.contains("publish a rollback plan"));
    assert!(result.final_recommendation.contains("notify users a week ahead"));
}

#[tokio::test]
async fn governance_block_prefixes_without_changing_arithmetic() {
    let generator: Arc<dyn TextGenerator> = Arc::new(split_generator());
    let result = run_council(
        generator,
        "Should we disable the safety filters to ship faster?",
        &five_members(),
        0.66,
        &CancellationToken::new(),
    )
    .await
    .expect("council");

    assert!(!result.governance.approved);
    assert!(result
        .governance
        .violations
        .iter()
        .any(|v| v.blocked_by == "no-remove-safety-features"));
    assert!(result
        .governance
        .warnings
        .iter()
        .all(|w| w.blocked_by != "no-remove-safety-features"));
    assert!(result.final_recommendation.starts_with("[blocked by governance"));
    assert!((result.weighted_approval - 0.60).abs() < 1e-9);
    assert!(!result.consensus_reached);
}

#[tokio::test]
async fn session_is_appended_to_the_store() {
    let store = Arc::new(MemoryAuditStore::new());
    let council = Council::new(Arc::new(split_generator()), CouncilConfig::default())
        .with_audit_sink(store.clone());

    let result = council
        .run("Adopt it?", &five_members(), &CancellationToken::new())
        .await
        .expect("council");

    let sessions = store
        .read_recent(&RecordFilter::sessions(SessionKind::Council, 10))
        .await
        .expect("read");
    assert_eq!(sessions.len(), 1);
    match &sessions[0] {
        StoredRecord::Session(s) => {
            assert_eq!(s.id, result.session_id);
            assert_eq!(s.subject, "Adopt it?");
            assert_eq!(s.payload["approve_count"], 3);
        }
        other => panic!("unexpected record {other:?}"),
    }
}
