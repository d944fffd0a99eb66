//! Conclave CLI
//!
//! The `conclave` command drives the orchestration core from the shell.
//!
//! ## Commands
//!
//! - `check`: Run a proposal through the governance gate
//! - `sanitize`: Strip active content from a proposal
//! - `plan`: Execute a dependency-graph plan
//! - `council`: Run the three-phase council protocol on a query
//! - `quick`: Run the quick council workflow on a query
//! - `chat`: Answer one message of a persisted conversation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument, Level};

use conclave_core::council::CouncilAgent;
use conclave_core::governance::{GovernanceContext, GovernanceGate, GovernanceResult, Proposal};
use conclave_core::telemetry::{init_from_config, init_tracing};
use conclave_core::workflows::ChatTurn;
use conclave_core::{
    check_proposal, run_span, sanitize_proposal, ChatFlow, ConclaveConfig, Council,
    CouncilResult, HttpTextGenerator, OrchestrationResult, Plan, PlanExecutor, QuickCouncil,
    QuickCouncilOutcome, TextGenerator,
};
use conclave_state::{AuditStore, JsonlAuditStore};

#[derive(Parser)]
#[command(name = "conclave")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-agent orchestration with consensus and governance", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the provider endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Override the provider model
    #[arg(long, global = true)]
    model: Option<String>,

    /// Provider bearer token
    #[arg(long, global = true, env = "CONCLAVE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a proposal through the standard governance gate
    Check {
        /// Proposal JSON file
        #[arg(short, long)]
        proposal: PathBuf,

        /// Governance context JSON file (preferences, history, platform)
        #[arg(long)]
        context: Option<PathBuf>,
    },

    /// Print a copy of a proposal with scripts and inline handlers removed
    Sanitize {
        /// Proposal JSON file
        #[arg(short, long)]
        proposal: PathBuf,
    },

    /// Execute a plan and print the orchestration result
    Plan {
        /// Plan JSON file
        #[arg(short, long)]
        plan: PathBuf,

        /// Append the signed audit trail to this JSONL file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },

    /// Run the three-phase council protocol: analysis, deliberation, voting
    Council {
        /// Question put to the council
        #[arg(short, long)]
        query: String,

        /// JSON array of council members
        #[arg(short, long)]
        agents: PathBuf,

        /// Weighted approval needed for consensus (overrides config)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Append the session record to this JSONL file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },

    /// Run the quick council workflow
    Quick {
        /// Question put to the council
        #[arg(short, long)]
        query: String,

        /// JSON array of council members
        #[arg(short, long)]
        agents: PathBuf,

        /// Append the session record to this JSONL file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },

    /// Answer one chat message, remembering earlier turns in a JSONL store
    Chat {
        /// Conversation id
        #[arg(long, default_value = "default")]
        conversation: String,

        /// The user's message
        #[arg(short, long)]
        message: String,

        /// JSONL file holding the conversation memory
        #[arg(long)]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConclaveConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ConclaveConfig::default(),
    };
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid configuration")?;

    // Setup logging
    if cli.verbose {
        init_tracing(cli.json || config.logging.json, Level::DEBUG);
    } else {
        config.logging.json |= cli.json;
        init_from_config(&config.logging);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight work");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Check { proposal, context } => {
            let result = cmd_check(&proposal, context.as_deref())?;
            print_json(&result)?;
            if !result.approved {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Sanitize { proposal } => print_json(&cmd_sanitize(&proposal)?),
        Commands::Plan { plan, audit_log } => {
            let generator = provider(&config)?;
            let result = cmd_plan(generator, &config, &plan, audit_log.as_deref(), &cancel).await?;
            print_json(&result)
        }
        Commands::Council {
            query,
            agents,
            threshold,
            audit_log,
        } => {
            let generator = provider(&config)?;
            let result = cmd_council(
                generator,
                &config,
                &query,
                &agents,
                threshold,
                audit_log.as_deref(),
                &cancel,
            )
            .await?;
            print_json(&result)
        }
        Commands::Quick {
            query,
            agents,
            audit_log,
        } => {
            let generator = provider(&config)?;
            let result =
                cmd_quick(generator, &config, &query, &agents, audit_log.as_deref(), &cancel)
                    .await?;
            print_json(&result)
        }
        Commands::Chat {
            conversation,
            message,
            store,
        } => {
            let generator = provider(&config)?;
            let turn = cmd_chat(generator, &config, &conversation, &message, &store, &cancel).await?;
            print_json(&turn)
        }
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn apply_overrides(config: &mut ConclaveConfig, cli: &Cli) {
    if let Some(endpoint) = &cli.endpoint {
        config.provider.endpoint = endpoint.clone();
    }
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(key) = &cli.api_key {
        config.provider.api_key = Some(key.clone());
    }
}

fn provider(config: &ConclaveConfig) -> Result<Arc<dyn TextGenerator>> {
    let generator = HttpTextGenerator::new(config.provider.clone())
        .context("Failed to build the text generation client")?;
    Ok(Arc::new(generator))
}

async fn open_store(path: &Path) -> Result<Arc<dyn AuditStore>> {
    let store = JsonlAuditStore::open(path)
        .await
        .with_context(|| format!("Failed to open audit log {:?}", path))?;
    Ok(Arc::new(store))
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_check(proposal: &Path, context: Option<&Path>) -> Result<GovernanceResult> {
    let proposal: Proposal = read_json_file(proposal)?;
    let context: GovernanceContext = match context {
        Some(path) => read_json_file(path)?,
        None => GovernanceContext::default(),
    };
    let result = check_proposal(&proposal, &context);
    info!(
        proposal_id = %proposal.id,
        approved = result.approved,
        violations = result.violations.len(),
        "Governance check complete"
    );
    Ok(result)
}

fn cmd_sanitize(proposal: &Path) -> Result<Proposal> {
    let proposal: Proposal = read_json_file(proposal)?;
    Ok(sanitize_proposal(&proposal))
}

async fn cmd_plan(
    generator: Arc<dyn TextGenerator>,
    config: &ConclaveConfig,
    plan: &Path,
    audit_log: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<OrchestrationResult> {
    let plan: Plan = read_json_file(plan)?;
    let mut executor = PlanExecutor::new(generator, config.plan.clone());
    if let Some(path) = audit_log {
        executor = executor.with_audit_sink(open_store(path).await?);
    }
    let span = run_span("plan", &plan.id);
    let result = executor
        .orchestrate(&plan, cancel)
        .instrument(span)
        .await
        .context("Plan rejected")?;
    info!(
        task_id = %result.task_id,
        success = result.success,
        waves = result.waves,
        "Plan finished"
    );
    Ok(result)
}

async fn cmd_council(
    generator: Arc<dyn TextGenerator>,
    config: &ConclaveConfig,
    query: &str,
    agents: &Path,
    threshold: Option<f64>,
    audit_log: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<CouncilResult> {
    let agents: Vec<CouncilAgent> = read_json_file(agents)?;
    let mut council = Council::new(generator, config.council.clone());
    if let Some(threshold) = threshold {
        council = council.with_threshold(threshold);
    }
    if let Some(path) = audit_log {
        council = council.with_audit_sink(open_store(path).await?);
    }
    let result = council
        .run(query, &agents, cancel)
        .instrument(run_span("council", "cli"))
        .await
        .context("Council could not be convened")?;
    Ok(result)
}

async fn cmd_quick(
    generator: Arc<dyn TextGenerator>,
    config: &ConclaveConfig,
    query: &str,
    agents: &Path,
    audit_log: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<QuickCouncilOutcome> {
    let agents: Vec<CouncilAgent> = read_json_file(agents)?;
    let sink = match audit_log {
        Some(path) => Some(open_store(path).await?),
        None => None,
    };
    let quick = QuickCouncil::with_parts(
        generator,
        config.council.clone(),
        config.engine.clone(),
        GovernanceGate::standard(),
        sink,
    )?;
    Ok(quick
        .run(query, &agents, cancel)
        .instrument(run_span("quick_council", "cli"))
        .await)
}

async fn cmd_chat(
    generator: Arc<dyn TextGenerator>,
    config: &ConclaveConfig,
    conversation: &str,
    message: &str,
    store: &Path,
    cancel: &CancellationToken,
) -> Result<ChatTurn> {
    let flow = ChatFlow::with_governance(
        generator,
        open_store(store).await?,
        config.provider.clone(),
        config.engine.clone(),
        GovernanceGate::standard(),
        GovernanceContext::default(),
    )?;
    Ok(flow
        .respond(conversation, message, cancel)
        .instrument(run_span("chat", conversation))
        .await)
}
