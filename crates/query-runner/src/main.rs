//! Runs Concierge queries from the command line
//!
//! Sessions live in file-backed checkpoints, so a run parked at the document
//! approval gate can be resumed by a later invocation:
//!
//! ```text
//! query-runner run "전세 계약서 작성해줘" --session lease-1
//! query-runner resume lease-1 '{"action": "approve"}'
//! ```

mod sample;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use query_engine::constants::defaults;
use query_engine::supervisor::summary_value;
use query_engine::{
    CapabilityRegistry, CheckpointStore, EngineConfig, EngineError, FileCheckpointStore, FileStatisticsStore,
    NullProgressSink, Result, RunOutcome, RunRequest, Supervisor, UnavailableModel,
};
use team_nodes::{TeamNodeExecutor, TeamServices};

#[derive(Debug, Parser)]
#[command(name = "query-runner")]
#[command(about = "Plan and run real-estate queries across the Search, Analysis and Document teams")]
struct Cli {
    /// Engine configuration (JSON); defaults apply when the file is missing
    #[arg(long, env = "CONCIERGE_CONFIG", default_value = "concierge.json")]
    config: PathBuf,

    #[arg(long, env = "CONCIERGE_USER")]
    user: Option<String>,

    /// Market price records (JSON array) replacing the built-in sample
    #[arg(long)]
    market: Option<PathBuf>,

    /// Loan product records (JSON array) replacing the built-in sample
    #[arg(long)]
    loans: Option<PathBuf>,

    /// Skip the document approval gate
    #[arg(long)]
    auto_approve: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a run
    Run {
        query: String,
        #[arg(long)]
        session: Option<String>,
        /// Reuse search results from the previous turn of the session
        #[arg(long)]
        reuse: bool,
    },
    /// Continue a suspended session with `{"action": ..., "modifications": ...}`
    Resume { session: String, value: String },
    /// Print the stored checkpoint of a session
    Show { session: String },
}

async fn load_config(path: &Path) -> Result<EngineConfig> {
    if tokio::fs::try_exists(path).await? {
        log::info!("Loading configuration from {:?}", path);
        EngineConfig::load(path).await
    } else {
        log::info!("No configuration at {:?}, using defaults", path);
        Ok(EngineConfig::default())
    }
}

fn print(outcome: &RunOutcome) -> Result<()> {
    let value = match outcome {
        RunOutcome::Finished(state) => json!({"outcome": "finished", "run": summary_value(state)}),
        RunOutcome::Suspended { interrupt, state } => json!({
            "outcome": "suspended",
            "run": summary_value(state),
            "interrupt": interrupt,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.config).await?;
    if cli.auto_approve {
        config.teams.auto_approve_documents = true;
    }

    let checkpoint_dir = config
        .supervisor
        .checkpoint_dir
        .clone()
        .unwrap_or_else(|| defaults::CHECKPOINT_DIR.to_string());
    let statistics_dir = config
        .orchestrator
        .statistics_dir
        .clone()
        .unwrap_or_else(|| defaults::STATISTICS_DIR.to_string());
    let checkpoints = Arc::new(FileCheckpointStore::new(&checkpoint_dir));

    if let Command::Show { session } = &cli.command {
        let Some(checkpoint) = checkpoints.get(session).await? else {
            return Err(EngineError::UnknownSession(session.clone()));
        };
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    let tools = sample::tools(cli.market.as_deref(), cli.loans.as_deref(), config.teams.tool_result_limit).await?;
    log::info!("Registered tools: {:?}", tools.names());

    let model = Arc::new(UnavailableModel);
    let executor = TeamNodeExecutor::new(TeamServices::new(model.clone(), Arc::new(tools), config.teams.clone()));
    let supervisor = Supervisor::new(
        config,
        model,
        Arc::new(CapabilityRegistry::with_default_teams()),
        Arc::new(executor),
        checkpoints,
        Arc::new(FileStatisticsStore::new(&statistics_dir)),
        Arc::new(NullProgressSink),
    );

    let outcome = match cli.command {
        Command::Run { query, session, reuse } => {
            let mut request = RunRequest::new(query);
            if let Some(session) = session {
                request = request.with_session(session);
            }
            if let Some(user) = cli.user {
                request = request.with_user(user);
            }
            if reuse {
                request = request.reuse_previous_data();
            }
            supervisor.run(request).await?
        }
        Command::Resume { session, value } => {
            let value: Value = serde_json::from_str(&value)?;
            supervisor.resume(&session, value).await?
        }
        Command::Show { .. } => return Ok(()),
    };
    print(&outcome)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
