//! Warden CLI
//!
//! The `warden` command drives a Warden engine whose state lives in a
//! snapshot store, one invocation per operation.
//!
//! ## Commands
//!
//! - `refresh`: compile violation records into learned patterns
//! - `check`: decide on one proposed action (dry-run unless `--record`)
//! - `query`: pre-check a free-text request
//! - `report`: show an agent's compliance summary
//! - `patterns`: list the active pattern set
//! - `agents`: list known agents

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use warden_core::metrics::METRICS;
use warden_core::{
    ActionEvent, ActionType, AgentReport, CompileReport, Engine, EngineConfig,
    InterventionResult, RawViolationRecord, SnapshotPersister, StartupSource,
};
use warden_state::{FsSnapshotStore, SnapshotStore, SurrealSnapshotStore};

#[derive(Parser)]
#[command(name = "warden")]
#[command(version = warden_core::VERSION)]
#[command(about = "Violation risk scoring and intervention gate for autonomous agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output and JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding persisted engine state
    #[arg(long, global = true, env = "WARDEN_STATE_DIR", default_value = ".warden")]
    state_dir: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot backend
    #[arg(long, global = true, value_enum, default_value_t = StoreKind::Fs)]
    store: StoreKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Snapshot files under the state directory
    Fs,
    /// SurrealDB (`SURREALDB_URL`, or embedded under the state directory)
    Surreal,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile violation records (JSON array) into learned patterns
    Refresh {
        /// Path to the records file
        #[arg(short, long)]
        records: PathBuf,
    },

    /// Decide on a proposed action
    Check {
        /// Acting agent
        #[arg(short, long)]
        agent: String,

        /// create, modify, delete or query
        #[arg(long)]
        action: ActionType,

        /// File path (or query text for `query`)
        #[arg(short, long)]
        target: String,

        /// Record the result against the agent instead of a dry run
        #[arg(long)]
        record: bool,
    },

    /// Pre-check a free-text request; never blocks
    Query {
        #[arg(short, long)]
        agent: String,

        #[arg(long)]
        text: String,
    },

    /// Show an agent's compliance report
    Report {
        #[arg(short, long)]
        agent: String,
    },

    /// List active patterns
    Patterns,

    /// List known agents
    Agents,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    warden_core::init_tracing(cli.json, level);

    let config = EngineConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let store = open_store(cli.store, &cli.state_dir).await?;
    let persister = SnapshotPersister::new(store, config.persistence.slot.clone());

    let (engine, startup) = Engine::bootstrap(config, &persister)
        .await
        .context("Failed to load engine state")?;
    for warning in &startup.warnings {
        warn!("{warning}");
    }
    if startup.source != StartupSource::Snapshot {
        info!(source = ?startup.source, "starting from built-in patterns");
    }

    let json = cli.json;
    match cli.command {
        Commands::Refresh { records } => cmd_refresh(&engine, &records, json).map(drop)?,
        Commands::Check {
            agent,
            action,
            target,
            record,
        } => cmd_check(&engine, &agent, action, &target, record, json).map(drop)?,
        Commands::Query { agent, text } => cmd_query(&engine, &agent, &text, json).map(drop)?,
        Commands::Report { agent } => cmd_report(&engine, &agent, json).map(drop)?,
        Commands::Patterns => cmd_patterns(&engine, json)?,
        Commands::Agents => cmd_agents(&engine, json)?,
    }

    if engine.is_dirty() {
        engine
            .flush(&persister)
            .await
            .context("Failed to save engine state")?;
    }
    METRICS.flush();
    Ok(())
}

async fn open_store(kind: StoreKind, state_dir: &Path) -> Result<Arc<dyn SnapshotStore>> {
    let store: Arc<dyn SnapshotStore> = match kind {
        StoreKind::Fs => Arc::new(
            FsSnapshotStore::new(state_dir)
                .with_context(|| format!("Failed to open state directory {:?}", state_dir))?,
        ),
        StoreKind::Surreal => Arc::new(
            SurrealSnapshotStore::from_env(&state_dir.join("db"))
                .await
                .context("Failed to connect to SurrealDB")?,
        ),
    };
    Ok(store)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<RawViolationRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {:?}", path))?;
    serde_json::from_str(&text).context("Failed to parse records as a JSON array")
}

/// Compile records from a file and publish them as learned patterns
fn cmd_refresh(engine: &Engine, path: &Path, json: bool) -> Result<CompileReport> {
    let records = read_records(path)?;
    let report = engine.ingest(&records).context("Pattern refresh failed")?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Pattern set v{}: {} added, {} updated, {} skipped ({} total)",
            report.version,
            report.added,
            report.updated,
            report.skipped.len(),
            report.total_patterns
        );
        for skipped in &report.skipped {
            println!("  record {}: {}", skipped.index, skipped.reason);
        }
    }
    Ok(report)
}

/// Evaluate one action, recording it only when asked
fn cmd_check(
    engine: &Engine,
    agent: &str,
    action: ActionType,
    target: &str,
    record: bool,
    json: bool,
) -> Result<InterventionResult> {
    let event = ActionEvent::new(agent, action, target);
    let result = if record {
        engine.evaluate_action(&event)
    } else {
        engine.preview_action(&event)
    };

    if json {
        print_json(&result)?;
    } else {
        print_result(&result, !record);
    }
    Ok(result)
}

fn cmd_query(engine: &Engine, agent: &str, text: &str, json: bool) -> Result<InterventionResult> {
    let result = engine.precheck_query(agent, text);
    if json {
        print_json(&result)?;
    } else {
        print_result(&result, false);
    }
    Ok(result)
}

fn print_result(result: &InterventionResult, dry_run: bool) {
    let suffix = if dry_run { " (dry run)" } else { "" };
    println!(
        "{}: risk {:.3} ({}), agent {} is {}{}",
        result.decision.to_string().to_uppercase(),
        result.risk_score,
        result.risk_level,
        result.agent_id,
        result.agent_state,
        suffix
    );
    if let Some(reason) = &result.degraded_reason {
        println!("  degraded: {reason}");
    }
    for m in &result.matched_patterns {
        println!(
            "  [{}] {} score {:.2} x weight {:.2} = {:.3}",
            &m.pattern_id, m.category, m.match_score, m.weight, m.contribution
        );
    }
    for alt in &result.alternatives {
        println!("  try instead: {alt}");
    }
}

fn cmd_report(engine: &Engine, agent: &str, json: bool) -> Result<AgentReport> {
    let report = engine.report(agent);
    if json {
        print_json(&report)?;
        return Ok(report);
    }

    println!("Agent:         {}", report.agent_id);
    println!("State:         {}", report.state);
    println!("Compliance:    {:.2}", report.compliance_score);
    println!("Interventions: {}", report.intervention_count);
    println!(
        "Recent:        {} block, {} warn",
        report.block_count, report.warn_count
    );
    match report.last_seen {
        Some(ts) => println!("Last seen:     {}", ts.to_rfc3339()),
        None => println!("Last seen:     never"),
    }
    for r in &report.recent {
        println!(
            "  {} {} {} -> {}",
            r.evaluated_at.format("%Y-%m-%d %H:%M:%S"),
            r.action_type,
            r.target,
            r.decision
        );
    }
    Ok(report)
}

fn cmd_patterns(engine: &Engine, json: bool) -> Result<()> {
    let patterns = engine.patterns().patterns();
    if json {
        return print_json(&patterns);
    }

    if patterns.is_empty() {
        println!("No patterns.");
        return Ok(());
    }
    for p in &patterns {
        let actions: Vec<String> = p.actions.iter().map(|a| a.to_string()).collect();
        println!(
            "{}  {:<14} w={:.2}  {:<28} [{}] matched {}x",
            p.id,
            p.category,
            p.weight,
            p.rule.canonical(),
            actions.join(","),
            p.match_count
        );
    }
    Ok(())
}

fn cmd_agents(engine: &Engine, json: bool) -> Result<()> {
    let agents = engine.agents();
    if json {
        let reports: Vec<AgentReport> = agents.iter().map(|a| engine.report(a)).collect();
        return print_json(&reports);
    }

    if agents.is_empty() {
        println!("No agents seen yet.");
        return Ok(());
    }
    for agent in &agents {
        let r = engine.report(agent);
        println!(
            "{:<24} {:<12} {:.2}  {} interventions",
            r.agent_id, r.state.to_string(), r.compliance_score, r.intervention_count
        );
    }
    Ok(())
}
