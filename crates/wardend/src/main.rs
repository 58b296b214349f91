//! Warden daemon
//!
//! Reads newline-delimited JSON requests on stdin and answers each with one
//! JSON line on stdout. State is flushed in the background while dirty and
//! once more on EOF or Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn, Level};

use warden_core::metrics::METRICS;
use warden_core::{
    spawn_flush_loop, ActionEvent, ActionType, AgentReport, CompileReport, Engine, EngineConfig,
    InterventionResult, RawViolationRecord, SnapshotPersister,
};
use warden_state::{FsSnapshotStore, SnapshotStore, SurrealSnapshotStore};

#[derive(Parser)]
#[command(name = "wardend")]
#[command(version = warden_core::VERSION)]
#[command(about = "Warden gate daemon (NDJSON over stdin/stdout)", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Directory holding persisted engine state
    #[arg(long, env = "WARDEN_STATE_DIR", default_value = ".warden")]
    state_dir: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Persist to SurrealDB instead of snapshot files
    #[arg(long)]
    surreal: bool,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    Action {
        agent_id: String,
        action_type: ActionType,
        target: String,
        #[serde(default)]
        dry_run: bool,
    },
    Query {
        agent_id: String,
        text: String,
    },
    Report {
        agent_id: String,
    },
    Refresh {
        records: Vec<RawViolationRecord>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Response {
    Result { result: InterventionResult },
    Report { report: AgentReport },
    Refresh { report: CompileReport },
    Error { message: String },
}

impl Response {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

async fn handle(engine: &Arc<Engine>, request: Request) -> Response {
    match request {
        Request::Action {
            agent_id,
            action_type,
            target,
            dry_run,
        } => {
            let event = ActionEvent::new(agent_id, action_type, target);
            let result = if dry_run {
                engine.preview_action(&event)
            } else {
                engine.evaluate_action(&event)
            };
            Response::Result { result }
        }
        Request::Query { agent_id, text } => Response::Result {
            result: engine.precheck_query(&agent_id, &text),
        },
        Request::Report { agent_id } => Response::Report {
            report: engine.report(&agent_id),
        },
        Request::Refresh { records } => {
            let engine = engine.clone();
            match tokio::task::spawn_blocking(move || engine.ingest(&records)).await {
                Ok(Ok(report)) => Response::Refresh { report },
                Ok(Err(e)) => Response::error(e.to_string()),
                Err(e) => Response::error(format!("refresh task failed: {e}")),
            }
        }
    }
}

async fn handle_line(engine: &Arc<Engine>, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(engine, request).await,
        Err(e) => Response::error(format!("invalid request: {e}")),
    }
}

/// Answer requests from `reader` until EOF or `shutdown` flips to `true`.
async fn serve<R, W>(
    engine: Arc<Engine>,
    reader: R,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read request")?,
            _ = shutdown.changed() => break,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&engine, &line).await;
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn open_store(args: &Args) -> Result<Arc<dyn SnapshotStore>> {
    let store: Arc<dyn SnapshotStore> = if args.surreal {
        Arc::new(
            SurrealSnapshotStore::from_env(&args.state_dir.join("db"))
                .await
                .context("Failed to connect to SurrealDB")?,
        )
    } else {
        Arc::new(
            FsSnapshotStore::new(&args.state_dir)
                .with_context(|| format!("Failed to open state directory {:?}", args.state_dir))?,
        )
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    warden_core::init_tracing(args.json, level);

    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let interval = Duration::from_secs(config.persistence.flush_interval_secs);
    let persister = Arc::new(SnapshotPersister::new(
        open_store(&args).await?,
        config.persistence.slot.clone(),
    ));

    let (engine, startup) = Engine::bootstrap(config, &persister)
        .await
        .context("Failed to load engine state")?;
    for warning in &startup.warnings {
        warn!("{warning}");
    }
    let engine = Arc::new(engine);
    info!(
        version = warden_core::VERSION,
        source = ?startup.source,
        backend = persister.backend(),
        patterns = engine.patterns().len(),
        agents = engine.agents().len(),
        "wardend started"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let flusher = spawn_flush_loop(engine.clone(), persister.clone(), interval, stop_rx.clone());

    let ctrl_c = {
        let stop_tx = stop_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                let _ = stop_tx.send(true);
            }
        })
    };

    let served = serve(
        engine.clone(),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        stop_rx,
    )
    .await;

    let _ = stop_tx.send(true);
    ctrl_c.abort();
    flusher.await.context("Flush loop panicked")?;

    if engine.is_dirty() {
        engine
            .flush(&persister)
            .await
            .context("Final flush failed")?;
    }
    METRICS.flush();
    info!("wardend stopped");
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    async fn run(engine: Arc<Engine>, input: &str) -> Vec<Value> {
        let (_tx, rx) = watch::channel(false);
        let mut out = Vec::new();
        serve(engine, input.as_bytes(), &mut out, rx).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::with_builtin(EngineConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn one_response_per_request() {
        let input = concat!(
            r#"{"type":"refresh","records":[{"category":"duplication","description":"copies","target_rule":{"kind":"prefix","value":"enhanced_"},"weight":0.9,"actions":["create","query"]}]}"#,
            "\n",
            r#"{"type":"action","agent_id":"a1","action_type":"create","target":"src/enhanced_commands.py"}"#,
            "\n\n",
            r#"{"type":"query","agent_id":"a1","text":"make enhanced_io.py"}"#,
            "\n",
            r#"{"type":"report","agent_id":"a1"}"#,
            "\n",
        );
        let responses = run(engine(), input).await;
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0]["type"], "refresh");
        assert_eq!(responses[0]["report"]["updated"], 1);
        assert_eq!(responses[1]["type"], "result");
        assert_eq!(responses[1]["result"]["decision"], "warn");
        assert_eq!(responses[2]["result"]["decision"], "warn");
        assert_eq!(responses[3]["type"], "report");
        assert_eq!(responses[3]["report"]["state"], "watched");
        assert_eq!(responses[3]["report"]["intervention_count"], 1);
    }

    #[tokio::test]
    async fn malformed_lines_get_error_responses() {
        let input = "not json\n{\"type\":\"teleport\"}\n{\"type\":\"report\",\"agent_id\":\"a9\"}\n";
        let responses = run(engine(), input).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["type"], "error");
        assert_eq!(responses[1]["type"], "error");
        assert_eq!(responses[2]["report"]["compliance_score"], 1.0);
    }

    #[tokio::test]
    async fn dry_run_leaves_no_history() {
        let engine = engine();
        let input = r#"{"type":"action","agent_id":"a2","action_type":"create","target":"enhanced_x.py","dry_run":true}"#;
        let responses = run(engine.clone(), input).await;
        assert_eq!(responses[0]["type"], "result");
        assert!(engine.agents().is_empty());
    }

    #[tokio::test]
    async fn query_action_is_prechecked_not_recorded() {
        let engine = engine();
        let input = r#"{"type":"action","agent_id":"a3","action_type":"query","target":"please add enhanced_utils_v2.py"}"#;
        let responses = run(engine.clone(), input).await;
        assert_eq!(responses[0]["type"], "result");
        assert_ne!(responses[0]["result"]["decision"], "block");
        assert!(engine.agents().is_empty());
        assert_eq!(engine.query_log("a3").len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_serving() {
        let (tx, rx) = watch::channel(false);
        let (client, server) = tokio::io::duplex(64);
        let task = tokio::spawn(serve(engine(), BufReader::new(server), Vec::new(), rx));
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        drop(client);
    }
}
