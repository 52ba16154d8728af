use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};

use draftflow::artifacts::ArtifactWriter;
use draftflow::cancellation::CancellationToken;
use draftflow::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use draftflow::config::{parse_override, DraftflowConfig, DEFAULT_CONFIG_FILE};
use draftflow::core::RunStatus;
use draftflow::events::LoggingEventSink;
use draftflow::export::AuditExport;
use draftflow::observability::{init_tracing, LogFormat};
use draftflow::pipeline::{RunReport, RunRequest, Scheduler, StageGraph};
use draftflow::stages::INPUT_PATH_KEY;
use draftflow::utils::make_run_id;
use draftflow::workflow::{build_default_pipeline, SKIP_CRITIQUE, SKIP_RESEARCH, SKIP_TRANSLATE};

/// Exit status for a run stopped by the operator.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "draftflow",
    version,
    about = "Checkpointed multi-stage content generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file
    #[arg(long, global = true, env = "DRAFTFLOW_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run, or continue it if the run id already has checkpoints
    Run {
        /// Source text to process (or set `input_path` in the config)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Run identifier (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,
        /// Config override, KEY=VALUE (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
        /// Route straight from synthesis to planning
        #[arg(long)]
        skip_critique: bool,
        /// Go from the critique straight to planning, without enrichment or reading material
        #[arg(long)]
        skip_research: bool,
        /// Stop after the scripts are written
        #[arg(long)]
        skip_translate: bool,
    },
    /// Continue a run from its latest checkpoint, or re-run from a stage
    Resume {
        /// Run identifier
        run_id: String,
        /// Restore this stage's predecessor and run from here
        #[arg(long)]
        from_stage: Option<String>,
        /// Config override, KEY=VALUE (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Show the checkpoints of a run
    Status {
        /// Run identifier
        run_id: String,
    },
    /// List known runs
    Runs,
    /// Export a run's audit trail as JSON
    Audit {
        /// Run identifier
        run_id: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print the workflow graph
    Graph,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("Warning: tracing already initialized: {e}");
    }

    let config = DraftflowConfig::load(&cli.config)?;
    let graph = Arc::new(build_default_pipeline(&config.prompts)?);

    match cli.command {
        Commands::Run {
            input,
            run_id,
            overrides,
            skip_critique,
            skip_research,
            skip_translate,
        } => {
            let mut run_config = config.run_config();
            if let Some(input) = input {
                run_config.insert(INPUT_PATH_KEY.to_string(), Value::String(input.to_string_lossy().into_owned()));
            }
            for (flag, set) in [
                (SKIP_CRITIQUE, skip_critique),
                (SKIP_RESEARCH, skip_research),
                (SKIP_TRANSLATE, skip_translate),
            ] {
                if set {
                    run_config.insert(flag.to_string(), Value::Bool(true));
                }
            }
            let request = RunRequest::new(run_id.unwrap_or_else(make_run_id))
                .with_config(run_config)
                .with_overrides(parse_overrides(&overrides)?);
            execute(&config, graph, request).await
        }
        Commands::Resume {
            run_id,
            from_stage,
            overrides,
        } => {
            let store = open_store(&config)?;
            let latest = store
                .latest_checkpoint(&run_id)
                .await?
                .with_context(|| format!("run '{run_id}' has no checkpoints"))?;
            let mut request = RunRequest::new(run_id)
                .with_config(config.resume_config(latest.state.config()))
                .with_overrides(parse_overrides(&overrides)?);
            if let Some(stage) = from_stage {
                request = request.from_stage(stage);
            }
            execute(&config, graph, request).await
        }
        Commands::Status { run_id } => {
            show_status(&open_store(&config)?, &graph, &run_id).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Runs => {
            for run_id in open_store(&config)?.runs().await? {
                println!("{run_id}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Audit { run_id, output } => {
            let checkpoint = open_store(&config)?
                .latest_checkpoint(&run_id)
                .await?
                .with_context(|| format!("run '{run_id}' has no checkpoints"))?;
            let export = AuditExport::from_state(&checkpoint.state);
            match output {
                Some(path) => {
                    export.write_to(&path)?;
                    println!("Wrote {} audit entries to {}", export.entries.len(), path.display());
                }
                None => println!("{}", export.to_json_pretty()?),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Graph => {
            println!("{}", serde_json::to_string_pretty(&graph.describe())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_overrides(raw: &[String]) -> anyhow::Result<BTreeMap<String, Value>> {
    raw.iter()
        .map(|s| parse_override(s).map_err(anyhow::Error::from))
        .collect()
}

fn open_store(config: &DraftflowConfig) -> anyhow::Result<SqliteCheckpointStore> {
    let path = config.run.checkpoint_path();
    SqliteCheckpointStore::new(&path)
        .with_context(|| format!("failed to open checkpoint store at {}", path.display()))
}

#[cfg(feature = "ollama")]
fn attach_backend(scheduler: Scheduler, config: &DraftflowConfig) -> anyhow::Result<Scheduler> {
    use draftflow::invoke::{OllamaBackend, ResilientInvoker};

    let backend = OllamaBackend::new(&config.backend.base_url, config.backend.timeout())?;
    let invoker = ResilientInvoker::new(Arc::new(backend))
        .with_retry(config.retry.clone())
        .with_call_timeout(config.backend.timeout());
    Ok(scheduler.with_invoker(invoker))
}

#[cfg(not(feature = "ollama"))]
fn attach_backend(scheduler: Scheduler, _config: &DraftflowConfig) -> anyhow::Result<Scheduler> {
    warn!("Built without the 'ollama' feature; generative stages will fail");
    Ok(scheduler)
}

async fn execute(
    config: &DraftflowConfig,
    graph: Arc<StageGraph>,
    request: RunRequest,
) -> anyhow::Result<ExitCode> {
    let token = Arc::new(CancellationToken::new());
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the run");
            signal_token.cancel("interrupted by operator");
        }
    });

    let artifacts = ArtifactWriter::new(config.run.artifact_dir());
    let run_dir = artifacts.run_dir(&request.run_id);
    let scheduler = Scheduler::new(graph, Arc::new(open_store(config)?))
        .with_event_sink(Arc::new(LoggingEventSink::default()))
        .with_artifacts(artifacts)
        .with_cancellation(token);
    let scheduler = attach_backend(scheduler, config)?;

    let report = scheduler.run(request).await?;
    print_report(&report, &run_dir);

    Ok(match report.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Interrupted { .. } => ExitCode::from(EXIT_INTERRUPTED),
        _ => ExitCode::FAILURE,
    })
}

fn print_report(report: &RunReport, run_dir: &Path) {
    info!(
        run_id = %report.run_id,
        status = %report.status,
        executed = report.executed.len(),
        degraded = report.degraded,
        duration_ms = report.duration_ms,
        "Run finished"
    );

    println!("Run:       {}", report.run_id);
    println!("Status:    {}", report.status);
    if let Some(from) = &report.resumed_from {
        println!("Restored:  {from}");
    }
    println!("Executed:  {}", report.executed.join(", "));
    println!("Degraded:  {}", report.degraded);
    println!("Artifacts: {}", run_dir.display());
    if !report.is_completed() {
        println!("Resume with: draftflow resume {}", report.run_id);
    }
}

async fn show_status(store: &dyn CheckpointStore, graph: &StageGraph, run_id: &str) -> anyhow::Result<()> {
    let checkpoints = store.list(run_id).await?;
    if checkpoints.is_empty() {
        bail!("run '{run_id}' has no checkpoints");
    }

    println!("Run: {run_id}");
    for c in &checkpoints {
        println!(
            "  {:>2}  {:<16} seq {:<4} {}{}",
            c.ordinal,
            c.stage_id,
            c.sequence,
            c.saved_at.to_rfc3339(),
            if c.current { "" } else { "  (superseded)" }
        );
    }

    if let Some(latest) = store.latest_checkpoint(run_id).await? {
        match graph.next(&latest.stage_id, &latest.state) {
            Some(next) => println!("Next stage: {next}"),
            None => println!("Completed"),
        }
    }
    Ok(())
}
