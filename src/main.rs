//! gameline - batch consolidation of scraped game data
//!
//! Reads the per-source JSON drops under `--input`, runs normalize, consolidate and
//! validate over the batch, and writes accepted and flagged games to SQLite and/or a
//! JSON report.
//!
//! Usage:
//!   gameline run --input data/raw --db gameline.db --report reports/latest.json
//!   gameline check-config --config gameline.toml
//!   gameline default-config > gameline.toml
//!
//! Exit codes:
//!   0 - run completed, nothing flagged
//!   1 - run completed, some games flagged for review
//!   2 - configuration error
//!   3 - runtime error (I/O, sink, cancellation)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use gameline::consolidation::{
    gather_sources, DirectorySourceReader, GameSink, JsonReportSink, Pipeline, PipelineConfig,
    RunCancellation, RunReport, SqliteSink, ValidatedConfig,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_CLEAN: i32 = 0;
const EXIT_FLAGGED: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_RUNTIME: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "gameline")]
#[command(about = "Consolidate and validate scraped game data")]
#[command(version)]
struct Args {
    /// Pipeline configuration (TOML). Built-in defaults when omitted.
    #[arg(long, global = true, env = "GAMELINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one batch over the input directory
    Run {
        /// Root of the per-source JSON directories
        #[arg(long, env = "GAMELINE_INPUT", default_value = "data/raw")]
        input: PathBuf,

        /// SQLite database for accepted and flagged games
        #[arg(long, env = "GAMELINE_DB")]
        db: Option<PathBuf>,

        /// Write the full run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Per-reader timeout
        #[arg(long, default_value = "30")]
        reader_timeout_secs: u64,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Print the default configuration as TOML
    DefaultConfig,
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() {
    load_env();
    init_tracing();

    let args = Args::parse();

    let code = match args.command {
        Commands::DefaultConfig => match PipelineConfig::default().to_toml() {
            Ok(toml) => {
                print!("{}", toml);
                EXIT_CLEAN
            }
            Err(e) => {
                error!(error = %e, "Failed to render default configuration");
                EXIT_RUNTIME
            }
        },
        Commands::CheckConfig => match load_config(args.config.as_deref()) {
            Ok(config) => {
                println!(
                    "Configuration OK: priority [{}], required [{}]",
                    join(config.priority().order()),
                    join(config.required_sources())
                );
                EXIT_CLEAN
            }
            Err(code) => code,
        },
        Commands::Run {
            input,
            db,
            report,
            reader_timeout_secs,
        } => {
            let config = match load_config(args.config.as_deref()) {
                Ok(config) => config,
                Err(code) => std::process::exit(code),
            };
            match run(config, &input, db.as_deref(), report.as_deref(), reader_timeout_secs).await {
                Ok(report) if report.is_clean() => EXIT_CLEAN,
                Ok(_) => EXIT_FLAGGED,
                Err(e) => {
                    error!(error = %format!("{:#}", e), "Run failed");
                    EXIT_RUNTIME
                }
            }
        }
    };

    std::process::exit(code);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gameline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_env() {
    let _ = dotenv();

    // Also try the crate root when invoked from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

/// Configuration errors are fatal before any record is read.
fn load_config(path: Option<&Path>) -> Result<ValidatedConfig, i32> {
    let config = match path {
        Some(path) => PipelineConfig::load(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to load configuration");
            EXIT_CONFIG
        })?,
        None => {
            info!("No configuration file given, using built-in defaults");
            PipelineConfig::default()
        }
    };
    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        EXIT_CONFIG
    })
}

async fn run(
    config: ValidatedConfig,
    input: &Path,
    db: Option<&Path>,
    report_path: Option<&Path>,
    reader_timeout_secs: u64,
) -> Result<RunReport> {
    // Open sinks first so a bad path fails before the readers run
    let mut sinks: Vec<Box<dyn GameSink>> = Vec::new();
    if let Some(db) = db {
        let sink = SqliteSink::open(db)
            .with_context(|| format!("Failed to open game store {}", db.display()))?;
        sinks.push(Box::new(sink));
    }
    if let Some(path) = report_path {
        sinks.push(Box::new(JsonReportSink::new(path)));
    }
    if sinks.is_empty() {
        warn!("No --db or --report given, results are only logged");
    }

    let cancel = RunCancellation::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    info!(input = %input.display(), timeout_secs = reader_timeout_secs, "Reading sources");
    let readers = DirectorySourceReader::for_all_sources(input);
    let run_input = gather_sources(
        &readers,
        Duration::from_secs(reader_timeout_secs),
        &cancel,
    )
    .await?;

    let pipeline = Pipeline::new(config);
    let report = pipeline.run(run_input, &cancel)?;

    for sink in &sinks {
        sink.persist(&report).context("Failed to persist run")?;
    }

    print_summary(&report);
    Ok(report)
}

fn print_summary(report: &RunReport) {
    println!("Run {}", report.fingerprint);
    println!("  games:    {}", report.game_count());
    println!("  accepted: {}", report.accepted.len());
    println!("  flagged:  {}", report.flagged.len());
    for absent in &report.absent_sources {
        println!("  absent:   {} ({})", absent.source, absent.reason);
    }
    for flagged in &report.flagged {
        println!("  ! {}", flagged.game.game_key());
        for violation in &flagged.violations {
            println!(
                "      [{} {:?}] {}",
                violation.check, violation.severity, violation.message
            );
        }
    }
}

fn join<'a, T: std::fmt::Display + 'a>(items: impl IntoIterator<Item = &'a T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
