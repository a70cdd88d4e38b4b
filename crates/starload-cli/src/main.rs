//! starload CLI - build and load star-schema warehouse tables in MySQL.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use starload::error::EXIT_OTHER_ERROR;
use starload::{Command, Config, LoadError, Orchestrator, RunSummary};
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SINCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Parser)]
#[command(name = "starload")]
#[command(about = "Star-schema warehouse loader for MySQL")]
#[command(version)]
struct Cli {
    /// Path to the warehouse definition
    #[arg(short, long, default_value = "warehouse.yaml")]
    config: PathBuf,

    /// Directory of layered settings files; overrides --config
    #[arg(long)]
    settings_dir: Option<PathBuf>,

    /// Output the run summary as JSON
    #[arg(long)]
    output_json: bool,

    /// Log format (text or json)
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing fact and dimension tables
    Build {
        /// Facts to build, or "all"
        #[arg(default_value = "all")]
        tables: Vec<String>,
    },

    /// Load new rows from each table's source
    Update {
        /// Facts to update, or "all"
        #[arg(default_value = "all")]
        tables: Vec<String>,

        /// Only rows changed since this time (YYYY-MM-DD HH:MM:SS)
        #[arg(long, value_parser = parse_since)]
        since: Option<NaiveDateTime>,
    },

    /// Load rows from each fact's historical source
    Historical {
        /// Facts to load
        #[arg(required = true)]
        tables: Vec<String>,

        /// Only rows changed since this time (YYYY-MM-DD HH:MM:SS)
        #[arg(long, value_parser = parse_since)]
        since: Option<NaiveDateTime>,
    },

    /// Test the warehouse connection and packet limits
    HealthCheck,
}

fn parse_since(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, SINCE_FORMAT)
        .map_err(|e| format!("expected YYYY-MM-DD HH:MM:SS: {}", e))
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_OTHER_ERROR),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

/// Returns whether every table finished without an error.
async fn run() -> Result<bool, LoadError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)?;

    let config = match &cli.settings_dir {
        Some(dir) => Config::load_layers(&Config::default_layers(dir))?,
        None => Config::load(&cli.config)?,
    };
    let orchestrator = Orchestrator::from_config(&config)?;

    let (command, tables, since) = match cli.command {
        Commands::Build { tables } => (Command::Build, tables, None),
        Commands::Update { tables, since } => (Command::Update, tables, since),
        Commands::Historical { tables, since } => (Command::Historical, tables, since),
        Commands::HealthCheck => {
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Warehouse ({}): {} ({}ms)",
                    result.warehouse,
                    if result.warehouse_connected { "OK" } else { "FAILED" },
                    result.warehouse_latency_ms
                );
                if let Some(ref err) = result.warehouse_error {
                    println!("    Error: {}", err);
                }
                match (&result.packet_limits, &result.packet_limit_error) {
                    (Some(limits), _) => println!(
                        "  Packet limit: {} bytes (server {}, client {})",
                        limits.effective(),
                        limits.server,
                        limits.client
                    ),
                    (None, Some(err)) => println!("  Packet limit: FAILED\n    Error: {}", err),
                    (None, None) => {}
                }
                println!(
                    "  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(LoadError::Connection("Health check failed".to_string()));
            }
            return Ok(true);
        }
    };

    info!("Running {} for {}", command, tables.join(", "));
    let summary = orchestrator.run(command, &tables, since).await?;

    if cli.output_json {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary);
    }

    Ok(summary.is_success())
}

fn print_summary(summary: &RunSummary) {
    println!("\n{} completed", summary.command);
    println!("  Run ID: {}", summary.run_id);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    println!("  Tables: {}", summary.outcomes.len());
    println!("  Rows fetched: {}", summary.rows_fetched());
    println!("  Rows failed: {}", summary.rows_failed());

    for outcome in &summary.outcomes {
        match &outcome.error {
            None => println!(
                "    {} ({}): {} fetched, {} failed",
                outcome.table, outcome.role, outcome.fetched, outcome.failed_rows
            ),
            Some(err) => println!("    {} ({}): FAILED: {}", outcome.table, outcome.role, err),
        }
    }

    let failed = summary.failed_tables();
    if !failed.is_empty() {
        println!("\n  Failed tables: {}", failed.join(", "));
    }
}

/// Logs go to stderr so `--output-json` keeps stdout parseable. `RUST_LOG`
/// overrides `--verbosity` when set.
fn setup_logging(verbosity: &str, format: &str) -> Result<(), LoadError> {
    let level = match verbosity.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        other => {
            return Err(LoadError::Config(format!(
                "unknown verbosity '{}' (expected trace, debug, info, warn or error)",
                other
            )))
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => builder.json().init(),
        "text" => builder.init(),
        other => {
            return Err(LoadError::Config(format!(
                "unknown log format '{}' (expected text or json)",
                other
            )))
        }
    }

    Ok(())
}
