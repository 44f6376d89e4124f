//! mssql-pg-schema CLI - SQL Server to PostgreSQL schema migration.

use clap::{Parser, Subcommand};
use mssql_pg_schema::analyzer::analyze_catalog;
use mssql_pg_schema::drivers::{MssqlRowSource, PgExecutor};
use mssql_pg_schema::orchestrator::JsonFileSink;
use mssql_pg_schema::translate::TranslationStatus;
use mssql_pg_schema::{
    Catalog, Config, FileStateBackend, MigrateError, MigrationReport, Orchestrator, QualifiedName,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when a run finished with failed units.
const EXIT_UNITS_FAILED: u8 = 4;

/// Exit code when a run was stopped by a signal.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "mssql-pg-schema")]
#[command(about = "SQL Server to PostgreSQL schema migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Write the execution log as a JSON audit file
    #[arg(long)]
    audit_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the migration plan and print it without touching the target
    Plan {
        /// Path to the source catalog JSON document
        #[arg(long)]
        catalog: PathBuf,
    },

    /// Start a new migration
    Run {
        /// Path to the source catalog JSON document
        #[arg(long)]
        catalog: PathBuf,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Dry run: validate and show plan without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// Resume a previously interrupted migration
    Resume {
        /// Path to the source catalog JSON document
        #[arg(long)]
        catalog: PathBuf,

        /// Run to resume (default: latest run for this configuration)
        #[arg(long)]
        run_id: Option<String>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Report compatibility and performance findings for the catalog
    Analyze {
        /// Path to the source catalog JSON document
        #[arg(long)]
        catalog: PathBuf,
    },

    /// Print the translated PostgreSQL DDL
    Translate {
        /// Path to the source catalog JSON document
        #[arg(long)]
        catalog: PathBuf,

        /// Only translate this object (schema.name)
        #[arg(long)]
        object: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Plan { ref catalog } => {
            let orchestrator = Orchestrator::new(config, load_catalog(catalog)?)?;
            let report = orchestrator.run(None, true).await?;
            print_report(&report, cli.output_json)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run {
            ref catalog,
            workers,
            dry_run,
        } => {
            if let Some(w) = workers {
                config.migration.worker_count = Some(w);
            }
            let config = config.with_auto_tuning();
            let catalog = load_catalog(catalog)?;
            let dry_run = dry_run || config.migration.dry_run;

            let orchestrator = if dry_run {
                Orchestrator::new(config, catalog)?
            } else {
                let cancel = setup_signal_handler();
                connect(&cli, config, catalog).await?.with_cancellation(cancel)
            };

            let report = orchestrator.run(None, dry_run).await?;
            print_report(&report, cli.output_json)?;
            Ok(report_exit_code(&report))
        }

        Commands::Resume {
            ref catalog,
            ref run_id,
            workers,
        } => {
            // State file is required for resume
            let state_file = cli.state_file.as_deref().ok_or_else(|| {
                MigrateError::Config("--state-file is required for resume".to_string())
            })?;
            if !state_file.exists() {
                return Err(MigrateError::Config(format!(
                    "State file not found: {:?}",
                    state_file
                )));
            }

            if let Some(w) = workers {
                config.migration.worker_count = Some(w);
            }
            let config = config.with_auto_tuning();
            let catalog = load_catalog(catalog)?;

            let cancel = setup_signal_handler();
            let orchestrator = connect(&cli, config, catalog).await?.with_cancellation(cancel);

            let report = match run_id {
                Some(id) => {
                    info!("Resuming run {}", id);
                    orchestrator.run(Some(id), false).await?
                }
                None => {
                    info!("Resuming latest run from {:?}", state_file);
                    orchestrator.resume_latest().await?
                }
            };
            print_report(&report, cli.output_json)?;
            Ok(report_exit_code(&report))
        }

        Commands::Analyze { ref catalog } => {
            let catalog = load_catalog(catalog)?;
            let findings = analyze_catalog(&catalog);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&findings)?);
            } else if findings.is_empty() {
                println!("No findings");
            } else {
                println!("Findings ({}):", findings.len());
                for finding in &findings {
                    println!("  {}", finding);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Translate {
            ref catalog,
            ref object,
        } => {
            let orchestrator = Orchestrator::new(config, load_catalog(catalog)?)?;
            let plan = orchestrator.plan()?;

            match object {
                Some(name) => {
                    let qualified = QualifiedName::parse(name).ok_or_else(|| {
                        MigrateError::Config(format!("invalid object name: {}", name))
                    })?;
                    let translated = plan.translation(&qualified).ok_or_else(|| {
                        MigrateError::Config(format!("object not found in plan: {}", qualified))
                    })?;

                    if cli.output_json {
                        println!("{}", serde_json::to_string_pretty(translated)?);
                    } else if translated.status == TranslationStatus::RequiresManualReview {
                        println!("-- {} requires manual review", translated.name);
                        for reason in translated.reasons() {
                            println!("--   {}", reason);
                        }
                    } else {
                        print!("{}", translated.script());
                    }
                }
                None => {
                    if cli.output_json {
                        println!("{}", serde_json::to_string_pretty(&plan.translations)?);
                    } else {
                        print!("{}", plan.ddl_script());
                        for translated in plan.translations.iter().filter(|t| !t.is_translated()) {
                            println!(
                                "-- {} requires manual review: {}",
                                translated.name,
                                translated.reasons().join("; ")
                            );
                        }
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_catalog(path: &Path) -> Result<Arc<Catalog>, MigrateError> {
    let catalog = Catalog::load(path)?;
    info!("Loaded catalog from {:?} ({} objects)", path, catalog.len());
    Ok(Arc::new(catalog))
}

/// Build an orchestrator wired to live databases and the requested
/// state and audit files.
async fn connect(
    cli: &Cli,
    config: Config,
    catalog: Arc<Catalog>,
) -> Result<Orchestrator, MigrateError> {
    let target = PgExecutor::new(&config.target, config.migration.get_max_target_connections()).await?;
    let source = MssqlRowSource::new(
        config.source.clone(),
        config.migration.get_max_source_connections() as u32,
    )
    .await?;

    let mut orchestrator = Orchestrator::new(config, catalog)?
        .with_target(Arc::new(target))
        .with_source(Arc::new(source));

    if let Some(path) = &cli.state_file {
        orchestrator = orchestrator.with_state_backend(Arc::new(FileStateBackend::new(path)));
    }
    if let Some(path) = &cli.audit_file {
        orchestrator = orchestrator.with_log_sink(Arc::new(JsonFileSink::new(path)));
    }

    Ok(orchestrator)
}

fn report_exit_code(report: &MigrationReport) -> ExitCode {
    if report.is_cancelled() {
        ExitCode::from(EXIT_CANCELLED)
    } else if report.has_failures() {
        ExitCode::from(EXIT_UNITS_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_report(report: &MigrationReport, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    let status_msg = match report.status.as_str() {
        "dry_run" => "Dry run completed!",
        "completed" => "Migration completed!",
        "completed_with_skips" => "Migration completed with skipped units",
        "cancelled" => "Migration cancelled",
        _ => "Migration failed",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);

    if report.dry_run {
        println!("  Units: {}", report.units.len());
        for (position, unit) in report.units.iter().enumerate() {
            match &unit.error {
                Some(error) => println!("    {:>4}. {} [{}] {}", position + 1, unit.id, unit.status, error),
                None => println!("    {:>4}. {} [{}]", position + 1, unit.id, unit.status),
            }
        }
    } else {
        println!(
            "  Units: {} committed, {} failed, {} skipped (of {})",
            report.committed,
            report.failed,
            report.skipped,
            report.units.len()
        );
        println!("  Rows: {}", report.rows_transferred);
        for unit in report.units.iter().filter(|u| u.error.is_some()) {
            println!(
                "    {} [{}]: {}",
                unit.id,
                unit.status,
                unit.error.as_deref().unwrap_or_default()
            );
        }
    }

    if !report.excluded.is_empty() {
        println!("  Excluded:");
        for excluded in &report.excluded {
            println!("    {} ({})", excluded.name, excluded.reason);
        }
    }
    if !report.diagnostics.is_empty() {
        println!("  Diagnostics:");
        for diagnostic in &report.diagnostics {
            println!("    {}: {}", diagnostic.object, diagnostic.message);
        }
    }
    if !report.findings.is_empty() {
        println!("  Findings: {}", report.findings.len());
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json keeps stdout clean.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, label) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!(
                        "\nReceived {}. Finishing in-flight batches and shutting down...",
                        label
                    );
                    token.cancel();
                });
            }
            Err(e) => eprintln!("Failed to setup {} handler: {}", label, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    cancel_token
}
