//! Storyblok ingestion CLI
//!
//! Runs one full ingestion into the filesystem node store, lists the locales
//! of a space, or prints a stored collection.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use storyblok_ingestion::{metrics, Config, FileSystemNodeStore, Orchestrator};

/// Storyblok content ingestion
#[derive(Parser, Debug)]
#[command(name = "storyblok-ingestion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Loads Storyblok stories, entity types and assets into a local node store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one full ingestion
    Run {
        /// Config file (TOML, JSON or YAML); STORYBLOK_* variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write a Prometheus text snapshot here after the run
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Print the locales a run would iterate
    Locales {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the nodes of a stored collection as JSON lines
    Show {
        /// Collection name, e.g. StoryblokEntry
        #[arg(long)]
        collection: String,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Run { config, metrics_out } => {
            let config = Config::load(config.as_deref())?;
            run(config, metrics_out).await?;
        }

        Commands::Locales { config } => {
            let config = Config::load(config.as_deref())?;
            let orchestrator = Orchestrator::from_config(&config)?;
            for locale in orchestrator.locales().await? {
                if locale.is_empty() {
                    println!("(default)");
                } else {
                    println!("{}", locale);
                }
            }
        }

        Commands::Show { collection, config } => {
            let config = Config::load(config.as_deref())?;
            let store = FileSystemNodeStore::new(&config.data_dir).await?;
            for node in store.load_collection(&collection).await? {
                println!("{}", serde_json::to_string(&node)?);
            }
        }
    }

    Ok(())
}

async fn run(config: Config, metrics_out: Option<PathBuf>) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config)?;
    let store = FileSystemNodeStore::new(&config.data_dir).await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        download_assets = config.download_assets,
        "Starting Storyblok ingestion"
    );

    let report = tokio::select! {
        result = orchestrator.run(&config, &store) => result,
        _ = shutdown_signal() => {
            warn!("Ingestion interrupted");
            bail!("interrupted before the run completed");
        }
    };

    if let Some(path) = metrics_out {
        metrics::write_snapshot(&path).await?;
    }

    let report = match report {
        Ok(report) => report,
        Err(e) if e.is_configuration() => {
            error!(error = %e, "Invalid configuration, nothing was fetched");
            return Err(e.into());
        }
        Err(e) => {
            error!(error = %e, "Ingestion run failed");
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed > 0 {
        bail!("{} load(s) failed", report.failed);
    }
    Ok(())
}
