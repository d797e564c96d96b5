//! warmpathd: the warmpath daemon.
//!
//! Runs the decision pipeline (reasoning worker, rule compaction) until
//! interrupted, and doubles as a command-line front end for the model
//! registry.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use warmpath::config::{Config, Secrets};
use warmpath::{Orchestrator, OrchestratorBuilder};

/// Warmpath daemon for adaptive cache-control decisions.
#[derive(Parser)]
#[command(name = "warmpathd")]
#[command(version = warmpath::PKG_VERSION)]
#[command(about = "Warmpath cache-control decision daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "WARMPATH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the decision pipeline until interrupted (default)
    Run,

    /// List staged model versions and the deployed slots
    Models,

    /// Train a new model version from a decision log
    Train {
        /// Training dataset (default: configured decision log)
        #[arg(short, long)]
        dataset: Option<PathBuf>,
    },

    /// Deploy a staged version to the active or canary slot
    Deploy {
        /// Version id, e.g. 20240101_120000
        version: String,
        /// Deploy to the canary slot instead of active
        #[arg(long)]
        canary: bool,
        /// Tenants routed to the canary (repeatable)
        #[arg(long = "tenant")]
        tenants: Vec<String>,
    },

    /// Roll back the active slot, or clear the canary
    Rollback {
        /// Only clear the canary slot
        #[arg(long)]
        canary_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: info for warmpath; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warmpath=info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load_or_default(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let orchestrator = OrchestratorBuilder::from_config(&config, &secrets)?.build()?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&orchestrator, &config).await?,
        Command::Models => {
            let list = orchestrator.list_models()?;
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        Command::Train { dataset } => {
            let job = orchestrator.train_model(dataset.as_deref())?;
            println!("training {}", job.version);
            let version = job.version.clone();
            job.wait().await?;
            println!("trained {version}");
        }
        Command::Deploy {
            version,
            canary,
            tenants,
        } => {
            orchestrator.deploy_model(&version, canary, &tenants)?;
            let slot = if canary { "canary" } else { "active" };
            println!("deployed {version} to {slot}");
        }
        Command::Rollback { canary_only } => {
            let outcome = orchestrator.rollback_model(canary_only)?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
    }

    Ok(())
}

async fn run(orchestrator: &Orchestrator, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        version = warmpath::PKG_VERSION,
        reasoning = orchestrator.queue().is_enabled(),
        "warmpathd starting"
    );

    orchestrator.start();
    let compaction = orchestrator.spawn_compaction(config.sequence.compaction_interval());
    let mut report = tokio::time::interval(Duration::from_secs(60));
    report.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = report.tick() => {
                let stats = orchestrator.queue_stats();
                info!(
                    requests = stats.requests_total,
                    succeeded = stats.requests_succeeded,
                    rate_limited = stats.requests_rate_limited,
                    monthly_tokens = stats.monthly_tokens_used,
                    queue_depth = stats.queue_depth,
                    tenants = orchestrator.sequence().tenant_count(),
                    "reasoning queue status"
                );
            }
        }
    }

    info!("warmpathd shutting down");
    compaction.abort();
    orchestrator.shutdown().await;
    Ok(())
}
