use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, level_filters::LevelFilter, warn};

use pinger::console::{render_targets, run_console};
use pinger::database::{DatabaseImpl, TargetRepository};
use pinger::monitoring::StatusClass;
use pinger::{Config, Orchestrator};

#[derive(Debug, Parser)]
#[command(name = "pinger", version, about = "Watch HTTP endpoints and track their status")]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monitor every saved target and read commands from stdin
    Run,
    /// Show saved targets; add and remove them from the `run` console
    List,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;

    let level: LevelFilter = config.logging.level.parse().unwrap_or(LevelFilter::INFO);
    let format = config.logging.format.parse().ok();
    logger::init_with(level, format);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::List => {
            let database = DatabaseImpl::open(&config.storage.database_path).await?;
            println!("{}", render_targets(&database.load_targets().await?));
            Ok(())
        }
        Command::Config => {
            print!("{config}");
            Ok(())
        }
    }
}

async fn run(config: &Config) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config).await?;
    let restored = orchestrator.restore().await?;
    info!("Monitoring {} targets, type `help` for commands", restored);

    let mut changes = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status reporter fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let marker = match change.class() {
                StatusClass::Healthy => "ok",
                StatusClass::Redirect => "redirect",
                StatusClass::Failing | StatusClass::Unknown => "FAIL",
            };
            println!("[{marker}] {} {} -> {}", change.name, change.url, change.current);
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let default_frequency = config.monitor.default_frequency_seconds;

    tokio::select! {
        _ = async {
            run_console(&orchestrator, stdin, default_frequency).await;
            // Keep monitoring after stdin closes
            std::future::pending::<()>().await
        } => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("Shutting down");
        }
    }

    orchestrator.shutdown().await;
    reporter.abort();
    Ok(())
}
