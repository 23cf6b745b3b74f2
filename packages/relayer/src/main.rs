//! Sifchain Peggy bridge relayer
//!
//! `ebrelayer listen` follows the Cosmos chain and relays lock/burn events
//! as prophecy claims; `ebrelayer replay` re-processes a historical range;
//! `ebrelayer checkpoint` prints the last processed Cosmos height.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tokio::sync::watch;

use ebrelayer::checkpoint::CheckpointStore;
use ebrelayer::config::Config;
use ebrelayer::destination::{DestinationLedger, EvmDestination};
use ebrelayer::listener::Listener;
use ebrelayer::replay::{ReplayRange, Replayer};
use ebrelayer::scanner::Scanner;
use ebrelayer::server::{self, AppState};
use ebrelayer::source::{SourceLedger, TendermintSource};
use ebrelayer::submitter::Submitter;
use ebrelayer::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "ebrelayer")]
#[command(about = "Relays Cosmos lock/burn events to the EVM bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a .env file
    #[arg(long, global = true, default_value = ".env")]
    env_file: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow new Cosmos blocks and relay events until interrupted
    Listen,

    /// Re-process a historical Cosmos range, skipping claims already on the EVM chain
    Replay {
        /// First Cosmos height to replay
        #[arg(long)]
        source_from: u64,

        /// Cosmos height to stop before (exclusive)
        #[arg(long)]
        source_to: u64,

        /// First EVM block to scan for relayed claims
        #[arg(long)]
        dest_from: u64,

        /// Last EVM block to scan for relayed claims (inclusive)
        #[arg(long)]
        dest_to: u64,
    },

    /// Print the last processed Cosmos height
    Checkpoint,
}

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> eyre::Result<()> {
    init_logging();

    if let Commands::Checkpoint = cli.command {
        return show_checkpoint(&cli.env_file);
    }

    let config = Config::load_from_file(&cli.env_file)?;
    tracing::info!(
        evm_chain_id = config.evm.chain_id,
        tendermint_rpc = %config.tendermint.rpc_url,
        registry = %config.evm.registry_address,
        "Configuration loaded"
    );

    let tendermint = &config.tendermint;
    let source = match tendermint.compat_mode {
        Some(compat) => TendermintSource::new(&tendermint.rpc_url, &tendermint.ws_url, compat)?,
        None => TendermintSource::detect(&tendermint.rpc_url, &tendermint.ws_url)
            .await
            .wrap_err("Failed to detect Tendermint RPC dialect")?,
    };
    tracing::info!(compat_mode = %source.compat_mode(), "Tendermint client ready");
    let source: Arc<dyn SourceLedger> = Arc::new(source);
    let destination: Arc<dyn DestinationLedger> = Arc::new(EvmDestination::new(
        &config.evm.rpc_url,
        config.evm.chain_id,
        config.evm.registry_address,
        &config.evm.private_key,
    )?);
    let submitter = Submitter::new(
        destination.clone(),
        config.relayer.gas_policy(),
        config.relayer.retry_policy(),
    );

    match cli.command {
        Commands::Listen => listen(&config, source, submitter).await,
        Commands::Replay {
            source_from,
            source_to,
            dest_from,
            dest_to,
        } => {
            let range = ReplayRange {
                source_from,
                source_to,
                dest_from,
                dest_to,
            };
            let mut replayer = Replayer::new(source, Scanner::new(destination), submitter);

            tokio::select! {
                result = replayer.replay(range) => {
                    let summary = result?;
                    tracing::info!(?summary, "Replay complete");
                }
                _ = wait_for_shutdown_signal() => {
                    tracing::warn!("Replay interrupted");
                }
            }
            Ok(())
        }
        Commands::Checkpoint => show_checkpoint(&cli.env_file),
    }
}

fn show_checkpoint(env_file: &str) -> eyre::Result<()> {
    let path = Config::checkpoint_db_path_from_file(env_file)?;
    let store = CheckpointStore::open_read_only(&path)
        .wrap_err_with(|| format!("Failed to open checkpoint store at {}", path.display()))?;

    match store.load() {
        Some(height) => println!("{}", height),
        None => tracing::info!(path = %path.display(), "No block processed yet"),
    }
    Ok(())
}

async fn listen(
    config: &Config,
    source: Arc<dyn SourceLedger>,
    submitter: Submitter,
) -> eyre::Result<()> {
    tracing::info!("Starting bridge relayer");

    let checkpoint = CheckpointStore::open(&config.relayer.checkpoint_db_path)
        .wrap_err("Failed to open checkpoint store")?;

    // Setup signal handlers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let supervisor = Supervisor::new(config.relayer.restart_delay(), shutdown_rx.clone());

    // Start metrics/API server
    if config.api.port != 0 {
        let state = AppState {
            supervisor: supervisor.subscribe(),
        };
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = server::start_server("0.0.0.0", port, state).await {
                tracing::error!(error = %e, "API server error");
            }
        });
    }

    let listener = Listener::new(source, submitter, checkpoint, shutdown_rx);
    match supervisor.run(listener).await {
        Ok(listener) => {
            tracing::info!(
                checkpoint = ?listener.checkpoint(),
                nonce = ?listener.submitter().nonce(),
                "Bridge relayer stopped"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Listener failed fatally");
            Err(e.into())
        }
    }
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ebrelayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
