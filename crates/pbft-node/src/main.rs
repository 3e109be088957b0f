//! PBFT Node - validator and devnet command line.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pbft_consensus::{generate_devnet_genesis, Address, ConsensusEvent, Genesis, Keypair};
use pbft_network::{MemoryNetwork, PeerId};
use pbft_node::logging::init_logging;
use pbft_node::{Devnet, Node, NodeConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// PBFT Node - Byzantine fault tolerant block ordering
#[derive(Parser, Debug)]
#[command(name = "pbft-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML, JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run validators in-process over a memory network
    Devnet {
        /// Number of validators
        #[arg(short = 'n', long, default_value_t = 4)]
        validators: usize,

        /// Submit a transfer between validator accounts on an interval
        #[arg(long)]
        demo_transfers: bool,

        /// Interval between demo transfers, in milliseconds
        #[arg(long, default_value_t = 1000)]
        transfer_interval_ms: u64,
    },

    /// Run one node from the configured genesis and key, without remote peers
    Run,

    /// Write a devnet genesis file and print the validator keys
    Genesis {
        /// Number of validators
        #[arg(short = 'n', long, default_value_t = 4)]
        validators: usize,

        /// Output path; `.yaml`/`.yml` writes YAML, anything else JSON
        #[arg(short, long, default_value = "genesis.yaml")]
        output: PathBuf,
    },

    /// Generate a validator keypair
    Keygen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Devnet {
            validators,
            demo_transfers,
            transfer_interval_ms,
        } => {
            let config = NodeConfig::load(args.config.as_deref())?;
            init_logging(&config.log_level, config.log_format);
            run_devnet(&config, validators, demo_transfers, transfer_interval_ms).await
        }
        Command::Run => {
            let config = NodeConfig::load(args.config.as_deref())?;
            init_logging(&config.log_level, config.log_format);
            run_standalone(&config).await
        }
        Command::Genesis { validators, output } => write_genesis(validators, &output),
        Command::Keygen => {
            let keypair = Keypair::generate();
            let public_key = keypair.public_key();
            println!("public_key:  {}", public_key);
            println!("address:     {}", Address::from_public_key(&public_key)?);
            println!("private_key: {}", keypair.secret_hex());
            Ok(())
        }
    }
}

async fn run_devnet(
    config: &NodeConfig,
    validators: usize,
    demo_transfers: bool,
    transfer_interval_ms: u64,
) -> anyhow::Result<()> {
    if validators == 0 {
        bail!("a devnet needs at least one validator");
    }

    let devnet = Devnet::launch(validators, config).context("failed to launch devnet")?;
    let mut events = devnet.nodes()[0].engine().subscribe();
    let mut transfers = tokio::time::interval(Duration::from_millis(transfer_interval_ms.max(1)));
    let mut round = 0u64;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!("Devnet is running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(ConsensusEvent::BlockCommitted { height, view, block_id, tx_count }) => {
                    tracing::info!(height, view, block_id = %block_id, tx_count, "block committed");
                }
                Ok(ConsensusEvent::ViewChanged { height, view }) => {
                    tracing::info!(height, view, "view changed");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = transfers.tick(), if demo_transfers => {
                match devnet.submit_transfer(round) {
                    Ok(id) => tracing::debug!(round, tx = %id, "submitted demo transfer"),
                    Err(e) => tracing::warn!(round, error = %e, "demo transfer failed"),
                }
                round += 1;
            }
        }
    }

    tracing::info!("Shutting down devnet");
    devnet.shutdown();
    Ok(())
}

async fn run_standalone(config: &NodeConfig) -> anyhow::Result<()> {
    let genesis = config.load_genesis().context("failed to load genesis")?;
    let signer = config.signer().context("invalid private key")?;
    let validators = genesis.validator_set()?;
    let peer = match &signer {
        Some(key) => match validators.find(&key.public_key()) {
            Some(validator) => validator.name.clone(),
            None => bail!("private key {} is not a genesis validator", key.public_key()),
        },
        None => "observer".to_string(),
    };

    let network = MemoryNetwork::new();
    let node = Node::spawn(config, &genesis, signer, network.join(PeerId::new(peer)))?;

    tracing::info!("Node is ready. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!(height = node.status().height, "Shutting down node");
    node.shutdown();
    Ok(())
}

fn write_genesis(validators: usize, output: &Path) -> anyhow::Result<()> {
    let (genesis, keys) = generate_devnet_genesis(validators)?;
    save_genesis(&genesis, output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("wrote genesis for {} validators to {}", validators, output.display());
    for (validator, key) in genesis.validators.iter().zip(&keys) {
        println!("{}: {}", validator.name, key.secret_hex());
    }
    Ok(())
}

fn save_genesis(genesis: &Genesis, output: &Path) -> pbft_consensus::Result<()> {
    match output.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => genesis.save_yaml(output),
        _ => genesis.save_json(output),
    }
}
