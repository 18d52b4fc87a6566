//! Cosigner CLI
//!
//! Command-line interface for a threshold cosigner process:
//! - Split a fresh key into cosigner key files
//! - Run the signing service
//! - Inspect a key file

mod config;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use config::{validate_peers, PeerArg};
use cosigner_client::RemoteCosigner;
use cosigner_core::{
    deal_key_shares, Cosigner, CosignerKey, EphemeralPartStore, LocalCosigner,
    OrchestratorConfig, SigningOrchestrator, DEFAULT_PEER_TIMEOUT_MS, DEFAULT_STORE_CAPACITY,
};
use cosigner_rpc::{CosignerServer, CosignerServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Threshold cosigner node
#[derive(Parser)]
#[command(name = "cosigner")]
#[command(about = "m-of-n threshold cosigner for consensus votes")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, env = "COSIGNER_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a new key into one key file per cosigner
    CreateShares {
        /// Shares required to sign
        #[arg(short, long)]
        threshold: usize,

        /// Number of cosigners
        #[arg(short = 'n', long)]
        total: usize,

        /// Directory for the key files
        #[arg(short, long, default_value = "./data")]
        out_dir: PathBuf,
    },

    /// Run the cosigner service
    Start {
        /// Key file produced by create-shares
        #[arg(short, long, env = "COSIGNER_KEY_FILE")]
        key_file: PathBuf,

        /// Listen address
        #[arg(short, long, env = "COSIGNER_LISTEN", default_value = "tcp://0.0.0.0:2222")]
        listen: String,

        /// Peer cosigner as <id>@<url>; repeat for each peer
        #[arg(short, long = "peer")]
        peers: Vec<PeerArg>,

        /// Per-peer ephemeral part timeout in milliseconds
        #[arg(long, env = "COSIGNER_PEER_TIMEOUT_MS", default_value_t = DEFAULT_PEER_TIMEOUT_MS)]
        peer_timeout_ms: u64,

        /// Keep each peer branch open for its full timeout window
        #[arg(long, env = "COSIGNER_HOLD_FULL_WINDOW", default_value_t = true, action = ArgAction::Set)]
        hold_full_window: bool,

        /// Maximum number of HRS entries kept in the ephemeral part store
        #[arg(long, env = "COSIGNER_STORE_CAPACITY", default_value_t = DEFAULT_STORE_CAPACITY)]
        store_capacity: usize,
    },

    /// Show key file info
    Info {
        /// Key file to inspect
        #[arg(short, long, env = "COSIGNER_KEY_FILE")]
        key_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::CreateShares {
            threshold,
            total,
            ref out_dir,
        } => create_shares(threshold, total, out_dir),
        Commands::Start {
            ref key_file,
            ref listen,
            ref peers,
            peer_timeout_ms,
            hold_full_window,
            store_capacity,
        } => {
            let config = OrchestratorConfig {
                peer_timeout: Duration::from_millis(peer_timeout_ms),
                hold_full_window,
            };
            run_start(key_file, listen, peers, config, store_capacity).await
        }
        Commands::Info { ref key_file } => show_info(key_file),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn create_shares(threshold: usize, total: usize, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)?;

    let keys = deal_key_shares(threshold, total)?;
    for key in &keys {
        let path = out_dir.join(format!("cosigner_{}.json", key.id));
        let json = serde_json::to_string_pretty(key)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(id = key.id, path = ?path, "Key file written");
    }

    println!(
        "Group Public Key: {}",
        hex::encode(&keys[0].group_public_key)
    );
    Ok(())
}

async fn run_start(
    key_file: &Path,
    listen: &str,
    peers: &[PeerArg],
    config: OrchestratorConfig,
    store_capacity: usize,
) -> Result<()> {
    let key = CosignerKey::load(key_file)
        .with_context(|| format!("loading key file {}", key_file.display()))?;
    let missing = validate_peers(&key, peers)?;
    if !missing.is_empty() {
        warn!(?missing, "No address configured for some cluster members");
    }

    info!(
        id = key.id,
        threshold = key.threshold,
        total = key.total,
        peers = peers.len(),
        peer_timeout_ms = config.peer_timeout.as_millis() as u64,
        hold_full_window = config.hold_full_window,
        store_capacity,
        "Starting cosigner"
    );

    let store = Arc::new(EphemeralPartStore::with_capacity(store_capacity));
    let local: Arc<dyn Cosigner> = Arc::new(LocalCosigner::new(key, store)?);
    let remotes: Vec<Arc<dyn Cosigner>> = peers
        .iter()
        .map(|peer| {
            Arc::new(RemoteCosigner::new(peer.id, &peer.url).with_timeout(config.peer_timeout))
                as Arc<dyn Cosigner>
        })
        .collect();

    let orchestrator = Arc::new(SigningOrchestrator::new(local, remotes, config));
    let server = CosignerServer::new(CosignerServerConfig {
        listen_address: listen.to_string(),
        orchestrator,
    })
    .start()
    .await?;

    info!(address = %server.local_addr(), "Cosigner ready");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    server.shutdown().await;
    Ok(())
}

fn show_info(key_file: &Path) -> Result<()> {
    let key = CosignerKey::load(key_file)?;

    println!("Cosigner Key Info:");
    println!("  ID: {}", key.id);
    println!("  Threshold: {}", key.threshold);
    println!("  Total: {}", key.total);
    println!("  Group Public Key: {}", hex::encode(&key.group_public_key));
    for member in &key.cluster {
        println!(
            "  Member {}: verify={} encrypt={}",
            member.id,
            hex::encode(member.verify_key),
            hex::encode(member.encryption_key)
        );
    }

    Ok(())
}
