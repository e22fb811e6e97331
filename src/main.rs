use clap::{Parser, Subcommand};
use sqlchain::crypto::{KeyPair, Nonce};
use sqlchain::keystore;
use sqlchain::node::{ChainNode, ChainRouter};
use sqlchain::storage::Storage;
use sqlchain::types::Node;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sqlchain")]
#[command(about = "Permissioned SQL-chain node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chain node
    Start {
        /// DSN of the local SQL database
        #[arg(short, long, default_value = "file:chain.db")]
        dsn: String,

        /// Directory of the public-key store
        #[arg(short, long, default_value = "./keystore")]
        keystore: PathBuf,

        /// Seed for deterministic key generation (hex string, 32 bytes)
        #[arg(short, long)]
        seed: Option<String>,
    },

    /// Generate a keypair and its derived node ID
    Keygen {
        /// Optional seed (hex string, 32 bytes)
        #[arg(short, long)]
        seed: Option<String>,
    },
}

fn parse_seed(seed: &str) -> Result<[u8; 32], Box<dyn std::error::Error>> {
    let bytes = hex::decode(seed)?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| "seed must be exactly 32 bytes of hex")?;
    Ok(seed)
}

fn make_keypair(seed: Option<&str>) -> Result<KeyPair, Box<dyn std::error::Error>> {
    Ok(match seed {
        Some(seed) => KeyPair::from_seed(&parse_seed(seed)?),
        None => KeyPair::generate(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { seed } => {
            let keypair = make_keypair(seed.as_deref())?;
            let nonce = Nonce::default();
            println!("public key: {}", hex::encode(keypair.public_key_bytes()));
            println!("node id:    {}", keypair.node_id(&nonce));
        }

        Commands::Start {
            dsn,
            keystore: keystore_path,
            seed,
        } => {
            let keypair = make_keypair(seed.as_deref())?;
            let nonce = Nonce::default();
            let node_id = keypair.node_id(&nonce);
            info!("node id: {}", node_id);

            let local = Node::new(
                node_id.clone(),
                String::new(),
                Some(keypair.public_key_bytes()),
                nonce,
            );
            keystore::init_public_key_store(&keystore_path, Some(&local))?;

            let storage = Arc::new(Storage::new(&dsn)?);
            let router = ChainRouter::new();
            let transport = router.transport(node_id.clone());

            let node = ChainNode::new(node_id, keypair, storage, transport);
            info!("chain node ready, serving 2PC requests");
            node.serve().await;
        }
    }

    Ok(())
}
