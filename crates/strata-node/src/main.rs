//! Strata Node -- block gossip and catch-up.
//!
//! Usage:
//!   strata-node                          # Run with default config
//!   strata-node --config path.toml       # Run with custom config
//!   strata-node run --peer host:port     # Run with an extra special peer
//!   strata-node seed --count 100         # Fill the database with a test chain
//!   strata-node status                   # Show the stored tip

use strata_node::config::NodeConfig;
use strata_node::{expand_tilde, Node};

use clap::{Parser, Subcommand};
use std::sync::Arc;

use strata_blocks::fixtures::build_chain;
use strata_peers::PeerType;
use strata_storage::{BlockStore, SqliteStore};

#[derive(Parser)]
#[command(name = "strata-node", about = "Strata block gossip and catch-up node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.strata/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node (default)
    Run {
        /// Extra special peer, `host:port`; may be repeated
        #[arg(long)]
        peer: Vec<String>,
    },
    /// Fill the database with a generated chain
    Seed {
        #[arg(long, default_value_t = 100)]
        count: u32,
    },
    /// Show the stored tip as JSON
    Status,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata_node=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Run { peer }) => run_node(cfg, peer).await?,
        None => run_node(cfg, Vec::new()).await?,
        Some(Commands::Seed { count }) => {
            let store = SqliteStore::open(&expand_tilde(&cfg.node.database))?;
            let fixture = build_chain(cfg.network_id(), count)?;
            let mut stored = 0usize;
            for block in fixture.all_blocks() {
                if store.store_block(&block)? {
                    stored += 1;
                }
            }
            println!("Stored {stored} blocks; tip {:?}", store.fetch_database_height()?);
        }
        Some(Commands::Status) => {
            let store = SqliteStore::open(&expand_tilde(&cfg.node.database))?;
            let height = store.fetch_database_height()?;
            let key_mr = match height {
                Some(h) => match store.fetch_directory_block_by_height(h)? {
                    Some(block) => Some(block.key_mr()?.to_hex()),
                    None => None,
                },
                None => None,
            };
            let status = serde_json::json!({
                "name": cfg.node.name,
                "network": cfg.node.network,
                "height": height,
                "key_mr": key_mr,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

async fn run_node(cfg: NodeConfig, extra_peers: Vec<String>) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %cfg.node.name,
        network = %cfg.node.network,
        "starting strata node"
    );

    let db_path = expand_tilde(&cfg.node.database);
    let store: Arc<dyn BlockStore> = Arc::new(SqliteStore::open(&db_path)?);
    tracing::info!(path = %db_path.display(), height = ?store.fetch_database_height()?, "storage opened");

    let node = Node::start(&cfg, store).await?;
    for addr in &extra_peers {
        let hash = node.add_peer(addr, PeerType::SpecialCmdLine).await;
        tracing::info!(peer = %hash, "command-line peer added");
    }

    tracing::info!(listen = %node.listen_addr(), "all tasks spawned, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    node.shutdown().await;

    Ok(())
}
