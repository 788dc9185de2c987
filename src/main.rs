use clap::{Parser, Subcommand};
use std::path::PathBuf;

use headerforge::config::{display_hash, parse_display_hash, NodeConfig};
use headerforge::core::types::*;
use headerforge::{ChainId, Header, HeaderDb, HeaderOracle};

/// Headers handed to the oracle per commit during import
const IMPORT_BATCH: usize = 2000;

#[derive(Parser)]
#[command(name = "headerforge", version = "0.3.1")]
#[command(about = "HeaderForge - block header oracle")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// bitcoin, testnet3, regtest or unittest
    #[arg(long, global = true)]
    chain: Option<ChainId>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the header database and apply the default checkpoint
    Init,
    /// Show best chain, checkpoint and sibling count
    Info,
    /// Import raw headers from a file, one hex-encoded 80-byte header per line
    Import { file: PathBuf },
    /// Pin the block at `height` to `hash`
    AddCheckpoint {
        #[arg(long)]
        height: Height,
        #[arg(long)]
        hash: String,
    },
    /// Remove the active checkpoint
    DeleteCheckpoint,
    /// Print the best chain, newest last
    BestChain {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// List known sibling tips
    Siblings,
    /// Show the headers a reorg to `hash` would connect
    Reorg { hash: String },
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

fn load_config(cli: &Cli) -> NodeConfig {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path).unwrap_or_else(|e| fail(e)),
        None => NodeConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(chain) = cli.chain {
        config.chain = chain;
    }
    config
}

fn open_oracle(config: &NodeConfig) -> HeaderOracle {
    let path = config.chain_dir();
    std::fs::create_dir_all(&path).unwrap_or_else(|e| fail(format!("{}: {}", path.display(), e)));
    let db = HeaderDb::open(&path, config.chain).unwrap_or_else(|e| fail(e));
    let checkpoint = config.default_checkpoint().unwrap_or_else(|e| fail(e));
    let oracle = HeaderOracle::with_default_checkpoint(db, checkpoint);
    oracle.init().unwrap_or_else(|e| fail(e));
    oracle
}

fn parse_hash(text: &str) -> Hash256 {
    parse_display_hash(text).unwrap_or_else(|e| fail(e))
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    let oracle = open_oracle(&config);

    match cli.command {
        Commands::Init => {
            let best = oracle.best_chain().unwrap_or_else(|e| fail(e));
            println!("🔨 HeaderForge initialized!");
            println!("  Chain:   {}", oracle.chain());
            println!("  Data:    {}", config.chain_dir().display());
            println!("  Genesis: {}", display_hash(&oracle.genesis_hash()));
            println!("  Height:  {}", best.height);
        }

        Commands::Info => {
            let best = oracle.best_chain().unwrap_or_else(|e| fail(e));
            let checkpoint = oracle.checkpoint();
            println!("📊 HeaderForge ({})", oracle.chain());
            println!("  Height:     {}", best.height);
            println!("  Tip:        {}", display_hash(&best.hash));
            if let Ok(tip) = oracle.load_header(&best.hash) {
                println!("  Work:       {}", tip.work());
            }
            if checkpoint.is_blank() {
                println!("  Checkpoint: none");
            } else {
                println!("  Checkpoint: {} @ {}", display_hash(&checkpoint.hash), checkpoint.height);
            }
            println!("  Siblings:   {}", oracle.siblings().len());
        }

        Commands::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .unwrap_or_else(|e| fail(format!("{}: {}", file.display(), e)));
            let mut headers = Vec::new();
            for (n, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let bytes = hex::decode(line).unwrap_or_else(|e| fail(format!("line {}: {}", n + 1, e)));
                let header = Header::from_bytes(&bytes).unwrap_or_else(|e| fail(format!("line {}: {}", n + 1, e)));
                headers.push(header);
            }
            println!("📥 Importing {} headers from {}", headers.len(), file.display());
            let start = oracle.best_chain().unwrap_or_else(|e| fail(e));
            for batch in headers.chunks(IMPORT_BATCH) {
                oracle.add_headers(batch.to_vec()).unwrap_or_else(|e| fail(e));
            }
            let best = oracle.best_chain().unwrap_or_else(|e| fail(e));
            println!("  ✅ Height {} -> {} ({})", start.height, best.height, display_hash(&best.hash));
        }

        Commands::AddCheckpoint { height, hash } => {
            oracle.add_checkpoint(height, parse_hash(&hash)).unwrap_or_else(|e| fail(e));
            let best = oracle.best_chain().unwrap_or_else(|e| fail(e));
            println!("📌 Checkpoint set at height {}", height);
            println!("  Best: {} @ {}", display_hash(&best.hash), best.height);
        }

        Commands::DeleteCheckpoint => {
            oracle.delete_checkpoint().unwrap_or_else(|e| fail(e));
            let best = oracle.best_chain().unwrap_or_else(|e| fail(e));
            println!("Checkpoint removed");
            println!("  Best: {} @ {}", display_hash(&best.hash), best.height);
        }

        Commands::BestChain { limit } => {
            let best = oracle.best_chain().unwrap_or_else(|e| fail(e));
            let from = (best.height - limit as Height + 1).max(0);
            for height in from..=best.height {
                if let Some(hash) = oracle.best_hash(height) {
                    println!("{:>8} {}", height, display_hash(&hash));
                }
            }
        }

        Commands::Siblings => {
            let siblings = oracle.siblings();
            if siblings.is_empty() {
                println!("No sibling tips.");
            }
            for hash in siblings {
                match oracle.load_header(&hash) {
                    Ok(header) => println!(
                        "{:>8} {}{}",
                        header.height(),
                        display_hash(&hash),
                        if header.is_blacklisted() { " (banned)" } else { "" }
                    ),
                    Err(e) => eprintln!("⚠️  {}: {}", display_hash(&hash), e),
                }
            }
        }

        Commands::Reorg { hash } => {
            let hash = parse_hash(&hash);
            let header = oracle.load_header(&hash).unwrap_or_else(|e| fail(e));
            let path = oracle.calculate_reorg(&header.position()).unwrap_or_else(|e| fail(e));
            if path.is_empty() {
                println!("{} is already on the best chain", display_hash(&hash));
                return;
            }
            let (ancestor, best) = oracle.common_parent(&header.position()).unwrap_or_else(|e| fail(e));
            println!("🔄 Reorg from {} to {}", best.height, header.height());
            println!("  Fork: {} @ {}", display_hash(&ancestor.hash), ancestor.height);
            for position in path.iter().rev() {
                println!("{:>8} {}", position.height, display_hash(&position.hash));
            }
        }
    }
}
