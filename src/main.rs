//! vindex: in-memory nearest-neighbor index daemon
//!
//! `vindex serve` runs the daemon; the other commands drive a running daemon
//! over the framed RPC protocol.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use vindex::{
    client::DaemonClient,
    config::Config,
    daemon::Daemon,
    types::VectorBatch,
};

#[derive(Parser)]
#[command(name = "vindex")]
#[command(about = "In-memory vector index with background rebuilds")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "vindex.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Serve {
        /// RPC listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Enable the HTTP API on this address
        #[arg(long)]
        http: Option<String>,
    },

    /// Search with random query vectors
    Search {
        /// Number of query vectors
        #[arg(short, long, default_value = "1")]
        queries: usize,

        /// Neighbors per query
        #[arg(short, default_value = "10")]
        k: usize,

        /// Daemon RPC address (default: rpc.listen_addr)
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Queue random vectors for the next index update
    Add {
        /// Number of vectors
        #[arg(short = 'n', long, default_value = "100")]
        count: usize,

        /// Daemon RPC address (default: rpc.listen_addr)
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Start an index update
    Trigger {
        /// Daemon RPC address (default: rpc.listen_addr)
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Show index statistics
    Stats {
        /// Daemon RPC address (default: rpc.listen_addr)
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load or create config
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    config.logging.init(cli.verbose)?;

    match cli.command {
        Commands::Serve { listen, http } => serve(config, listen, http).await,
        Commands::Search { queries, k, addr } => {
            search(&resolve_addr(&config, addr), queries, k).await
        }
        Commands::Add { count, addr } => add(&resolve_addr(&config, addr), count).await,
        Commands::Trigger { addr } => trigger(&resolve_addr(&config, addr)).await,
        Commands::Stats { addr } => show_stats(&resolve_addr(&config, addr)).await,
        Commands::Init { path, force } => init_config(config, path, force),
    }
}

fn resolve_addr(config: &Config, addr: Option<String>) -> String {
    addr.unwrap_or_else(|| config.rpc.listen_addr.clone())
}

async fn serve(mut config: Config, listen: Option<String>, http: Option<String>) -> Result<()> {
    if let Some(addr) = listen {
        config.rpc.listen_addr = addr;
    }
    if let Some(addr) = http {
        config.http.enabled = true;
        config.http.listen_addr = addr;
    }

    let daemon = Daemon::start(config).await?;
    info!("RPC address: {}", daemon.rpc_addr());
    if let Some(addr) = daemon.http_addr() {
        info!("HTTP address: http://{}", addr);
    }
    daemon.run().await
}

/// Random vectors matching the daemon's dimension
async fn random_vectors(client: &DaemonClient, count: usize) -> Result<Vec<Vec<f32>>> {
    let stats = client.stats().await?;
    Ok(VectorBatch::random(stats.index.dimensions, count, rand::random()).to_rows())
}

async fn search(addr: &str, queries: usize, k: usize) -> Result<()> {
    let client = DaemonClient::connect(addr).await?;
    let vectors = random_vectors(&client, queries).await?;

    let start = Instant::now();
    let results = client.search(vectors, k).await?;
    let elapsed = start.elapsed();

    println!("Searched {} queries (k={}) in {:.2?}", results.len(), k, elapsed);
    for (i, row) in results.into_rows().into_iter().enumerate() {
        println!("\n[{}]", i);
        for (index, distance) in row.indices.iter().zip(&row.distances) {
            println!("  {:>10}  {:.4}", index, distance);
        }
    }
    Ok(())
}

async fn add(addr: &str, count: usize) -> Result<()> {
    let client = DaemonClient::connect(addr).await?;
    let vectors = random_vectors(&client, count).await?;
    let status = client.add_vectors(vectors).await?;
    println!("{}", status.message);
    Ok(())
}

async fn trigger(addr: &str) -> Result<()> {
    let client = DaemonClient::connect(addr).await?;
    let status = client.trigger_update().await?;
    println!("{}", status.message);
    Ok(())
}

async fn show_stats(addr: &str) -> Result<()> {
    let client = DaemonClient::connect(addr).await?;
    let stats = client.stats().await?;
    let index = &stats.index;

    println!("\nvindex Statistics:");
    println!("==================");
    println!("State: {:?}", index.state);
    println!("Generation: {}", index.generation);
    println!("Indexed vectors: {}", index.indexed_vectors);
    println!("Pending vectors: {}", index.pending_vectors);
    println!("Dimensions: {}", index.dimensions);
    println!("Builder: {}", index.builder);
    if let Some(ms) = index.last_rebuild_ms {
        println!("Last rebuild: {} ms", ms);
    }
    println!(
        "Rebuilds: {} succeeded, {} failed, {} coalesced",
        index.rebuilds_succeeded, index.rebuilds_failed, index.rebuilds_coalesced
    );
    println!("Uptime: {} s", stats.uptime_seconds);
    Ok(())
}

fn init_config(config: Config, path: PathBuf, force: bool) -> Result<()> {
    let config_path = path.join("vindex.toml");
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let content = format!("# vindex configuration\n\n{}", config.to_toml()?);
    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Created configuration at {}", config_path.display());
    Ok(())
}
