mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemo::bench::{BenchConfig, Distribution};
use mnemo::config::MnemoConfig;
use mnemo::memory::types::MemoryType;

#[derive(Parser)]
#[command(
    name = "mnemo",
    version,
    about = "Persistent agent memory with exact and approximate vector retrieval"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or maintain the vector index
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Search stored memories
    Recall {
        query: String,
        /// Only return memories of this type
        #[arg(long = "type")]
        memory_type: Option<MemoryType>,
        /// Only return memories in this tier
        #[arg(long)]
        tier: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Benchmark the approximate index against the exact scan
    Bench {
        #[arg(long, default_value_t = 1_000)]
        size: usize,
        #[arg(long, default_value_t = 384)]
        dimension: usize,
        /// uniform, clustered or near_duplicate
        #[arg(long, default_value = "uniform")]
        distribution: Distribution,
        #[arg(long, default_value_t = 100)]
        queries: usize,
        #[arg(short, default_value_t = 10)]
        k: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 10)]
        rebuild_runs: usize,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Show stats of the active index
    Stats,
    /// Fold pending writes into the approximate collection
    Rebuild,
    /// Replay stored vectors into the approximate collection
    Backfill,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MnemoConfig::load()?;

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Index { action } => match action {
            IndexAction::Stats => cli::index::stats(&config)?,
            IndexAction::Rebuild => cli::index::rebuild(&config)?,
            IndexAction::Backfill => cli::index::backfill_ann(&config)?,
        },
        Command::Recall {
            query,
            memory_type,
            tier,
            limit,
        } => {
            cli::recall::recall(config, &query, memory_type, tier, limit).await?;
        }
        Command::Bench {
            size,
            dimension,
            distribution,
            queries,
            k,
            seed,
            rebuild_runs,
        } => {
            let bench = BenchConfig {
                size,
                dimension,
                distribution,
                queries,
                k,
                seed,
                rebuild_runs,
                ann: config.index.ann_config(),
                ..BenchConfig::default()
            };
            tokio::task::spawn_blocking(move || cli::bench::bench(&bench)).await??;
        }
    }

    Ok(())
}
