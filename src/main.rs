//! opgg-harvester — match-history collection from the op.gg service
//!
//! Subcommands:
//!   history <region> <account>   one-shot collection for a single account
//!   spider  <region> [account]   crawl outward from a starting account
//!
//! Verbosity via RUST_LOG (e.g. RUST_LOG=debug), cache root via
//! OPGG_CACHE_DIR (default ./cache/<region>).

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use history_collector::{collect_history, CollectOptions, RefreshPolicy};
use match_cache::MatchCache;
use opgg_client::{OpggClient, Region};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod spider;

#[derive(Parser, Debug)]
#[command(
    name = "opgg-harvester",
    version,
    about = "Collects ranked match-history data from the op.gg service"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect match history for one account
    History(HistoryArgs),
    /// Crawl between accounts, collecting as it goes
    Spider(spider::SpiderArgs),
}

#[derive(Args, Debug)]
struct HistoryArgs {
    /// Region the account is registered on
    region: Region,
    /// Account display name
    account: String,
    /// Request a profile renewal first, unless newer than the given number
    /// of minutes
    #[arg(
        short = 'u',
        long,
        value_name = "MAX_MINUTES",
        num_args = 0..=1,
        default_missing_value = "10"
    )]
    update: Option<i64>,
    /// Only collect matches created at or after this timestamp (RFC3339)
    #[arg(short = 'a', long, value_name = "TIMESTAMP")]
    after: Option<DateTime<Utc>>,
    /// Limit the number of collected matches
    #[arg(short = 'n', long, value_name = "NUMBER")]
    max_count: Option<usize>,
    /// Queue filter passed to the remote service
    #[arg(long, default_value = "soloranked")]
    game_type: String,
    /// Skip the local cache entirely
    #[arg(long)]
    no_cache: bool,
    /// File the collected games are written to as JSON
    #[arg(short, long, default_value = "games.json")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::History(args) => run_history(args).await,
        Command::Spider(args) => spider::run(args).await,
    }
}

pub(crate) fn cache_folder(region: Region) -> PathBuf {
    match std::env::var("OPGG_CACHE_DIR") {
        Ok(base) if !base.trim().is_empty() => PathBuf::from(base).join(region.as_str()),
        _ => PathBuf::from("cache").join(region.as_str()),
    }
}

async fn run_history(args: HistoryArgs) -> Result<()> {
    let client = OpggClient::new();
    let mut cache = if args.no_cache {
        None
    } else {
        Some(MatchCache::open(cache_folder(args.region))?)
    };

    let options = CollectOptions {
        refresh: match args.update {
            Some(minutes) => {
                RefreshPolicy::IfOlderThan(Utc::now() - chrono::Duration::minutes(minutes))
            }
            None => RefreshPolicy::Never,
        },
        game_type: args.game_type.clone(),
        since: args.after,
        max_count: args.max_count,
    };

    let games = collect_history(
        &client,
        cache.as_mut(),
        args.region,
        &args.account,
        &options,
    )
    .await?;
    info!("Collected {} games for '{}'", games.len(), args.account);

    std::fs::write(&args.out, serde_json::to_string_pretty(&games)?)
        .with_context(|| format!("cannot write {}", args.out.display()))?;
    info!("Wrote {}", args.out.display());
    Ok(())
}
