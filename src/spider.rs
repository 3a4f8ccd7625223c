//! Account crawler: collects history for a start account, then keeps
//! picking the highest-priority account seen in any cached game until it
//! runs out. State survives restarts via spider_state.json.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use history_collector::{collect_history, CollectOptions, RefreshPolicy};
use match_cache::MatchCache;
use opgg_client::{OpggClient, Region};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const STATE_FILE: &str = "spider_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Lowest rank first
    Low,
    /// Highest rank first
    High,
    /// Rank closest to the start account first
    Close,
    /// Most recently active first
    Active,
    /// Longest inactive first
    Inactive,
    /// Most cached games participated in first
    Connected,
    Random,
}

#[derive(Args, Debug)]
pub struct SpiderArgs {
    /// Region to crawl (omit with --continue)
    region: Option<Region>,
    /// Starting account; only EUW has a default
    account: Option<String>,
    /// Ordering used to pick the next account
    #[arg(long, value_enum, default_value_t = Order::Random)]
    order: Order,
    /// Continue from the saved spider state instead of starting fresh
    #[arg(long)]
    r#continue: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SpiderState {
    region: Region,
    start_account: String,
    start_account_rank_value: i64,
    start_timestamp: DateTime<Utc>,
    accounts_priorities: HashMap<String, f64>,
    accounts_visited: HashSet<String>,
    games_count: usize,
    order: Order,
}

pub async fn run(args: SpiderArgs) -> Result<()> {
    // Two spiders would race the cache metadata, so single instance only.
    let lock_path = std::env::temp_dir().join("opgg_harvester_spider.lock");
    let lock_file = File::create(&lock_path)
        .with_context(|| format!("cannot create lock file {}", lock_path.display()))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Another spider instance is already running, exiting.");
            return Ok(());
        }
    };

    let mut state = if args.r#continue {
        match load_state() {
            Some(state) => {
                info!("Continuing spider run, region {}", state.region);
                state
            }
            None => bail!("cannot continue, spider state not found or corrupted"),
        }
    } else {
        let Some(region) = args.region else {
            bail!("region is required unless --continue is given");
        };
        let account = match args.account {
            Some(account) => account,
            None => default_start_account(region)
                .context("no default start account for this region, please specify one")?
                .to_string(),
        };
        SpiderState {
            region,
            start_account: account,
            start_account_rank_value: 0,
            // Accounts refreshed within the last 10 minutes are fresh enough.
            start_timestamp: Utc::now() - chrono::Duration::minutes(10),
            accounts_priorities: HashMap::new(),
            accounts_visited: HashSet::new(),
            games_count: 0,
            order: args.order,
        }
    };

    let client = OpggClient::new();
    let mut cache = MatchCache::open(crate::cache_folder(state.region))?;

    let mut current = state.start_account.clone();
    loop {
        info!(
            "Accounts visited: {} (of {} met) | Total games: {} | Next account: '{current}'",
            state.accounts_visited.len(),
            state.accounts_priorities.len(),
            state.games_count
        );

        let options = CollectOptions {
            refresh: RefreshPolicy::IfOlderThan(state.start_timestamp),
            ..CollectOptions::default()
        };
        let games = match collect_history(
            &client,
            Some(&mut cache),
            state.region,
            &current,
            &options,
        )
        .await
        {
            Ok(games) => games,
            Err(error) => {
                warn!("Collection failed for '{current}', skipping the account: {error:#}");
                Vec::new()
            }
        };
        state.accounts_visited.insert(current.clone());
        state.games_count = cache.cached_game_count();

        if current == state.start_account {
            if let Some(meta) = cache.player_meta(&current) {
                state.start_account_rank_value = meta.rank_value;
            }
        }

        for game in &games {
            for participant in &game.participants {
                let name = participant.summoner.name.clone();
                let priority =
                    priority_for(&cache, &name, state.order, state.start_account_rank_value);
                state.accounts_priorities.insert(name, priority);
            }
        }

        save_state(&state)?;

        // Highest priority unvisited account goes next.
        let next = state
            .accounts_priorities
            .iter()
            .filter(|(name, _)| !state.accounts_visited.contains(*name))
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, _)| name.clone());
        match next {
            Some(name) => current = name,
            None => {
                info!("No unvisited accounts left, spider done.");
                break;
            }
        }
    }
    Ok(())
}

/// Higher value means picked sooner. Accounts without cache meta yet sort
/// neutrally.
fn priority_for(cache: &MatchCache, account: &str, order: Order, start_rank_value: i64) -> f64 {
    let meta = cache.player_meta(account);
    match order {
        Order::Low => -(meta.map_or(0, |m| m.rank_value) as f64),
        Order::High => meta.map_or(0, |m| m.rank_value) as f64,
        Order::Close => -((meta.map_or(0, |m| m.rank_value) - start_rank_value).abs() as f64),
        Order::Active => meta.map_or(0.0, |m| m.last_game_created_at.timestamp() as f64),
        Order::Inactive => -meta.map_or(0.0, |m| m.last_game_created_at.timestamp() as f64),
        Order::Connected => meta.map_or(0.0, |m| m.game_ids.len() as f64),
        Order::Random => rand::random::<f64>(),
    }
}

fn default_start_account(region: Region) -> Option<&'static str> {
    match region {
        Region::Euw => Some("Azzapp"),
        _ => None,
    }
}

fn save_state(state: &SpiderState) -> Result<()> {
    fs::write(STATE_FILE, serde_json::to_string_pretty(state)?).context("cannot write spider state")
}

fn load_state() -> Option<SpiderState> {
    let raw = fs::read_to_string(STATE_FILE).ok()?;
    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(error) => {
            warn!("Spider state unreadable: {error}");
            None
        }
    }
}
