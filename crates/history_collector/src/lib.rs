//! Incremental match-history collection.
//!
//! One `collect_history` call walks the remote pagination cursor backwards
//! in time, persisting every fetched game, and stops as soon as it reaches
//! history the cache already holds (the "cache fence"). Re-running for an
//! account whose snapshot is fresh enough touches no network at all.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use match_cache::MatchCache;
use opgg_client::{Game, Region, RemoteSource, PAGE_SIZE};
use tracing::debug;

mod renewal;
pub use renewal::{run_renewal, RefreshPolicy, RenewalOutcome};

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub refresh: RefreshPolicy,
    /// Queue filter passed to the games endpoint ("soloranked", "total", ...).
    pub game_type: String,
    /// Only keep games created at or after this time.
    pub since: Option<DateTime<Utc>>,
    pub max_count: Option<usize>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            refresh: RefreshPolicy::Never,
            game_type: "soloranked".to_string(),
            since: None,
            max_count: None,
        }
    }
}

/// Collect the match history of one account, newest first, deduplicated
/// by game id.
///
/// Games and the account snapshot are persisted through `cache` as they
/// arrive, so a pagination failure later in the run leaves everything
/// fetched so far durable. Renewal failures degrade to "collect with stale
/// data"; bootstrap and pagination failures abort the call.
pub async fn collect_history(
    source: &impl RemoteSource,
    mut cache: Option<&mut MatchCache>,
    region: Region,
    user_name: &str,
    options: &CollectOptions,
) -> Result<Vec<Game>> {
    debug!("Beginning to collect history for account '{user_name}', region {region}");

    // Cached state before anything is written: the short-circuit decision
    // and the fence both have to see the pre-run cache.
    let (cached_last_updated, cache_fence) = match cache.as_deref() {
        Some(cache) => match cache.player_meta(user_name) {
            Some(meta) => (meta.last_updated_at, meta.last_game_created_at),
            None => (None, DateTime::UNIX_EPOCH),
        },
        None => (None, DateTime::UNIX_EPOCH),
    };

    // A snapshot we already hold is good enough whenever the policy would
    // not renew it anyway: serve straight from the cache, zero requests.
    if let Some(cache) = cache.as_deref() {
        if cached_last_updated.is_some() && !options.refresh.wants_renewal(cached_last_updated) {
            debug!("Cached data is fresh enough for '{user_name}', skipping remote entirely");
            let games = cache.games_for_player(user_name)?.unwrap_or_default();
            return Ok(finalize(games, options));
        }
    }

    debug!("First request to get summoner id, update timestamp, account stats and latest games");
    let bundle = source.fetch_summoner_bundle(region, user_name).await?;
    let mut snapshot = bundle.snapshot;
    let summoner_id = snapshot.summoner_id.clone();

    if let Some(cache) = cache.as_deref_mut() {
        snapshot.region = Some(region);
        cache.put_snapshot(&snapshot)?;
    }

    let outcome = run_renewal(
        source,
        region,
        &summoner_id,
        options.refresh,
        Some(snapshot.updated_at),
    )
    .await;

    // The bootstrap page already embeds the newest games page, but a
    // completed renewal makes it stale, so refetch in that case.
    let mut page = if outcome == RenewalOutcome::Completed {
        debug!("Requesting first games via API after renewal");
        source
            .fetch_games(region, &summoner_id, None, &options.game_type, PAGE_SIZE)
            .await?
    } else {
        debug!("First games taken from the initial website load");
        bundle.first_page
    };

    let mut games: Vec<Game> = Vec::new();
    loop {
        let fetched = page.data.len();
        let mut reached_fence = false;
        for game in page.data {
            if game.created_at <= cache_fence {
                reached_fence = true;
            }
            if let Some(cache) = cache.as_deref_mut() {
                cache.put_game(&game)?;
            }
            games.push(game);
        }
        debug!("Games count: {}", games.len());

        if reached_fence {
            // Everything older is already cached.
            debug!("Reached cached history (fence {cache_fence}), stopping pagination");
            break;
        }
        if options.max_count.is_some_and(|max| games.len() >= max) {
            break;
        }
        if fetched < PAGE_SIZE {
            // Short page, no more remote data.
            break;
        }
        let Some(cursor) = page.meta.last_game_created_at else {
            break;
        };
        if options.since.is_some_and(|since| cursor <= since) {
            // Oldest game of this page already precedes the cutoff.
            break;
        }

        debug!("Requesting next games via API (cursor {cursor})");
        page = source
            .fetch_games(
                region,
                &summoner_id,
                Some(cursor),
                &options.game_type,
                PAGE_SIZE,
            )
            .await?;
    }

    if let Some(cache) = cache.as_deref() {
        if let Some(cached) = cache.games_for_player(user_name)? {
            games = merge_preferring_cached(games, cached);
        }
    }

    let games = finalize(games, options);
    debug!(
        "Done collecting history for '{user_name}'. Games collected total: {}",
        games.len()
    );
    Ok(games)
}

/// Merge by id; already-persisted records are authoritative over the
/// in-memory copy from this run.
fn merge_preferring_cached(fetched: Vec<Game>, cached: Vec<Game>) -> Vec<Game> {
    let mut by_id: HashMap<String, Game> = fetched
        .into_iter()
        .map(|game| (game.id.clone(), game))
        .collect();
    for game in cached {
        by_id.insert(game.id.clone(), game);
    }
    by_id.into_values().collect()
}

/// Newest first, dedup by id, `since` cutoff before `max_count` truncation.
fn finalize(games: Vec<Game>, options: &CollectOptions) -> Vec<Game> {
    let mut seen = HashSet::new();
    let mut games: Vec<Game> = games
        .into_iter()
        .filter(|game| seen.insert(game.id.clone()))
        .collect();
    games.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if let Some(since) = options.since {
        games.retain(|game| game.created_at >= since);
    }
    if let Some(max) = options.max_count {
        games.truncate(max);
    }
    games
}
