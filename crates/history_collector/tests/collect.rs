//! Collector flow against a synthetic remote source: every test counts the
//! requests actually issued, since the whole point of the cache fence and
//! the short-circuit path is the requests that do not happen.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use history_collector::{collect_history, CollectOptions, RefreshPolicy};
use match_cache::MatchCache;
use opgg_client::{
    ClientError, Game, GamesMeta, GamesPage, Participant, PlayerSnapshot, Region, RemoteOp,
    RemoteSource, RenewalStatus, SummonerBundle, SummonerRef, TierInfo,
};
use serde_json::Map;

const PLAYER: &str = "Azzapp";

fn at_minute(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 10, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

fn game(id: &str, minute: i64) -> Game {
    Game {
        id: id.to_string(),
        created_at: at_minute(minute),
        is_remake: false,
        participants: vec![Participant {
            summoner: SummonerRef {
                summoner_id: "sid-1".to_string(),
                name: PLAYER.to_string(),
                extra: Map::new(),
            },
            tier_info: Some(TierInfo {
                tier: Some("GOLD".to_string()),
                division: Some(2),
                lp: Some(50),
            }),
            extra: Map::new(),
        }],
        extra: Map::new(),
    }
}

fn page(games: Vec<Game>) -> GamesPage {
    GamesPage {
        meta: GamesMeta {
            first_game_created_at: games.first().map(|g| g.created_at),
            last_game_created_at: games.last().map(|g| g.created_at),
        },
        data: games,
    }
}

fn bundle(first_page: GamesPage) -> SummonerBundle {
    SummonerBundle {
        snapshot: PlayerSnapshot {
            summoner_id: "sid-1".to_string(),
            name: PLAYER.to_string(),
            updated_at: at_minute(0),
            region: None,
            lp_histories: vec![],
            extra: Map::new(),
        },
        first_page,
    }
}

fn ids(games: &[Game]) -> Vec<String> {
    games.iter().map(|g| g.id.clone()).collect()
}

struct FakeSource {
    bundle: SummonerBundle,
    pages: Mutex<VecDeque<GamesPage>>,
    renewal: Option<RenewalStatus>,
    statuses: Mutex<VecDeque<RenewalStatus>>,
    bundle_calls: AtomicUsize,
    games_calls: AtomicUsize,
    renewal_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FakeSource {
    fn new(bundle: SummonerBundle) -> Self {
        Self {
            bundle,
            pages: Mutex::new(VecDeque::new()),
            renewal: None,
            statuses: Mutex::new(VecDeque::new()),
            bundle_calls: AtomicUsize::new(0),
            games_calls: AtomicUsize::new(0),
            renewal_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    fn with_pages(self, pages: Vec<GamesPage>) -> Self {
        *self.pages.lock().unwrap() = pages.into();
        self
    }

    fn with_renewal(mut self, status: RenewalStatus) -> Self {
        self.renewal = Some(status);
        self
    }

    fn with_statuses(self, statuses: Vec<RenewalStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    async fn fetch_summoner_bundle(
        &self,
        _region: Region,
        _user_name: &str,
    ) -> Result<SummonerBundle, ClientError> {
        self.bundle_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bundle.clone())
    }

    async fn request_renewal(
        &self,
        region: Region,
        summoner_id: &str,
    ) -> Result<RenewalStatus, ClientError> {
        self.renewal_calls.fetch_add(1, Ordering::SeqCst);
        match &self.renewal {
            Some(status) => Ok(status.clone()),
            None => Err(ClientError::Parse {
                op: RemoteOp::Renewal,
                region,
                account: summoner_id.to_string(),
                message: "synthetic renewal outage".to_string(),
            }),
        }
    }

    async fn fetch_renewal_status(
        &self,
        _region: Region,
        _summoner_id: &str,
    ) -> Result<RenewalStatus, ClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RenewalStatus {
                finish: true,
                ..RenewalStatus::default()
            }))
    }

    async fn fetch_games(
        &self,
        _region: Region,
        _summoner_id: &str,
        _ended_at: Option<DateTime<Utc>>,
        _game_type: &str,
        _limit: usize,
    ) -> Result<GamesPage, ClientError> {
        self.games_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| page(vec![])))
    }
}

#[tokio::test]
async fn short_first_page_needs_no_extra_fetches() {
    let first: Vec<Game> = (0..3).map(|i| game(&format!("g{i}"), 90 - i * 10)).collect();
    let source = FakeSource::new(bundle(page(first)));

    let games = collect_history(&source, None, Region::Euw, PLAYER, &CollectOptions::default())
        .await
        .unwrap();

    assert_eq!(ids(&games), vec!["g0", "g1", "g2"]);
    assert_eq!(source.bundle_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.games_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.renewal_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn since_and_max_count_filter_the_result() {
    // Records at minutes 0, 10, ..., 90, newest first as the remote sends them.
    let all: Vec<Game> = (0..10).map(|i| game(&format!("g{i}"), 90 - i * 10)).collect();
    let source = FakeSource::new(bundle(page(all)));

    let capped = collect_history(
        &source,
        None,
        Region::Euw,
        PLAYER,
        &CollectOptions {
            max_count: Some(3),
            ..CollectOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(
        capped.iter().map(|g| g.created_at).collect::<Vec<_>>(),
        vec![at_minute(90), at_minute(80), at_minute(70)]
    );

    let since = collect_history(
        &source,
        None,
        Region::Euw,
        PLAYER,
        &CollectOptions {
            since: Some(at_minute(50)),
            ..CollectOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(since.len(), 5);
    assert!(since.iter().all(|g| g.created_at >= at_minute(50)));

    let both = collect_history(
        &source,
        None,
        Region::Euw,
        PLAYER,
        &CollectOptions {
            since: Some(at_minute(50)),
            max_count: Some(2),
            ..CollectOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(
        both.iter().map(|g| g.created_at).collect::<Vec<_>>(),
        vec![at_minute(90), at_minute(80)]
    );
}

#[tokio::test]
async fn second_run_is_idempotent_and_offline() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = MatchCache::open(dir.path()).unwrap();
    let first_page: Vec<Game> = (0..3).map(|i| game(&format!("g{i}"), 90 - i * 10)).collect();
    let source = FakeSource::new(bundle(page(first_page)));

    let first = collect_history(
        &source,
        Some(&mut cache),
        Region::Euw,
        PLAYER,
        &CollectOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(source.bundle_calls.load(Ordering::SeqCst), 1);

    let second = collect_history(
        &source,
        Some(&mut cache),
        Region::Euw,
        PLAYER,
        &CollectOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(ids(&first), ids(&second));
    // The snapshot is cached and the policy never renews: not one request.
    assert_eq!(source.bundle_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.games_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.renewal_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_threshold_decides_between_cache_and_network() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = MatchCache::open(dir.path()).unwrap();
    let source = FakeSource::new(bundle(page(vec![game("g0", 90)])));

    collect_history(
        &source,
        Some(&mut cache),
        Region::Euw,
        PLAYER,
        &CollectOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(source.bundle_calls.load(Ordering::SeqCst), 1);

    // Snapshot updated_at is minute 0. A threshold before that means the
    // data is fresh enough; a later threshold forces a new bootstrap.
    collect_history(
        &source,
        Some(&mut cache),
        Region::Euw,
        PLAYER,
        &CollectOptions {
            refresh: RefreshPolicy::IfOlderThan(at_minute(-10)),
            ..CollectOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(source.bundle_calls.load(Ordering::SeqCst), 1);

    collect_history(
        &source,
        Some(&mut cache),
        Region::Euw,
        PLAYER,
        &CollectOptions {
            refresh: RefreshPolicy::IfOlderThan(at_minute(5)),
            ..CollectOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(source.bundle_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pagination_stops_at_the_cache_fence() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = MatchCache::open(dir.path()).unwrap();
    // Newest cached game at minute 50 is the fence.
    cache.put_game(&game("cached-50", 50)).unwrap();

    let p1: Vec<Game> = (0..20).map(|i| game(&format!("f{i}"), 100 - i)).collect();
    let p2: Vec<Game> = (20..40).map(|i| game(&format!("f{i}"), 100 - i)).collect();
    let p3: Vec<Game> = (40..60).map(|i| game(&format!("f{i}"), 100 - i)).collect();
    let source = FakeSource::new(bundle(page(p1))).with_pages(vec![page(p2), page(p3)]);

    let games = collect_history(
        &source,
        Some(&mut cache),
        Region::Euw,
        PLAYER,
        &CollectOptions::default(),
    )
    .await
    .unwrap();

    // The third page reaches minute 50, so no fourth request is made.
    assert_eq!(source.games_calls.load(Ordering::SeqCst), 2);
    assert_eq!(games.len(), 61);
    assert!(games.iter().any(|g| g.id == "cached-50"));
    assert_eq!(cache.cached_game_count(), 61);
}

#[tokio::test]
async fn renewal_failure_degrades_to_stale_collection() {
    let source = FakeSource::new(bundle(page(vec![game("g0", 10)])));

    let games = collect_history(
        &source,
        None,
        Region::Euw,
        PLAYER,
        &CollectOptions {
            refresh: RefreshPolicy::Always,
            ..CollectOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(ids(&games), vec!["g0"]);
    assert_eq!(source.renewal_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.status_calls.load(Ordering::SeqCst), 0);
    // Renewal never completed, so the embedded first page was kept.
    assert_eq!(source.games_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn completed_renewal_refetches_the_first_page() {
    let fresh = vec![game("fresh-0", 95), game("fresh-1", 94)];
    let source = FakeSource::new(bundle(page(vec![game("stale-0", 90)])))
        .with_renewal(RenewalStatus {
            finish: false,
            delay: 1,
            ..RenewalStatus::default()
        })
        .with_statuses(vec![RenewalStatus {
            finish: true,
            ..RenewalStatus::default()
        }])
        .with_pages(vec![page(fresh)]);

    let games = collect_history(
        &source,
        None,
        Region::Euw,
        PLAYER,
        &CollectOptions {
            refresh: RefreshPolicy::Always,
            ..CollectOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(ids(&games), vec!["fresh-0", "fresh-1"]);
    assert_eq!(source.status_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.games_calls.load(Ordering::SeqCst), 1);
}
