//! Filesystem cache for op.gg history collection, scoped to one region.
//!
//! Layout under the cache folder:
//!   players/<name>.json   full profile snapshots
//!   games/<id>.json       one file per match
//!   players_meta.json     derived per-player index (which games, newest
//!                         game timestamp, rank value)
//!
//! The index is only ever a cache of a fold over the persisted games: when
//! the file is missing or unreadable it is rebuilt by scanning every game,
//! never trusted partially.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use opgg_client::{Game, PlayerSnapshot, TierInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

mod rank;
pub use rank::rank_value;

const PLAYERS_DIR: &str = "players";
const GAMES_DIR: &str = "games";
const META_FILE: &str = "players_meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerCacheMeta {
    /// When the remote service last refreshed this profile; absent until a
    /// snapshot has been captured.
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
    pub last_game_created_at: DateTime<Utc>,
    pub game_ids: HashSet<String>,
    /// Rank of the most recent cached game this player appears in (or of
    /// the snapshot when that is all we have).
    #[serde(default)]
    pub rank_value: i64,
}

impl Default for PlayerCacheMeta {
    fn default() -> Self {
        Self {
            last_updated_at: None,
            last_game_created_at: DateTime::UNIX_EPOCH,
            game_ids: HashSet::new(),
            rank_value: 0,
        }
    }
}

pub struct MatchCache {
    folder: PathBuf,
    cached_players: HashSet<String>,
    cached_games: HashSet<String>,
    players_meta: HashMap<String, PlayerCacheMeta>,
}

impl MatchCache {
    pub fn open(folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        debug!("Using cache folder: {}", folder.display());
        fs::create_dir_all(folder.join(PLAYERS_DIR))
            .with_context(|| format!("cannot create {}", folder.join(PLAYERS_DIR).display()))?;
        fs::create_dir_all(folder.join(GAMES_DIR))
            .with_context(|| format!("cannot create {}", folder.join(GAMES_DIR).display()))?;

        let mut cache = Self {
            folder,
            cached_players: HashSet::new(),
            cached_games: HashSet::new(),
            players_meta: HashMap::new(),
        };
        cache.read_folder()?;
        Ok(cache)
    }

    fn players_folder(&self) -> PathBuf {
        self.folder.join(PLAYERS_DIR)
    }

    fn games_folder(&self) -> PathBuf {
        self.folder.join(GAMES_DIR)
    }

    fn meta_file(&self) -> PathBuf {
        self.folder.join(META_FILE)
    }

    fn read_folder(&mut self) -> Result<()> {
        self.cached_players = list_json_stems(&self.players_folder())?;
        self.cached_games = list_json_stems(&self.games_folder())?;

        let loaded = fs::read_to_string(self.meta_file())
            .ok()
            .and_then(|raw| serde_json::from_str::<HashMap<String, PlayerCacheMeta>>(&raw).ok());
        match loaded {
            Some(meta) => self.players_meta = meta,
            // Missing or unreadable index means invalid, not empty.
            None => self.rebuild_players_meta()?,
        }
        Ok(())
    }

    fn rebuild_players_meta(&mut self) -> Result<()> {
        debug!(
            "Regenerating players meta index from {} cached games",
            self.cached_games.len()
        );
        let ids: Vec<String> = self.cached_games.iter().cloned().collect();
        let mut meta: HashMap<String, PlayerCacheMeta> = HashMap::new();
        for id in ids {
            match self.game(&id)? {
                Some(game) => {
                    for participant in &game.participants {
                        let entry = meta.entry(participant.summoner.name.clone()).or_default();
                        entry.game_ids.insert(id.clone());
                        if game.created_at > entry.last_game_created_at {
                            entry.last_game_created_at = game.created_at;
                            entry.rank_value = tier_rank_value(participant.tier_info.as_ref());
                        }
                    }
                }
                None => warn!("Failed finding cached game ID: '{id}'"),
            }
        }
        self.players_meta = meta;
        self.write_players_meta()
    }

    /// Per-player index entry; `None` for players never seen.
    pub fn player_meta(&self, user_name: &str) -> Option<&PlayerCacheMeta> {
        self.players_meta.get(user_name)
    }

    pub fn player_snapshot(&self, user_name: &str) -> Result<Option<PlayerSnapshot>> {
        if !self.cached_players.contains(user_name) {
            return Ok(None);
        }
        let path = self.players_folder().join(format!("{user_name}.json"));
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(error) => {
                warn!("Cached snapshot for '{user_name}' unreadable: {error}");
                Ok(None)
            }
        }
    }

    pub fn put_snapshot(&mut self, snapshot: &PlayerSnapshot) -> Result<()> {
        ensure!(
            snapshot.region.is_some(),
            "snapshot region must be stamped before caching"
        );
        let path = self.players_folder().join(format!("{}.json", snapshot.name));
        fs::write(&path, serde_json::to_string_pretty(snapshot)?)
            .with_context(|| format!("cannot write {}", path.display()))?;
        self.cached_players.insert(snapshot.name.clone());

        let entry = self.players_meta.entry(snapshot.name.clone()).or_default();
        entry.last_updated_at = Some(snapshot.updated_at);
        if let Some(newest) = snapshot.lp_histories.iter().max_by_key(|h| h.created_at) {
            entry.rank_value = tier_rank_value(Some(&newest.tier_info));
        }
        self.write_players_meta()
    }

    /// All cached games of a player, newest first; `None` for unknown
    /// players. Ids whose file went missing are skipped with a warning.
    pub fn games_for_player(&self, user_name: &str) -> Result<Option<Vec<Game>>> {
        let Some(meta) = self.players_meta.get(user_name) else {
            return Ok(None);
        };
        let mut games = Vec::with_capacity(meta.game_ids.len());
        for id in &meta.game_ids {
            match self.game(id)? {
                Some(game) => games.push(game),
                None => warn!("Failed finding cached game ID: '{id}' for user: '{user_name}'"),
            }
        }
        games.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Some(games))
    }

    pub fn game(&self, id: &str) -> Result<Option<Game>> {
        if !self.cached_games.contains(id) {
            return Ok(None);
        }
        let path = self.games_folder().join(format!("{id}.json"));
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(game) => Ok(Some(game)),
            Err(error) => {
                warn!("Cached game '{id}' unreadable: {error}");
                Ok(None)
            }
        }
    }

    pub fn put_game(&mut self, game: &Game) -> Result<()> {
        let path = self.games_folder().join(format!("{}.json", game.id));
        let serialized = serde_json::to_string_pretty(game)?;

        // Match records are supposed to be immutable once created remotely.
        if self.cached_games.contains(&game.id) {
            if let Ok(existing) = fs::read_to_string(&path) {
                if existing != serialized {
                    warn!(
                        "Cached game '{}' differs from re-fetched content, overwriting",
                        game.id
                    );
                }
            }
        }

        fs::write(&path, serialized).with_context(|| format!("cannot write {}", path.display()))?;
        self.cached_games.insert(game.id.clone());

        for participant in &game.participants {
            let entry = self
                .players_meta
                .entry(participant.summoner.name.clone())
                .or_default();
            entry.game_ids.insert(game.id.clone());
            if game.created_at > entry.last_game_created_at {
                entry.last_game_created_at = game.created_at;
                entry.rank_value = tier_rank_value(participant.tier_info.as_ref());
            }
        }
        self.write_players_meta()
    }

    /// Total number of cached games across all players.
    pub fn cached_game_count(&self) -> usize {
        self.cached_games.len()
    }

    fn write_players_meta(&self) -> Result<()> {
        let path = self.meta_file();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.players_meta)?)
            .with_context(|| format!("cannot write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("cannot swap {}", path.display()))?;
        Ok(())
    }
}

fn tier_rank_value(tier_info: Option<&TierInfo>) -> i64 {
    match tier_info {
        Some(info) => rank_value(
            info.tier.as_deref().unwrap_or("UNRANKED"),
            info.division.unwrap_or(4),
            info.lp.unwrap_or(0),
        ),
        None => 0,
    }
}

fn list_json_stems(dir: &Path) -> Result<HashSet<String>> {
    let mut stems = HashSet::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))?
    {
        let name = entry?.file_name();
        if let Some(stem) = name.to_string_lossy().strip_suffix(".json") {
            stems.insert(stem.to_string());
        }
    }
    Ok(stems)
}
