//! op.gg remote client — the three endpoint shapes behind history collection
//!
//! Endpoints (internal bypass API, discovered from the website itself):
//!   Summoner page:  https://www.op.gg/summoners/<region>/<name>
//!                   (HTML with the full bootstrap JSON embedded in the
//!                   __NEXT_DATA__ script block)
//!   Renewal:        POST https://op.gg/api/v1.0/internal/bypass/summoners/<region>/<id>/renewal
//!   Renewal status: GET  .../summoners/<region>/<id>/renewal-status
//!   Games:          GET  .../games/<region>/summoners/<id>?ended_at=&limit=20&hl=en_US&game_type=
//!
//! The games endpoint pages backwards in time: `ended_at` is the oldest
//! `created_at` seen so far and the response meta carries the next cursor.
//! No retries here: transient failures surface to the caller as
//! `ClientError::Transport`, format drift as `ClientError::Parse`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Page size the games endpoint is queried with.
pub const PAGE_SIZE: usize = 20;

const SUMMONER_BASE: &str = "https://www.op.gg/summoners/";
const BYPASS_API_BASE: &str = "https://op.gg/api/v1.0/internal/bypass";

const DATA_BEGIN_TAG: &str = r#"<script id="__NEXT_DATA__" type="application/json">"#;
const DATA_END_TAG: &str = "</script>";

// User-Agent must look like a modern browser, otherwise op.gg serves a
// different build of the page without the embedded data block.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/106.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT_SECS: u64 = 20;

// ====================================================================
// Regions
// ====================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Eune,
    Euw,
    Na,
    Lan,
    Oce,
    Ru,
    Jp,
    Br,
    Tr,
    Las,
    Kr,
}

impl Region {
    pub const ALL: [Region; 11] = [
        Region::Eune,
        Region::Euw,
        Region::Na,
        Region::Lan,
        Region::Oce,
        Region::Ru,
        Region::Jp,
        Region::Br,
        Region::Tr,
        Region::Las,
        Region::Kr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Eune => "eune",
            Region::Euw => "euw",
            Region::Na => "na",
            Region::Lan => "lan",
            Region::Oce => "oce",
            Region::Ru => "ru",
            Region::Jp => "jp",
            Region::Br => "br",
            Region::Tr => "tr",
            Region::Las => "las",
            Region::Kr => "kr",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown region '{0}', supported: eune euw na lan oce ru jp br tr las kr")]
pub struct UnknownRegion(String);

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Region::ALL
            .into_iter()
            .find(|region| region.as_str() == lower)
            .ok_or_else(|| UnknownRegion(s.to_string()))
    }
}

// ====================================================================
// Remote payload types
// ====================================================================
//
// Only the fields the collector actually reads are named; everything else
// the service sends rides along in the flattened `extra` map so cached
// records keep the full remote content.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierInfo {
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub division: Option<u8>,
    #[serde(default)]
    pub lp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummonerRef {
    pub summoner_id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub summoner: SummonerRef,
    /// Rank the participant held when the game was played.
    #[serde(default)]
    pub tier_info: Option<TierInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_remake: bool,
    pub participants: Vec<Participant>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the profile's rank history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpHistory {
    pub created_at: DateTime<Utc>,
    pub tier_info: TierInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Full profile pull as embedded in the summoner page.
///
/// `region` is not part of the remote payload; the collector stamps it
/// before the snapshot is cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub summoner_id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub lp_histories: Vec<LpHistory>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamesPage {
    pub data: Vec<Game>,
    #[serde(default)]
    pub meta: GamesMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GamesMeta {
    #[serde(default)]
    pub first_game_created_at: Option<DateTime<Utc>>,
    /// Oldest game of the page, doubles as the next page cursor.
    #[serde(default)]
    pub last_game_created_at: Option<DateTime<Utc>>,
}

/// Everything the summoner page bootstrap gives us in one request.
#[derive(Debug, Clone)]
pub struct SummonerBundle {
    pub snapshot: PlayerSnapshot,
    pub first_page: GamesPage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenewalStatus {
    #[serde(default)]
    pub finish: bool,
    /// Milliseconds the service asks us to wait before checking again.
    #[serde(default)]
    pub delay: u64,
    /// Set once the profile cannot be renewed again before this time;
    /// effectively "renewal done".
    #[serde(default)]
    pub renewable_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

// Bypass API wraps every JSON response in { "data": ... }.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

// __NEXT_DATA__ shape: props.pageProps carries the summoner profile and
// the embedded first games page. Decoding only these two subtrees drops
// the champion/rune/item catalogs that ride along in pageProps.
#[derive(Debug, Deserialize)]
struct NextData {
    props: NextProps,
}

#[derive(Debug, Deserialize)]
struct NextProps {
    #[serde(rename = "pageProps")]
    page_props: PageProps,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    data: PlayerSnapshot,
    games: GamesPage,
}

// ====================================================================
// Errors
// ====================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    SummonerPage,
    Renewal,
    RenewalStatus,
    GamesPage,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteOp::SummonerPage => "summoner page",
            RemoteOp::Renewal => "renewal request",
            RemoteOp::RenewalStatus => "renewal status",
            RemoteOp::GamesPage => "games page",
        })
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{op} request failed for {region}/'{account}': {source}")]
    Transport {
        op: RemoteOp,
        region: Region,
        account: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{op} payload unreadable for {region}/'{account}': {message}")]
    Parse {
        op: RemoteOp,
        region: Region,
        account: String,
        message: String,
    },
}

impl ClientError {
    fn transport(op: RemoteOp, region: Region, account: &str, source: reqwest::Error) -> Self {
        ClientError::Transport {
            op,
            region,
            account: account.to_string(),
            source,
        }
    }

    fn parse(op: RemoteOp, region: Region, account: &str, message: impl Into<String>) -> Self {
        ClientError::Parse {
            op,
            region,
            account: account.to_string(),
            message: message.into(),
        }
    }
}

// ====================================================================
// Remote source seam
// ====================================================================

/// The four logical operations the collector needs from the remote
/// service. `OpggClient` is the HTTP implementation; tests drive the
/// collector through synthetic implementations.
#[async_trait]
pub trait RemoteSource {
    async fn fetch_summoner_bundle(
        &self,
        region: Region,
        user_name: &str,
    ) -> Result<SummonerBundle, ClientError>;

    async fn request_renewal(
        &self,
        region: Region,
        summoner_id: &str,
    ) -> Result<RenewalStatus, ClientError>;

    async fn fetch_renewal_status(
        &self,
        region: Region,
        summoner_id: &str,
    ) -> Result<RenewalStatus, ClientError>;

    async fn fetch_games(
        &self,
        region: Region,
        summoner_id: &str,
        ended_at: Option<DateTime<Utc>>,
        game_type: &str,
        limit: usize,
    ) -> Result<GamesPage, ClientError>;
}

// ====================================================================
// HTTP client
// ====================================================================

pub struct OpggClient {
    client: reqwest::Client,
}

impl OpggClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(BROWSER_USER_AGENT)
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for OpggClient {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_embedded_json(html: &str) -> Option<&str> {
    let begin = html.find(DATA_BEGIN_TAG)? + DATA_BEGIN_TAG.len();
    let end = begin + html[begin..].find(DATA_END_TAG)?;
    Some(&html[begin..end])
}

fn parse_summoner_page(
    html: &str,
    region: Region,
    user_name: &str,
) -> Result<SummonerBundle, ClientError> {
    let raw = extract_embedded_json(html).ok_or_else(|| {
        ClientError::parse(
            RemoteOp::SummonerPage,
            region,
            user_name,
            "embedded data block not found, website changed again?",
        )
    })?;
    let next: NextData = serde_json::from_str(raw)
        .map_err(|e| ClientError::parse(RemoteOp::SummonerPage, region, user_name, e.to_string()))?;
    Ok(SummonerBundle {
        snapshot: next.props.page_props.data,
        first_page: next.props.page_props.games,
    })
}

#[async_trait]
impl RemoteSource for OpggClient {
    async fn fetch_summoner_bundle(
        &self,
        region: Region,
        user_name: &str,
    ) -> Result<SummonerBundle, ClientError> {
        let mut url = Url::parse(SUMMONER_BASE).unwrap();
        url.path_segments_mut()
            .unwrap()
            .push(region.as_str())
            .push(user_name);
        debug!("GET {url}");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::transport(RemoteOp::SummonerPage, region, user_name, e))?;
        let html = resp
            .text()
            .await
            .map_err(|e| ClientError::transport(RemoteOp::SummonerPage, region, user_name, e))?;

        parse_summoner_page(&html, region, user_name)
    }

    async fn request_renewal(
        &self,
        region: Region,
        summoner_id: &str,
    ) -> Result<RenewalStatus, ClientError> {
        let url = format!("{BYPASS_API_BASE}/summoners/{region}/{summoner_id}/renewal");
        debug!("POST {url}");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::transport(RemoteOp::Renewal, region, summoner_id, e))?;
        let body: Envelope<RenewalStatus> = resp
            .json()
            .await
            .map_err(|e| ClientError::parse(RemoteOp::Renewal, region, summoner_id, e.to_string()))?;
        Ok(body.data)
    }

    async fn fetch_renewal_status(
        &self,
        region: Region,
        summoner_id: &str,
    ) -> Result<RenewalStatus, ClientError> {
        let url = format!("{BYPASS_API_BASE}/summoners/{region}/{summoner_id}/renewal-status");
        debug!("GET {url}");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::transport(RemoteOp::RenewalStatus, region, summoner_id, e))?;
        let body: Envelope<RenewalStatus> = resp.json().await.map_err(|e| {
            ClientError::parse(RemoteOp::RenewalStatus, region, summoner_id, e.to_string())
        })?;
        Ok(body.data)
    }

    async fn fetch_games(
        &self,
        region: Region,
        summoner_id: &str,
        ended_at: Option<DateTime<Utc>>,
        game_type: &str,
        limit: usize,
    ) -> Result<GamesPage, ClientError> {
        let url = format!("{BYPASS_API_BASE}/games/{region}/summoners/{summoner_id}");
        let mut req = self.client.get(&url).query(&[
            ("limit", limit.to_string()),
            ("hl", "en_US".to_string()),
            ("game_type", game_type.to_string()),
        ]);
        if let Some(cursor) = ended_at {
            req = req.query(&[("ended_at", cursor.to_rfc3339())]);
        }
        debug!("GET {url} (cursor: {ended_at:?})");

        let resp = req
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::transport(RemoteOp::GamesPage, region, summoner_id, e))?;
        resp.json()
            .await
            .map_err(|e| ClientError::parse(RemoteOp::GamesPage, region, summoner_id, e.to_string()))
    }
}
