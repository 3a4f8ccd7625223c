//! Profile renewal: ask the service to recompute an account's stats and
//! poll the asynchronous job to completion, sleeping however long the
//! server asks between attempts. A failed renewal never aborts collection;
//! the caller just proceeds with whatever data is already there.

use chrono::{DateTime, Utc};
use opgg_client::{ClientError, Region, RemoteSource};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    Never,
    Always,
    /// Renew only when the profile was last updated at or before the given
    /// time.
    IfOlderThan(DateTime<Utc>),
}

impl RefreshPolicy {
    pub fn wants_renewal(&self, last_known_update: Option<DateTime<Utc>>) -> bool {
        match self {
            RefreshPolicy::Never => false,
            RefreshPolicy::Always => true,
            RefreshPolicy::IfOlderThan(threshold) => match last_known_update {
                Some(updated_at) => *threshold >= updated_at,
                None => true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    Skipped,
    Completed,
    Failed,
}

pub async fn run_renewal(
    source: &impl RemoteSource,
    region: Region,
    summoner_id: &str,
    policy: RefreshPolicy,
    last_known_update: Option<DateTime<Utc>>,
) -> RenewalOutcome {
    if !policy.wants_renewal(last_known_update) {
        if let Some(updated_at) = last_known_update {
            debug!("Data is fresh enough, no renewal necessary (updated at {updated_at})");
        }
        return RenewalOutcome::Skipped;
    }

    let mut request_sent = false;
    let result: Result<(), ClientError> = async {
        debug!("Requesting renewal and waiting as requested");
        let status = source.request_renewal(region, summoner_id).await?;
        request_sent = true;
        if status.finish {
            return Ok(());
        }
        sleep(Duration::from_millis(status.delay)).await;

        debug!("Polling renewal status until finished");
        loop {
            let status = source.fetch_renewal_status(region, summoner_id).await?;
            // renewable_at means the service refuses to renew again before
            // that time, which is as finished as this job gets.
            if status.finish || status.renewable_at.is_some() {
                if let Some(last) = status.last_updated_at {
                    debug!("Renewal finished, last update at {last}");
                }
                return Ok(());
            }
            sleep(Duration::from_millis(status.delay)).await;
        }
    }
    .await;

    match result {
        Ok(()) => RenewalOutcome::Completed,
        Err(error) => {
            if request_sent {
                warn!("Renewal failed after the request was sent, proceeding with stale data: {error}");
            } else {
                warn!("Renewal could not be requested, proceeding with stale data: {error}");
            }
            RenewalOutcome::Failed
        }
    }
}
