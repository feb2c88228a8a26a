//! Calendar sync engine.
//!
//! Each cycle reconciles the next few minutes of the calendar against the
//! durable alarm registry: fetch a bounded window of upcoming events, create
//! or refresh an alarm for every event with a joinable URL and a future
//! lead-adjusted fire time, then prune every alarm in our namespace that the
//! current cycle no longer wants. Alarm keys derive deterministically from
//! event ids, so repeated cycles over an unchanged calendar converge to the
//! same registry, and overlapping cycles can't do worse than re-write the
//! same rows.
//!
//! Failure discipline: any auth or fetch failure aborts the cycle before the
//! prune step can touch the registry with stale data. Partial writes from an
//! aborted cycle self-heal on the next one.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::extract;
use crate::google::calendar::Event;
use crate::google::ApiError;
use crate::store::{DbError, SyncDb};

/// Namespace marker for this system's alarms. The registry is shared, so
/// pruning must only ever look at keys carrying this prefix.
pub const ALARM_PREFIX: &str = "meeting::";

/// Extra lookahead so no event can slip between two sync cycles.
const LOOKAHEAD_BUFFER_MINUTES: i64 = 5;

/// The alarm key for a calendar event. Deterministic, so every cycle that
/// sees the same event converges on the same registration.
pub fn alarm_key(event_id: &str) -> String {
    format!("{ALARM_PREFIX}{event_id}")
}

/// Supplies bearer tokens for the Calendar API.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self, interactive: bool) -> Result<String, ApiError>;
    /// Drop a cached access token that the API rejected.
    async fn invalidate(&self, access_token: &str);
}

/// Supplies the upcoming-events window.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<Event>, ApiError>;
}

#[derive(Debug, thiserror::Error)]
enum SyncError {
    #[error("auth: {0}")]
    Auth(#[source] ApiError),

    #[error("fetch: {0}")]
    Fetch(#[source] ApiError),

    #[error("store: {0}")]
    Store(#[from] DbError),
}

pub struct Reconciler {
    db: SyncDb,
    tokens: Arc<dyn TokenProvider>,
    events: Arc<dyn EventSource>,
}

impl Reconciler {
    pub fn new(db: SyncDb, tokens: Arc<dyn TokenProvider>, events: Arc<dyn EventSource>) -> Self {
        Self { db, tokens, events }
    }

    /// Run one reconciliation cycle. Never propagates: failures are logged
    /// and the next periodic cycle is the retry.
    pub async fn run_cycle(&mut self, config: &Config, now: DateTime<Utc>) {
        match self.sync_cycle(config, now).await {
            Ok(scheduled) => {
                log::debug!("Sync complete: {} upcoming meeting alarm(s)", scheduled)
            }
            Err(SyncError::Auth(e)) => log::warn!("Sync skipped, auth unavailable: {}", e),
            Err(e) => log::warn!("Sync failed: {}", e),
        }
    }

    async fn sync_cycle(&mut self, config: &Config, now: DateTime<Utc>) -> Result<usize, SyncError> {
        let mut token = self.tokens.acquire(false).await.map_err(SyncError::Auth)?;

        let lead_minutes = config.lead_time_minutes() as i64;
        // Look ahead far enough to cover the sync interval + lead time + buffer.
        let lookahead =
            config.sync_interval_minutes as i64 + lead_minutes + LOOKAHEAD_BUFFER_MINUTES;
        let time_max = now + Duration::minutes(lookahead);

        let events = match self.events.fetch(&token, now, time_max).await {
            Ok(events) => events,
            Err(ApiError::AuthExpired) => {
                // Token went stale under us; invalidate and retry exactly once.
                self.tokens.invalidate(&token).await;
                token = self.tokens.acquire(false).await.map_err(SyncError::Auth)?;
                self.events
                    .fetch(&token, now, time_max)
                    .await
                    .map_err(SyncError::Fetch)?
            }
            Err(e) => return Err(SyncError::Fetch(e)),
        };

        // Keys scheduled this cycle, so stale alarms can be pruned afterward.
        let mut kept: HashSet<String> = HashSet::new();

        for event in &events {
            let Some(url) = extract::meeting_url(event) else {
                continue;
            };

            let fire_at = event.start - Duration::minutes(lead_minutes);
            // Don't schedule alarms in the past.
            if fire_at <= now {
                continue;
            }

            let key = alarm_key(&event.id);
            self.db.register_alarm(&key, fire_at.timestamp())?;
            self.db.set_meeting_url(&key, &url)?;
            kept.insert(key);
        }

        // Prune alarms for events that were cancelled, moved out of the
        // window, or already fired. Gated on this cycle's successful fetch
        // and compared against this cycle's kept set only.
        for key in self.db.list_alarms()? {
            if key.starts_with(ALARM_PREFIX) && !kept.contains(&key) {
                self.db.cancel_alarm(&key)?;
                self.db.remove_meeting_url(&key)?;
            }
        }

        Ok(kept.len())
    }
}
