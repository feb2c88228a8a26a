//! Google Calendar API v3 — event fetching.
//!
//! Fetches the upcoming-events window the reconciler asks for, ordered by
//! start time with recurring instances expanded. The response is trimmed
//! server-side to the fields the scheduler cares about.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::ApiError;
use crate::reconcile::EventSource;

const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";

/// Bounded result count. The window spans only a few minutes of lookahead,
/// so this is not meant to be exhaustive for dense calendars.
const MAX_RESULTS: &str = "10";

const FIELDS: &str = "items(id,summary,start,hangoutLink,location,conferenceData)";

// ============================================================================
// API response types (deserialized from Google Calendar JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<GoogleEventRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<EventDateTime>,
    #[serde(default)]
    hangout_link: Option<String>,
    #[serde(default)]
    location: Option<String>,
    conference_data: Option<ConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

/// A single way to join a conference (video link, phone number, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    pub entry_point_type: Option<String>,
    pub uri: Option<String>,
}

// ============================================================================
// Public types
// ============================================================================

/// A normalized upcoming event.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub hangout_link: Option<String>,
    pub location: Option<String>,
    pub entry_points: Vec<EntryPoint>,
}

// ============================================================================
// Calendar API
// ============================================================================

/// Fetch events between `time_min` and `time_max` from the primary calendar.
///
/// Returns [`ApiError::AuthExpired`] on HTTP 401 so the caller can refresh
/// the token and retry.
pub async fn fetch_events(
    client: &reqwest::Client,
    access_token: &str,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
) -> Result<Vec<Event>, ApiError> {
    let resp = client
        .get(EVENTS_URL)
        .bearer_auth(access_token)
        .query(&[
            ("timeMin", time_min.to_rfc3339().as_str()),
            ("timeMax", time_max.to_rfc3339().as_str()),
            ("singleEvents", "true"),
            ("orderBy", "startTime"),
            ("maxResults", MAX_RESULTS),
            ("fields", FIELDS),
        ])
        .send()
        .await?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ApiError::AuthExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let body: EventListResponse = resp.json().await?;
    Ok(normalize(body.items))
}

/// Normalize raw items, dropping any without a usable start time.
fn normalize(items: Vec<GoogleEventRaw>) -> Vec<Event> {
    let mut events = Vec::with_capacity(items.len());

    for item in items {
        let start_str = item
            .start
            .as_ref()
            .and_then(|s| s.date_time.as_deref().or(s.date.as_deref()))
            .unwrap_or("");

        let Some(start) = parse_event_datetime(start_str) else {
            log::debug!("Skipping event {} with unusable start time", item.id);
            continue;
        };

        events.push(Event {
            id: item.id,
            summary: item.summary.unwrap_or_else(|| "(No title)".to_string()),
            start,
            hangout_link: item.hangout_link,
            location: item.location,
            entry_points: item
                .conference_data
                .map(|c| c.entry_points)
                .unwrap_or_default(),
        });
    }

    events
}

/// Parse an ISO datetime string to a chrono DateTime<Utc>.
pub fn parse_event_datetime(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if s.contains('T') {
        // Full datetime
        DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
            .or_else(|_| DateTime::parse_from_rfc3339(s))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    } else {
        // Date-only (all-day event) — treat as midnight UTC
        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
    }
}

// ============================================================================
// EventSource backed by the live API
// ============================================================================

/// Production [`EventSource`] over the Calendar v3 HTTP API.
pub struct GoogleCalendarApi {
    client: reqwest::Client,
}

impl GoogleCalendarApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GoogleCalendarApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventSource for GoogleCalendarApi {
    async fn fetch(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<Event>, ApiError> {
        fetch_events(&self.client, access_token, time_min, time_max).await
    }
}
