//! Thin Google Calendar client over a refreshing session.
//!
//! Only what a daily note needs: the primary calendar's events in a time
//! range, expanded into single instances and ordered by start time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::session::TokenSession;

/// Google Calendar API v3 base URL.
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Title used for events without a summary.
pub const UNTITLED_EVENT: &str = "(No title)";

/// A specialized Result type for calendar queries.
pub type CalendarResult<T> = Result<T, CalendarError>;

/// Errors from calendar queries.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// No usable access token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The request never produced a response.
    #[error("calendar request failed: {0}")]
    Network(String),

    /// The API answered with a non-success status.
    #[error("calendar API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("invalid calendar response: {0}")]
    InvalidResponse(String),

    /// The requested day has no representable local start.
    #[error("invalid date range: {0}")]
    InvalidRange(String),
}

/// Start or end of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// A timed boundary.
    DateTime(DateTime<Utc>),
    /// An all-day boundary.
    Date(NaiveDate),
}

/// A calendar event as shown in a daily note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: EventTime,
    pub end: EventTime,
    pub location: Option<String>,
    pub description: Option<String>,
    pub is_all_day: bool,
}

/// Calendar queries authenticated through a [`TokenSession`].
#[derive(Debug)]
pub struct CalendarClient {
    session: Arc<TokenSession>,
    http_client: reqwest::Client,
    base_url: String,
}

impl CalendarClient {
    /// Creates a client for the public API.
    pub fn new(session: Arc<TokenSession>, timeout: Duration) -> CalendarResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CalendarError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            session,
            http_client,
            base_url: CALENDAR_API_BASE.to_string(),
        })
    }

    /// Points the client at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Events of the primary calendar overlapping `[start, end)`.
    pub async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CalendarResult<Vec<CalendarEvent>> {
        let url = format!("{}/calendars/primary/events", self.base_url);
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", start.to_rfc3339()),
                ("timeMax", end.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let body = self.get(&url, &query).await?;
            let page: EventListResponse = serde_json::from_str(&body)
                .map_err(|e| CalendarError::InvalidResponse(e.to_string()))?;

            events.extend(page.items.into_iter().filter_map(convert_event));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = events.len(), "fetched events");
        Ok(events)
    }

    /// Events of the primary calendar on a local calendar day.
    pub async fn events_on(&self, date: NaiveDate) -> CalendarResult<Vec<CalendarEvent>> {
        let next = date
            .succ_opt()
            .ok_or_else(|| CalendarError::InvalidRange(format!("no day after {date}")))?;
        self.events_between(local_midnight(date)?, local_midnight(next)?)
            .await
    }

    /// Checks that the linked account can reach the API.
    pub async fn test_connection(&self) -> CalendarResult<usize> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let body = self.get(&url, &[]).await?;
        let list: CalendarListResponse = serde_json::from_str(&body)
            .map_err(|e| CalendarError::InvalidResponse(e.to_string()))?;
        Ok(list.items.len())
    }

    /// GET with bearer auth, retrying once with a forced refresh on 401.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> CalendarResult<String> {
        let token = self.session.access_token().await?;
        let response = self.send(url, query, &token).await?;

        let response = if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            debug!("access token rejected, refreshing");
            let token = self.session.force_refresh().await?;
            self.send(url, query, &token).await?
        } else {
            response
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CalendarError::Network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(CalendarError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> CalendarResult<reqwest::Response> {
        self.http_client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))
    }
}

fn local_midnight(date: NaiveDate) -> CalendarResult<DateTime<Utc>> {
    date.and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| CalendarError::InvalidRange(format!("{date} has no local midnight")))
}

fn convert_event(event: ApiEvent) -> Option<CalendarEvent> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }

    let id = event.id?;
    let start = parse_time(&event.start)
        .or_else(|| {
            warn!(%id, "event has no usable start");
            None
        })?;
    let end = parse_time(&event.end).unwrap_or(start);

    Some(CalendarEvent {
        title: event
            .summary
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        is_all_day: matches!(start, EventTime::Date(_)),
        id,
        start,
        end,
        location: event.location,
        description: event.description,
    })
}

fn parse_time(time: &ApiEventTime) -> Option<EventTime> {
    if let Some(dt) = &time.date_time {
        return DateTime::parse_from_rfc3339(dt)
            .ok()
            .map(|t| EventTime::DateTime(t.with_timezone(&Utc)));
    }
    time.date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(EventTime::Date)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    status: Option<String>,
    #[serde(default)]
    start: ApiEventTime,
    #[serde(default)]
    end: ApiEventTime,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}
