//! Google Calendar integration
//!
//! Reads upcoming events through the Calendar v3 REST API. Access tokens are
//! minted from an authorized-user token file (client id, client secret and
//! refresh token) and cached until shortly before they expire.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::check_status;
use crate::tools::{ToolCallResult, ToolDeclaration, ToolHandler, ToolRegistry};
use crate::{Error, Result};

const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Start or end of a calendar event as returned by the API
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    /// RFC 3339 timestamp for timed events
    pub date_time: Option<String>,

    /// `YYYY-MM-DD` for all-day events
    pub date: Option<String>,
}

impl EventTime {
    /// Display form: timed values as `YYYY-MM-DD HH:MM`, dates unchanged
    #[must_use]
    pub fn display(&self) -> String {
        if let Some(raw) = &self.date_time {
            return DateTime::parse_from_rfc3339(raw)
                .map_or_else(|_| raw.clone(), |dt| dt.format("%Y-%m-%d %H:%M").to_string());
        }
        self.date.clone().unwrap_or_default()
    }

    /// Instant used to order events; all-day events start at midnight UTC
    fn sort_key(&self) -> Option<DateTime<Utc>> {
        if let Some(raw) = &self.date_time {
            return DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        self.date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }
}

/// Raw event from `events.list`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub start: EventTime,
    #[serde(default)]
    pub end: EventTime,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

/// Source of calendar events
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// List single events starting between `from` and `to`
    async fn list_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>>;
}

/// Authorized-user token file
#[derive(Debug, Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

const fn default_expiry() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Google Calendar v3 client
pub struct GoogleCalendar {
    client: Client,
    token_path: PathBuf,
    calendar_id: String,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleCalendar {
    /// Create a client for `calendar_id` using the token file at `token_path`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(token_path: PathBuf, calendar_id: String) -> Result<Self> {
        if !token_path.exists() {
            tracing::warn!(
                path = %token_path.display(),
                "calendar token file not found, calendar calls will fail until it exists"
            );
        }

        let client = Client::builder().timeout(Duration::from_secs(20)).build()?;
        Ok(Self {
            client,
            token_path,
            calendar_id,
            token: Mutex::new(None),
        })
    }

    /// Return a valid access token, refreshing if needed
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let raw = tokio::fs::read_to_string(&self.token_path).await.map_err(|e| {
            Error::Integration(format!(
                "cannot read calendar token file {}: {e}",
                self.token_path.display()
            ))
        })?;
        let user: AuthorizedUser = serde_json::from_str(&raw)?;

        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = check_status("Google OAuth", response).await?.json().await?;

        tracing::debug!(expires_in = token.expires_in, "refreshed calendar access token");

        // Refresh a minute early
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl CalendarSource for GoogleCalendar {
    async fn list_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>> {
        let token = self.access_token().await?;
        let url = format!("{CALENDAR_API}/calendars/{}/events", self.calendar_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("timeMin", from.to_rfc3339()),
                ("timeMax", to.to_rfc3339()),
                ("maxResults", max_results.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await?;

        let list: EventList = check_status("Google Calendar", response).await?.json().await?;
        Ok(list.items)
    }
}

/// `get_calendar_events` tool
pub struct CalendarEventsTool {
    source: Arc<dyn CalendarSource>,
}

impl CalendarEventsTool {
    #[must_use]
    pub fn new(source: Arc<dyn CalendarSource>) -> Self {
        Self { source }
    }

    #[must_use]
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "get_calendar_events",
            "Gets upcoming events from the user's Google Calendar",
            json!({
                "type": "object",
                "properties": {
                    "days": {
                        "type": "integer",
                        "description": "Number of days to look ahead (default: 7)"
                    },
                    "max_events": {
                        "type": "integer",
                        "description": "Maximum number of events to return (default: 5)"
                    }
                },
                "required": []
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for CalendarEventsTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let days = args.get("days").and_then(Value::as_i64).unwrap_or(7).max(0);
        let max_events = args
            .get("max_events")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(5);

        let now = Utc::now();
        let until = TimeDelta::try_days(days)
            .and_then(|span| now.checked_add_signed(span))
            .ok_or_else(|| Error::Tool("days out of range".to_string()))?;

        let mut events = self.source.list_events(now, until, max_events).await?;
        if events.is_empty() {
            return Ok(ToolCallResult::success(
                json!({ "events": [] }),
                "No upcoming events found.",
            ));
        }

        events.sort_by_key(|e| e.start.sort_key());
        let formatted: Vec<Value> = events.iter().map(format_event).collect();
        let count = formatted.len();

        Ok(ToolCallResult::success(
            json!({ "events": formatted }),
            format!("Found {count} upcoming events."),
        ))
    }
}

fn format_event(event: &CalendarEvent) -> Value {
    json!({
        "id": event.id,
        "summary": event.summary.as_deref().unwrap_or("No title"),
        "start": event.start.display(),
        "end": event.end.display(),
        "location": event.location.as_deref().unwrap_or("No location specified"),
    })
}

/// Register the calendar tool
///
/// # Errors
///
/// Returns error if the registry rejects the name
pub fn register(registry: &mut ToolRegistry, source: Arc<dyn CalendarSource>) -> Result<()> {
    registry.register(
        CalendarEventsTool::declaration(),
        Arc::new(CalendarEventsTool::new(source)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(raw: &str) -> EventTime {
        EventTime {
            date_time: Some(raw.to_string()),
            date: None,
        }
    }

    fn all_day(raw: &str) -> EventTime {
        EventTime {
            date_time: None,
            date: Some(raw.to_string()),
        }
    }

    #[test]
    fn timed_values_keep_their_offset() {
        assert_eq!(timed("2025-03-04T09:30:00+02:00").display(), "2025-03-04 09:30");
        assert_eq!(timed("2025-03-04T09:30:00Z").display(), "2025-03-04 09:30");
    }

    #[test]
    fn all_day_values_stay_dates() {
        assert_eq!(all_day("2025-03-04").display(), "2025-03-04");
    }

    #[test]
    fn all_day_sorts_before_same_day_meeting() {
        assert!(all_day("2025-03-04").sort_key() < timed("2025-03-04T09:00:00Z").sort_key());
    }

    #[test]
    fn missing_fields_get_placeholders() {
        let event = CalendarEvent {
            id: "e1".to_string(),
            start: all_day("2025-03-04"),
            end: all_day("2025-03-05"),
            ..CalendarEvent::default()
        };
        let value = format_event(&event);
        assert_eq!(value["summary"], "No title");
        assert_eq!(value["location"], "No location specified");
    }

    #[test]
    fn parses_api_items() {
        let body = json!({
            "items": [{
                "id": "abc",
                "summary": "Standup",
                "start": { "dateTime": "2025-03-04T09:00:00Z" },
                "end": { "dateTime": "2025-03-04T09:15:00Z" }
            }]
        });
        let list: EventList = serde_json::from_value(body).unwrap();
        assert_eq!(list.items[0].start.display(), "2025-03-04 09:00");
        assert!(list.items[0].location.is_none());
    }
}
