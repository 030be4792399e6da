use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Arguments accepted by `add_calendar_event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewEvent {
    pub summary: String,
    #[serde(alias = "start")]
    pub start_time: String,
    #[serde(alias = "end")]
    pub end_time: String,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: String,
    pub end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventListing {
    pub events: Vec<CalendarEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationResult {
    pub status: String,
    pub message: String,
    #[serde(rename = "eventId", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentDateTime {
    pub current_datetime: String,
    pub date: String,
    pub timezone: String,
    pub message: String,
}

#[async_trait]
pub trait CalendarBackend: Send + Sync {
    async fn add_event(&self, event: NewEvent) -> Result<MutationResult>;

    /// Events overlapping `[start, end]`. Date-only bounds cover the whole day.
    async fn list_events(&self, start: &str, end: &str) -> Result<EventListing>;

    async fn delete_event(&self, event_id: &str) -> Result<MutationResult>;

    async fn now(&self) -> Result<CurrentDateTime>;

    fn timezone(&self) -> Tz;
}

#[derive(Debug, Clone)]
struct StoredEvent {
    id: String,
    summary: String,
    start: DateTime<Tz>,
    end: DateTime<Tz>,
    all_day: bool,
    description: Option<String>,
    location: Option<String>,
}

impl StoredEvent {
    fn to_record(&self) -> CalendarEvent {
        let render = |moment: &DateTime<Tz>| {
            if self.all_day {
                moment.format("%Y-%m-%d").to_string()
            } else {
                moment.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
            }
        };
        CalendarEvent {
            id: self.id.clone(),
            summary: self.summary.clone(),
            start: render(&self.start),
            end: render(&self.end),
            location: self.location.clone(),
            description: self.description.clone(),
        }
    }
}

/// Process-local calendar in a single fixed timezone.
#[derive(Debug)]
pub struct InMemoryCalendar {
    tz: Tz,
    events: Mutex<Vec<StoredEvent>>,
    next_id: AtomicU64,
    fixed_now: Option<DateTime<Tz>>,
}

impl InMemoryCalendar {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            events: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fixed_now: None,
        }
    }

    /// Pins the clock to a local wall time, for deterministic runs.
    pub fn with_fixed_now(mut self, local: &str) -> Result<Self> {
        self.fixed_now = Some(parse_moment(local, self.tz, false)?);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> DateTime<Tz> {
        self.fixed_now
            .unwrap_or_else(|| Utc::now().with_timezone(&self.tz))
    }
}

#[async_trait]
impl CalendarBackend for InMemoryCalendar {
    async fn add_event(&self, event: NewEvent) -> Result<MutationResult> {
        let summary = event.summary.trim();
        if summary.is_empty() {
            return Err(anyhow::anyhow!("calendar event summary cannot be empty"));
        }

        let (start, end) = if event.is_all_day {
            (
                parse_moment(&date_part(&event.start_time), self.tz, false)?,
                parse_moment(&date_part(&event.end_time), self.tz, true)?,
            )
        } else {
            (
                parse_moment(&event.start_time, self.tz, false)?,
                parse_moment(&event.end_time, self.tz, true)?,
            )
        };
        if end < start {
            return Err(anyhow::anyhow!(
                "calendar event end '{}' is before its start '{}'",
                event.end_time,
                event.start_time
            ));
        }

        let id = format!("evt-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let stored = StoredEvent {
            id: id.clone(),
            summary: summary.to_string(),
            start,
            end,
            all_day: event.is_all_day,
            description: event.description.filter(|d| !d.trim().is_empty()),
            location: event.location.filter(|l| !l.trim().is_empty()),
        };
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(stored);

        tracing::debug!(event_id = %id, summary = summary, "calendar event added");
        Ok(MutationResult {
            status: "success".to_string(),
            message: format!("Added '{}' to the calendar.", summary),
            event_id: Some(id),
        })
    }

    async fn list_events(&self, start: &str, end: &str) -> Result<EventListing> {
        let range_start = parse_moment(start, self.tz, false)?;
        let range_end = parse_moment(end, self.tz, true)?;

        let mut matching = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|event| event.start <= range_end && event.end >= range_start)
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by_key(|event| event.start);

        let events = matching
            .iter()
            .map(StoredEvent::to_record)
            .collect::<Vec<_>>();
        let message = events
            .is_empty()
            .then(|| "No events found in the requested range.".to_string());
        Ok(EventListing { events, message })
    }

    async fn delete_event(&self, event_id: &str) -> Result<MutationResult> {
        let event_id = event_id.trim();
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let index = events
            .iter()
            .position(|event| event.id == event_id)
            .ok_or_else(|| anyhow::anyhow!("no calendar event with event id '{}'", event_id))?;
        let removed = events.remove(index);

        tracing::debug!(event_id = %removed.id, "calendar event deleted");
        Ok(MutationResult {
            status: "success".to_string(),
            message: format!("Deleted '{}' from the calendar.", removed.summary),
            event_id: Some(removed.id),
        })
    }

    async fn now(&self) -> Result<CurrentDateTime> {
        let now = self.current();
        Ok(CurrentDateTime {
            current_datetime: now.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            date: now.format("%Y-%m-%d").to_string(),
            timezone: self.tz.name().to_string(),
            message: format!(
                "It is currently {} ({}).",
                now.format("%Y-%m-%d %H:%M (%a)"),
                self.tz.name()
            ),
        })
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

fn date_part(text: &str) -> String {
    text.trim().chars().take(10).collect()
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parses an RFC 3339 timestamp, a local wall time, or a bare date in `tz`.
/// A bare date maps to 00:00:00, or to 23:59:59 when `end_of_day` is set.
pub fn parse_moment(text: &str, tz: Tz, end_of_day: bool) -> Result<DateTime<Tz>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&tz));
    }

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(|date| {
                let time = if end_of_day {
                    NaiveTime::from_hms_opt(23, 59, 59)
                } else {
                    NaiveTime::from_hms_opt(0, 0, 0)
                };
                date.and_time(time.unwrap_or(NaiveTime::MIN))
            })
        })
        .with_context(|| {
            format!(
                "invalid calendar datetime '{}'. Use YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD.",
                text
            )
        })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .with_context(|| format!("calendar datetime '{}' does not exist in {}", text, tz.name()))
}
