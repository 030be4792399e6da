//! Direct schedule readout for "what's on today/tomorrow" requests.

use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use serde_json::{Map, Value, json};

use crate::agents::tools::{CalendarTool, ToolDispatcher};
use crate::calendar::CalendarBackend;
use crate::streaming::{Event, EventSink, ORCHESTRATOR_SPEAKER};
use crate::workflow::ListingDay;

/// Local calendar date according to the backend clock, or the system clock in
/// the backend's timezone when the backend cannot answer.
pub async fn local_today(calendar: &dyn CalendarBackend) -> NaiveDate {
    let reported = match calendar.now().await {
        Ok(now) => NaiveDate::parse_from_str(&now.date, "%Y-%m-%d").ok(),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "calendar clock unavailable");
            None
        }
    };
    reported.unwrap_or_else(|| Utc::now().with_timezone(&calendar.timezone()).date_naive())
}

pub fn day_bounds(date: NaiveDate) -> (String, String) {
    (
        format!("{}T00:00:00", date.format("%Y-%m-%d")),
        format!("{}T23:59:59", date.format("%Y-%m-%d")),
    )
}

pub fn list_arguments(start: &str, end: &str) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("start_time".to_string(), json!(start));
    args.insert("end_time".to_string(), json!(end));
    args
}

fn clock_label(moment: &str) -> Option<&str> {
    moment.get(11..16)
}

/// One `- HH:MM-HH:MM summary` line per event, or `- All day summary`.
pub fn format_event_lines(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .map(|event| {
            let summary = event
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or("(untitled)");
            let start = event.get("start").and_then(Value::as_str).unwrap_or_default();
            let end = event.get("end").and_then(Value::as_str).unwrap_or_default();
            match (clock_label(start), clock_label(end)) {
                (Some(from), Some(to)) => format!("- {from}-{to} {summary}"),
                _ => format!("- All day {summary}"),
            }
        })
        .collect()
}

/// Turns a `list_calendar_events` observation into the user-facing answer.
pub fn format_listing(day: ListingDay, date: NaiveDate, observation: &str) -> String {
    let parsed = serde_json::from_str::<Value>(observation).ok();
    let Some(events) = parsed
        .as_ref()
        .and_then(|value| value.get("events"))
        .and_then(Value::as_array)
    else {
        return format!(
            "I couldn't read {}'s calendar. {}",
            day.label(),
            observation.trim()
        );
    };

    let date = date.format("%Y-%m-%d");
    if events.is_empty() {
        return format!("You have no events {} ({date}).", day.label());
    }

    let mut lines = vec![format!(
        "Here is your schedule for {} ({date}):",
        day.label()
    )];
    lines.extend(format_event_lines(events));
    lines.join("\n")
}

pub async fn run_listing_flow(
    dispatcher: &ToolDispatcher,
    day: ListingDay,
    sink: &mut EventSink,
) -> Result<()> {
    let today = local_today(dispatcher.calendar().as_ref()).await;
    let date = today
        .checked_add_days(Days::new(day.offset_days() as u64))
        .unwrap_or(today);
    let (start, end) = day_bounds(date);

    let tool = CalendarTool::ListEvents.name();
    sink.emit(
        Event::tool_running(
            ORCHESTRATOR_SPEAKER,
            format!("Checking {}'s calendar...", day.label()),
        )
        .with_log(format!("{tool} {start}..{end}")),
    );
    let observation = dispatcher.run_tool(tool, &list_arguments(&start, &end)).await;

    sink.emit(Event::final_answer(
        ORCHESTRATOR_SPEAKER,
        format_listing(day, date, &observation),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).expect("date")
    }

    #[test]
    fn bounds_cover_the_whole_day() {
        assert_eq!(
            day_bounds(date()),
            (
                "2025-04-01T00:00:00".to_string(),
                "2025-04-01T23:59:59".to_string()
            )
        );
    }

    #[test]
    fn listing_formats_timed_and_all_day_events() {
        let observation = json!({
            "events": [
                {"id": "evt-1", "summary": "Holiday", "start": "2025-04-01", "end": "2025-04-01"},
                {"id": "evt-2", "summary": "Standup", "start": "2025-04-01T09:00:00+09:00", "end": "2025-04-01T09:15:00+09:00"}
            ]
        })
        .to_string();
        let text = format_listing(ListingDay::Today, date(), &observation);
        assert_eq!(
            text,
            "Here is your schedule for today (2025-04-01):\n- All day Holiday\n- 09:00-09:15 Standup"
        );
    }

    #[test]
    fn empty_and_failed_listings() {
        let empty = json!({"events": [], "message": "No events found"}).to_string();
        assert_eq!(
            format_listing(ListingDay::Tomorrow, date(), &empty),
            "You have no events tomorrow (2025-04-01)."
        );

        let failed = format_listing(ListingDay::Today, date(), "Tool 'list_calendar_events' failed: boom");
        assert!(failed.starts_with("I couldn't read today's calendar."));
    }
}
