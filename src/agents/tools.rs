//! Calendar tools callable from the agent loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::calendar::{CalendarBackend, NewEvent};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarTool {
    AddEvent,
    ListEvents,
    DeleteEvent,
    CurrentDatetime,
}

impl CalendarTool {
    pub const ALL: [CalendarTool; 4] = [
        CalendarTool::ListEvents,
        CalendarTool::AddEvent,
        CalendarTool::DeleteEvent,
        CalendarTool::CurrentDatetime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CalendarTool::AddEvent => "add_calendar_event",
            CalendarTool::ListEvents => "list_calendar_events",
            CalendarTool::DeleteEvent => "delete_calendar_event",
            CalendarTool::CurrentDatetime => "get_current_datetime",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CalendarTool::AddEvent => {
                "Add an event. Args: {\"summary\": str, \"start_time\": \"YYYY-MM-DDTHH:MM:SS\", \
                 \"end_time\": \"YYYY-MM-DDTHH:MM:SS\", \"is_all_day\": bool (optional), \
                 \"description\": str (optional), \"location\": str (optional)}"
            }
            CalendarTool::ListEvents => {
                "List events in a period. Args: {\"start_time\": \"YYYY-MM-DDTHH:MM:SS\", \
                 \"end_time\": \"YYYY-MM-DDTHH:MM:SS\"}. A bare YYYY-MM-DD covers the whole day."
            }
            CalendarTool::DeleteEvent => "Delete an event by id. Args: {\"event_id\": str}",
            CalendarTool::CurrentDatetime => "Get the exact current date and time. Args: {}",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name.trim())
    }
}

/// Bulleted tool list embedded in persona system instructions.
pub fn tool_catalog() -> String {
    CalendarTool::ALL
        .iter()
        .map(|tool| format!("- `{}`: {}", tool.name(), tool.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn tool_names() -> Vec<&'static str> {
    CalendarTool::ALL.iter().map(|tool| tool.name()).collect()
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(alias = "start")]
    start_time: String,
    #[serde(alias = "end")]
    end_time: String,
}

#[derive(Debug, Deserialize)]
struct DeleteArgs {
    #[serde(alias = "eventId", alias = "id")]
    event_id: String,
}

#[derive(Clone)]
pub struct ToolDispatcher {
    calendar: Arc<dyn CalendarBackend>,
    telemetry: TelemetrySink,
}

impl ToolDispatcher {
    pub fn new(calendar: Arc<dyn CalendarBackend>, telemetry: TelemetrySink) -> Self {
        Self {
            calendar,
            telemetry,
        }
    }

    pub fn calendar(&self) -> &Arc<dyn CalendarBackend> {
        &self.calendar
    }

    /// Runs one tool and returns its observation text. Unknown tools, bad
    /// arguments, and backend failures all come back as text.
    pub async fn run_tool(&self, name: &str, arguments: &Map<String, Value>) -> String {
        self.telemetry
            .emit("tool.requested", json!({ "tool": name }));

        let Some(tool) = CalendarTool::from_name(name) else {
            tracing::warn!(tool = name, "unsupported tool requested");
            self.telemetry.emit(
                "tool.failed",
                json!({ "tool": name, "reason": "unsupported" }),
            );
            return format!(
                "Unsupported tool '{}'. Available tools: {}",
                name,
                tool_names().join(", ")
            );
        };

        let args = Value::Object(arguments.clone());
        tracing::info!(tool = tool.name(), args = %args, "running tool");
        match self.invoke(tool, arguments).await {
            Ok(value) => {
                self.telemetry
                    .emit("tool.succeeded", json!({ "tool": tool.name() }));
                value.to_string()
            }
            Err(err) => {
                tracing::warn!(tool = tool.name(), error = %format!("{err:#}"), "tool failed");
                self.telemetry.emit(
                    "tool.failed",
                    json!({ "tool": tool.name(), "error": format!("{err:#}") }),
                );
                format!("Tool '{}' failed: {err:#}", tool.name())
            }
        }
    }

    async fn invoke(&self, tool: CalendarTool, arguments: &Map<String, Value>) -> Result<Value> {
        let value = match tool {
            CalendarTool::AddEvent => {
                let event: NewEvent = decode_args(tool, arguments)?;
                serde_json::to_value(self.calendar.add_event(event).await?)?
            }
            CalendarTool::ListEvents => {
                let args: ListArgs = decode_args(tool, arguments)?;
                serde_json::to_value(
                    self.calendar
                        .list_events(&args.start_time, &args.end_time)
                        .await?,
                )?
            }
            CalendarTool::DeleteEvent => {
                let args: DeleteArgs = decode_args(tool, arguments)?;
                serde_json::to_value(self.calendar.delete_event(&args.event_id).await?)?
            }
            CalendarTool::CurrentDatetime => serde_json::to_value(self.calendar.now().await?)?,
        };
        Ok(value)
    }
}

fn decode_args<T: DeserializeOwned>(tool: CalendarTool, arguments: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .with_context(|| format!("invalid arguments for {}", tool.name()))
}
