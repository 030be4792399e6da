//! Multi-agent discussion: one opinion per persona, merged by the oracle.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agents::listing::{day_bounds, format_event_lines, list_arguments, local_today};
use crate::agents::persona::PersonaAgent;
use crate::agents::tools::{CalendarTool, ToolDispatcher};
use crate::llm::{ChatSession, LlmClient};
use crate::streaming::{Event, EventSink};
use crate::telemetry::TelemetrySink;

pub const OPINION_FALLBACK_FOR_ORACLE: &str = "This agent could not produce an opinion because of an error.";
pub const OPINION_FALLBACK_FOR_UI: &str = "I couldn't quite gather my thoughts on this one...";
pub const ORACLE_UNAVAILABLE_MESSAGE: &str = "System error: the oracle cannot be reached right now.";
pub const ORACLE_FAILURE_MESSAGE: &str =
    "I'm sorry, the connection seems a little unsteady right now. Please ask me again in a moment.";
pub const ORACLE_PERSONA_FALLBACK: &str =
    "You are a perceptive AI who brings a discussion together and points out what others missed.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Opinion {
    pub agent_id: String,
    pub for_oracle: String,
    pub for_ui: String,
}

impl Opinion {
    pub fn fallback(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            for_oracle: OPINION_FALLBACK_FOR_ORACLE.to_string(),
            for_ui: OPINION_FALLBACK_FOR_UI.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpinionPayload {
    for_oracle: String,
    for_ui: String,
}

/// Body of the first ```json fence, else the outermost `{...}` span.
fn extract_json_block(raw: &str) -> Option<&str> {
    if let Some(start) = raw.find("```json") {
        let body = &raw[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let open = raw.find('{')?;
    let close = raw.rfind('}')?;
    (close > open).then(|| &raw[open..=close])
}

pub fn parse_opinion(agent_id: &str, raw: &str) -> Option<Opinion> {
    let payload = serde_json::from_str::<OpinionPayload>(extract_json_block(raw)?).ok()?;
    if payload.for_oracle.trim().is_empty() || payload.for_ui.trim().is_empty() {
        return None;
    }
    Some(Opinion {
        agent_id: agent_id.to_string(),
        for_oracle: payload.for_oracle.trim().to_string(),
        for_ui: payload.for_ui.trim().to_string(),
    })
}

/// Collects one opinion per agent in registration order, streaming each as it
/// arrives. A failing agent contributes the fallback pair.
pub async fn gather_opinions(
    agents: &[PersonaAgent],
    message: &str,
    conversation: &str,
    sink: &mut EventSink,
    telemetry: &TelemetrySink,
) -> IndexMap<String, Opinion> {
    let mut opinions = IndexMap::new();
    for agent in agents {
        let opinion = match agent.initial_idea(message, conversation).await {
            Ok(raw) => parse_opinion(agent.id(), &raw).unwrap_or_else(|| {
                tracing::warn!(agent = agent.id(), "opinion reply had no usable JSON block");
                Opinion::fallback(agent.id())
            }),
            Err(err) => {
                tracing::warn!(agent = agent.id(), error = %format!("{err:#}"), "opinion request failed");
                telemetry.emit(
                    "llm.failed",
                    json!({ "agent": agent.id(), "phase": "opinion", "error": format!("{err:#}") }),
                );
                Opinion::fallback(agent.id())
            }
        };

        sink.emit(
            Event::agent_opinion(agent.id(), opinion.for_ui.clone())
                .with_log(format!("received opinion from '{}'", agent.id())),
        );
        opinions.insert(agent.id().to_string(), opinion);
    }
    opinions
}

/// Current time and today's events, each noted as unavailable on failure.
pub async fn gather_facts(dispatcher: &ToolDispatcher) -> String {
    let calendar = dispatcher.calendar();
    let mut lines = Vec::new();
    match calendar.now().await {
        Ok(now) => lines.push(format!("- Current date and time: {}", now.current_datetime)),
        Err(err) => lines.push(format!("- Current date and time: unavailable ({err})")),
    }

    let (start, end) = day_bounds(local_today(calendar.as_ref()).await);
    let observation = dispatcher
        .run_tool(CalendarTool::ListEvents.name(), &list_arguments(&start, &end))
        .await;
    let parsed = serde_json::from_str::<Value>(&observation).ok();
    match parsed
        .as_ref()
        .and_then(|value| value.get("events"))
        .and_then(Value::as_array)
    {
        Some(events) if events.is_empty() => lines.push("- Today's events: none".to_string()),
        Some(events) => {
            lines.push("- Today's events:".to_string());
            lines.extend(
                format_event_lines(events)
                    .into_iter()
                    .map(|line| format!("  {line}")),
            );
        }
        None => lines.push(format!("- Today's events: unavailable ({})", observation.trim())),
    }
    lines.join("\n")
}

pub fn build_oracle_system_instruction(persona: &str) -> String {
    format!(
        "You are the Oracle. You look over the discussion of the AI agents working for the \
         user, notice what they overlooked, and point the user toward the better option.\n\n\
         # Your persona\n{}\n\n\
         # Your tone\nSpeak politely and calmly. Avoid sweeping assertions; offer gentle, \
         thoughtful suggestions addressed directly to the user.",
        persona.trim()
    )
}

pub fn build_synthesis_prompt(
    message: &str,
    facts: &str,
    opinions: &IndexMap<String, Opinion>,
    conversation: &str,
) -> String {
    let mut discussion = String::new();
    for (agent_id, opinion) in opinions {
        discussion.push_str(&format!(
            "\n## Proposal from agent '{}'\n{}\n",
            agent_id, opinion.for_oracle
        ));
    }
    let conversation = if conversation.trim().is_empty() {
        "(no earlier conversation)"
    } else {
        conversation.trim()
    };

    format!(
        "# The user's request\n\"{message}\"\n\n\
         # Facts\n{facts}\n\n\
         # Recent conversation\n{conversation}\n\n\
         # The agents' discussion\n{discussion}\n\
         # Your task\nHaving heard these proposals, write exactly one final reply to the user in \
         your own persona and tone. Speak to the user directly in natural language; do not \
         describe the discussion or say things like \"to summarize the opinions\".",
        message = message.trim(),
    )
}

/// The synthesizer with its own long-lived chat session.
pub struct Oracle {
    session: Option<Box<dyn ChatSession>>,
}

impl Oracle {
    pub fn new(llm: &Arc<dyn LlmClient>, model: &str, persona: &str) -> Self {
        let system = build_oracle_system_instruction(persona);
        Self {
            session: Some(llm.create_session(model, Some(&system))),
        }
    }

    pub fn unavailable() -> Self {
        Self { session: None }
    }

    pub fn is_available(&self) -> bool {
        self.session.is_some()
    }

    pub async fn synthesize(&mut self, prompt: &str, telemetry: &TelemetrySink) -> String {
        let Some(session) = self.session.as_mut() else {
            tracing::warn!("oracle session missing");
            return ORACLE_UNAVAILABLE_MESSAGE.to_string();
        };
        match session.send(prompt).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => ORACLE_FAILURE_MESSAGE.to_string(),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "oracle synthesis failed");
                telemetry.emit(
                    "llm.failed",
                    json!({ "agent": "oracle", "phase": "synthesis", "error": format!("{err:#}") }),
                );
                ORACLE_FAILURE_MESSAGE.to_string()
            }
        }
    }
}
