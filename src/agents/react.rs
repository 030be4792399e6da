//! Bounded think/act/observe loop for a single persona.

use anyhow::Result;
use serde_json::json;

use crate::agents::parser::{AgentDecision, parse_agent_reply};
use crate::agents::persona::PersonaAgent;
use crate::agents::tools::ToolDispatcher;
use crate::config::RuntimeConfig;
use crate::streaming::{Event, EventSink};
use crate::telemetry::TelemetrySink;

/// Stand-in reply used when the model call itself fails. Parses as a final answer.
pub const TRANSPORT_FALLBACK_REPLY: &str = "Thought: The model call failed.\n\
Action: FinalAnswer\n\
Action Input: Sorry, something went wrong on the AI side. Please try again in a moment.";

pub const EMPTY_ANSWER_FALLBACK: &str = "I couldn't quite put that into words.";

pub const NOT_CONVERGED_MESSAGE: &str =
    "Hmm, I couldn't gather my thoughts on that one. Could you rephrase the request?";

const FORMAT_CORRECTION: &str = "Reply again using exactly the Thought / Action / Action Input \
format. Tool arguments must be a single JSON object.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub history_window: usize,
    pub parse_retries: usize,
}

impl LoopSettings {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations.max(1),
            history_window: cfg.history_window,
            parse_retries: cfg.parse_retries,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: crate::config::DEFAULT_MAX_ITERATIONS,
            history_window: crate::config::DEFAULT_HISTORY_WINDOW,
            parse_retries: 0,
        }
    }
}

/// Per-invocation scratch state; dropped when the loop returns.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopState {
    pub iteration_count: usize,
    pub running_context: Vec<String>,
    pub terminated: bool,
    pub parse_retries_used: usize,
}

impl LoopState {
    pub fn seeded(user_profile: &str, conversation: &str, message: &str) -> Self {
        let mut seed = format!("# Profile of the user you support\n{}\n\n", user_profile.trim());
        if !conversation.trim().is_empty() {
            seed.push_str(&format!("# Recent conversation\n{}\n\n", conversation.trim()));
        }
        seed.push_str(&format!("# Instruction from the user\n{}", message.trim()));
        Self {
            running_context: vec![seed],
            ..Self::default()
        }
    }
}

pub fn build_turn_prompt(state: &LoopState) -> String {
    format!(
        "# Current situation\n{}\n\n# Your thought and action\n",
        state.running_context.join("\n\n")
    )
}

/// Drives `agent` until it answers, gives up, or hits the iteration cap.
/// Always emits exactly one terminal event into `sink`.
pub async fn run_react_loop(
    agent: &mut PersonaAgent,
    dispatcher: &ToolDispatcher,
    settings: LoopSettings,
    conversation: &str,
    message: &str,
    sink: &mut EventSink,
    telemetry: &TelemetrySink,
) -> Result<LoopState> {
    let speaker = agent.id().to_string();
    let mut state = LoopState::seeded(agent.user_profile(), conversation, message);

    while state.iteration_count < settings.max_iterations {
        state.iteration_count += 1;
        sink.emit(
            Event::thinking(&speaker, agent.thinking_message()).with_log(format!(
                "iteration {}/{}",
                state.iteration_count, settings.max_iterations
            )),
        );

        let prompt = build_turn_prompt(&state);
        let reply = match agent.session_mut().send(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(agent = %speaker, error = %format!("{err:#}"), "llm call failed, using fallback reply");
                telemetry.emit(
                    "llm.failed",
                    json!({ "agent": speaker, "phase": "react", "error": format!("{err:#}") }),
                );
                TRANSPORT_FALLBACK_REPLY.to_string()
            }
        };

        match parse_agent_reply(&reply) {
            AgentDecision::FinalAnswer { text } => {
                let text = if text.is_empty() {
                    EMPTY_ANSWER_FALLBACK.to_string()
                } else {
                    text
                };
                tracing::debug!(agent = %speaker, iterations = state.iteration_count, "final answer");
                sink.emit(Event::final_answer(&speaker, text));
                state.terminated = true;
                return Ok(state);
            }
            AgentDecision::ToolCall { action, arguments } => {
                sink.emit(
                    Event::tool_running(&speaker, format!("Running tool '{action}'..."))
                        .with_log(serde_json::Value::Object(arguments.clone()).to_string()),
                );
                let result = dispatcher.run_tool(&action, &arguments).await;
                state.running_context.push(format!(
                    "[Your thought and action]\n{}\n\n[Tool result]\n{}",
                    reply.trim(),
                    result
                ));
            }
            AgentDecision::ParseError { reason, .. } => {
                tracing::warn!(agent = %speaker, reason = %reason, "unparseable agent reply");
                if state.parse_retries_used < settings.parse_retries {
                    state.parse_retries_used += 1;
                    state.running_context.push(format!(
                        "[Your previous reply]\n{}\n\n[Format problem]\n{}. {}",
                        reply.trim(),
                        reason,
                        FORMAT_CORRECTION
                    ));
                    continue;
                }
                sink.emit(Event::final_answer(
                    &speaker,
                    format!("Sorry, I seem to be a little confused. Error: {reason}"),
                ));
                state.terminated = true;
                return Ok(state);
            }
        }
    }

    tracing::warn!(agent = %speaker, iterations = state.iteration_count, "agent loop hit the iteration cap");
    sink.emit(Event::final_answer(&speaker, NOT_CONVERGED_MESSAGE));
    state.terminated = true;
    Ok(state)
}
