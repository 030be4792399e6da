//! Routes each turn to a flow and owns the session's conversation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use anyhow::{Context, Result};
use futures_util::FutureExt;
use serde_json::json;

use super::listing::run_listing_flow;
use super::oracle::{Oracle, build_synthesis_prompt, gather_facts, gather_opinions};
use super::persona::PersonaAgent;
use super::react::{LoopSettings, run_react_loop};
use super::tools::ToolDispatcher;
use crate::conversation::ConversationHistory;
use crate::error::redact_sensitive_text;
use crate::streaming::{
    Event, EventSink, EventStatus, ORACLE_SPEAKER, ORCHESTRATOR_SPEAKER,
};
use crate::telemetry::TelemetrySink;
use crate::workflow::{ListingDay, WorkflowClassifier, WorkflowRoute, detect_listing_day};

pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred while handling your request.";

pub struct Orchestrator {
    agents: Vec<PersonaAgent>,
    lead_index: usize,
    oracle: Oracle,
    dispatcher: ToolDispatcher,
    classifier: WorkflowClassifier,
    history: ConversationHistory,
    settings: LoopSettings,
    telemetry: TelemetrySink,
}

impl Orchestrator {
    pub fn new(
        agents: Vec<PersonaAgent>,
        lead_agent: &str,
        oracle: Oracle,
        dispatcher: ToolDispatcher,
        classifier: WorkflowClassifier,
        settings: LoopSettings,
        telemetry: TelemetrySink,
    ) -> Result<Self> {
        let lead_index = agents
            .iter()
            .position(|agent| agent.id() == lead_agent)
            .with_context(|| format!("lead agent '{}' is not a registered persona", lead_agent))?;
        Ok(Self {
            agents,
            lead_index,
            oracle,
            dispatcher,
            classifier,
            history: ConversationHistory::new(),
            settings,
            telemetry,
        })
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        self.agents.iter().map(PersonaAgent::id).collect()
    }

    pub fn lead_agent(&self) -> &str {
        self.agents[self.lead_index].id()
    }

    pub fn settings(&self) -> LoopSettings {
        self.settings
    }

    pub async fn classify(&self, message: &str) -> WorkflowRoute {
        self.classifier.classify(message).await
    }

    /// Runs one conversation turn. The stream behind `sink` receives exactly one
    /// terminal event, which is also returned and recorded in the history.
    pub async fn handle(&mut self, message: &str, mut sink: EventSink) -> Option<Event> {
        let started = Instant::now();
        self.telemetry.emit(
            "turn.started",
            json!({ "message_chars": message.chars().count() }),
        );

        let conversation = self.history.render(self.settings.history_window);
        self.history.push_user(message);

        let route = self.classifier.classify(message).await;
        tracing::info!(route = route.label(), "workflow route selected");
        self.telemetry
            .emit("route.selected", json!({ "route": route.label() }));

        let outcome = AssertUnwindSafe(self.run_flow(route, message, &conversation, &mut sink))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let detail = redact_sensitive_text(&format!("{err:#}"));
                tracing::error!(route = route.label(), error = %detail, "flow failed");
                sink.emit(Event::error(ORCHESTRATOR_SPEAKER, INTERNAL_ERROR_MESSAGE).with_log(detail));
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                tracing::error!(route = route.label(), panic = %detail, "flow panicked");
                sink.emit(Event::error(ORCHESTRATOR_SPEAKER, INTERNAL_ERROR_MESSAGE).with_log(detail));
            }
        }

        let terminal = sink.finish();
        if let Some(event) = terminal.as_ref() {
            self.history.push_assistant(&event.speaker, &event.message);
            let name = if event.status == EventStatus::Error {
                "turn.failed"
            } else {
                "turn.completed"
            };
            self.telemetry.emit(
                name,
                json!({
                    "route": route.label(),
                    "speaker": event.speaker,
                    "elapsed_ms": started.elapsed().as_millis() as u64,
                }),
            );
        }
        terminal
    }

    async fn run_flow(
        &mut self,
        route: WorkflowRoute,
        message: &str,
        conversation: &str,
        sink: &mut EventSink,
    ) -> Result<()> {
        match route {
            WorkflowRoute::SimpleListing => {
                let day = detect_listing_day(message).unwrap_or(ListingDay::Today);
                run_listing_flow(&self.dispatcher, day, sink).await
            }
            WorkflowRoute::SingleAgentReact => {
                let agent = self
                    .agents
                    .get_mut(self.lead_index)
                    .context("lead agent missing from roster")?;
                run_react_loop(
                    agent,
                    &self.dispatcher,
                    self.settings,
                    conversation,
                    message,
                    sink,
                    &self.telemetry,
                )
                .await
                .map(|_| ())
            }
            WorkflowRoute::MultiAgentDiscussion => {
                sink.emit(
                    Event::thinking(ORCHESTRATOR_SPEAKER, "(Everyone is thinking it over...)")
                        .with_log("starting multi-agent discussion"),
                );
                let opinions =
                    gather_opinions(&self.agents, message, conversation, sink, &self.telemetry)
                        .await;

                sink.emit(
                    Event::thinking(ORACLE_SPEAKER, "(The oracle is bringing the ideas together...)")
                        .with_log("oracle synthesis started"),
                );
                let facts = gather_facts(&self.dispatcher).await;
                let prompt = build_synthesis_prompt(message, &facts, &opinions, conversation);
                let answer = self.oracle.synthesize(&prompt, &self.telemetry).await;
                sink.emit(Event::final_answer(ORACLE_SPEAKER, answer).with_log("final reply generated"));
                Ok(())
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
