use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const ORCHESTRATOR_SPEAKER: &str = "orchestrator";
pub const ORACLE_SPEAKER: &str = "oracle";
pub const STREAM_CLOSED_MESSAGE: &str = "The response stream closed before an answer was produced.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Thinking,
    ToolRunning,
    AgentOpinion,
    FinalAnswer,
    Error,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::FinalAnswer | EventStatus::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            EventStatus::Thinking => "thinking",
            EventStatus::ToolRunning => "tool_running",
            EventStatus::AgentOpinion => "agent_opinion",
            EventStatus::FinalAnswer => "final_answer",
            EventStatus::Error => "error",
        }
    }
}

/// One progress or terminal record delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub status: EventStatus,
    pub speaker: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl Event {
    pub fn new(status: EventStatus, speaker: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            speaker: speaker.to_string(),
            message: message.into(),
            log: None,
        }
    }

    pub fn thinking(speaker: &str, message: impl Into<String>) -> Self {
        Self::new(EventStatus::Thinking, speaker, message)
    }

    pub fn tool_running(speaker: &str, message: impl Into<String>) -> Self {
        Self::new(EventStatus::ToolRunning, speaker, message)
    }

    pub fn agent_opinion(speaker: &str, message: impl Into<String>) -> Self {
        Self::new(EventStatus::AgentOpinion, speaker, message)
    }

    pub fn final_answer(speaker: &str, message: impl Into<String>) -> Self {
        Self::new(EventStatus::FinalAnswer, speaker, message)
    }

    pub fn error(speaker: &str, message: impl Into<String>) -> Self {
        Self::new(EventStatus::Error, speaker, message)
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx: Some(tx),
            terminal: None,
        },
        EventStream { rx, done: false },
    )
}

/// Producer half. Accepts at most one terminal event and finalizes exactly once,
/// either through [`EventSink::finish`] or on drop.
#[derive(Debug)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
    terminal: Option<Event>,
}

impl EventSink {
    /// Returns false when the event was refused because a terminal was already sent.
    pub fn emit(&mut self, event: Event) -> bool {
        if self.terminal.is_some() {
            tracing::debug!(
                status = event.status.label(),
                speaker = %event.speaker,
                "dropping event after terminal"
            );
            return false;
        }
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };

        if event.is_terminal() {
            self.terminal = Some(event.clone());
        }
        if tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
        true
    }

    pub fn finish(mut self) -> Option<Event> {
        self.finalize();
        self.terminal.take()
    }

    fn finalize(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if self.terminal.is_none() {
            let event = Event::error(ORCHESTRATOR_SPEAKER, STREAM_CLOSED_MESSAGE);
            self.terminal = Some(event.clone());
            let _ = tx.send(event);
        }
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Consumer half. Yields events in order and ends after the first terminal.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
    done: bool,
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.done = true;
                    self.rx.close();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
