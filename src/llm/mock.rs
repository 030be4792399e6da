use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::{ChatSession, LlmClient};

type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Prompt observed by a mock session, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub session: usize,
    pub model: String,
    pub system_instruction: Option<String>,
    pub prompt: String,
}

#[derive(Default)]
struct MockState {
    replies: VecDeque<std::result::Result<String, String>>,
    prompts: Vec<RecordedPrompt>,
    sessions: usize,
}

/// Scripted model. Every session shares one reply queue, consumed in send order.
/// When the queue is empty the responder (if any) answers, otherwise the send fails.
#[derive(Clone, Default)]
pub struct MockLlm {
    state: Arc<Mutex<MockState>>,
    responder: Option<Responder>,
}

impl std::fmt::Debug for MockLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlm")
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for reply in replies {
            mock.push_reply(reply);
        }
        mock
    }

    pub fn with_responder(mut self, responder: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Offline stand-in used by `--provider mock`: answers every prompt with a
    /// well-formed reply for whichever protocol the prompt asks for.
    pub fn offline() -> Self {
        Self::new().with_responder(offline_reply)
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock().replies.push_back(Ok(reply.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock().replies.push_back(Err(message.into()));
    }

    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.lock().prompts.clone()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LlmClient for MockLlm {
    fn name(&self) -> &str {
        "mock"
    }

    fn create_session(
        &self,
        model: &str,
        system_instruction: Option<&str>,
    ) -> Box<dyn ChatSession> {
        let id = {
            let mut state = self.lock();
            state.sessions += 1;
            state.sessions
        };
        Box::new(MockSession {
            llm: self.clone(),
            id,
            model: model.to_string(),
            system_instruction: system_instruction.map(str::to_string),
        })
    }
}

struct MockSession {
    llm: MockLlm,
    id: usize,
    model: String,
    system_instruction: Option<String>,
}

#[async_trait]
impl ChatSession for MockSession {
    async fn send(&mut self, prompt: &str) -> Result<String> {
        let scripted = {
            let mut state = self.llm.lock();
            state.prompts.push(RecordedPrompt {
                session: self.id,
                model: self.model.clone(),
                system_instruction: self.system_instruction.clone(),
                prompt: prompt.to_string(),
            });
            state.replies.pop_front()
        };

        match scripted {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow::anyhow!("mock llm request failed: {message}")),
            None => match self.llm.responder.as_ref() {
                Some(responder) => Ok(responder(prompt)),
                None => Err(anyhow::anyhow!(
                    "mock llm request failed: no scripted reply left"
                )),
            },
        }
    }
}

fn offline_reply(prompt: &str) -> String {
    if prompt.contains("simple_listing") && prompt.contains("multi_agent_discussion") {
        return "single_agent_react".to_string();
    }
    if prompt.contains("for_oracle") {
        return "```json\n{\"for_oracle\": \"Offline mode: no model is connected, so this persona has no opinion.\", \
                \"for_ui\": \"(offline) No opinion available.\"}\n```"
            .to_string();
    }
    let request = prompt
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default()
        .trim();
    format!(
        "Thought: Running offline without a model.\nAction: FinalAnswer\nAction Input: (offline) I received: {request}"
    )
}
