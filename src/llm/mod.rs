//! Chat-session abstraction over the hosted model providers.
//!
//! Each persona, the oracle, and every one-off request (opinions, LLM routing)
//! talks to the model through a [`ChatSession`] created by an [`LlmClient`].
//! A session keeps its own message history; a fresh session starts empty.

pub mod gemini;
pub mod mock;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;

pub use gemini::GeminiClient;
pub use mock::MockLlm;
pub use openai::OpenAiClient;

#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Sends one user message and returns the model's reply text. A failed send
    /// leaves the session history as it was before the call.
    async fn send(&mut self, prompt: &str) -> Result<String>;
}

pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    fn create_session(&self, model: &str, system_instruction: Option<&str>)
    -> Box<dyn ChatSession>;
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    use anyhow::Context;

    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs.max(1)))
        .build()
        .context("failed to build HTTP client for LLM provider")
}
