use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatSession, LlmClient, http_client};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI-compatible `chat/completions` endpoints. Pointing
/// `OPENAI_BASE_URL` at an Ollama server works as well.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        Ok(Self {
            http: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn create_session(
        &self,
        model: &str,
        system_instruction: Option<&str>,
    ) -> Box<dyn ChatSession> {
        let messages = system_instruction
            .map(|text| ChatMessage {
                role: "system".to_string(),
                content: text.to_string(),
            })
            .into_iter()
            .collect();
        Box::new(OpenAiSession {
            http: self.http.clone(),
            endpoint: format!("{}/chat/completions", self.base_url),
            api_key: self.api_key.clone(),
            model: model.to_string(),
            messages,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

struct OpenAiSession {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    messages: Vec<ChatMessage>,
}

impl OpenAiSession {
    async fn complete(&self) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: &self.messages,
            stream: false,
        };

        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("openai llm request failed")?
            .error_for_status()
            .context("openai llm request returned non-2xx status")?
            .json::<ChatCompletionResponse>()
            .await
            .context("openai response decode failed")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("openai llm request returned no choices"))
    }
}

#[async_trait]
impl ChatSession for OpenAiSession {
    async fn send(&mut self, prompt: &str) -> Result<String> {
        self.messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        match self.complete().await {
            Ok(text) => {
                self.messages.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: text.clone(),
                });
                Ok(text)
            }
            Err(err) => {
                self.messages.pop();
                Err(err)
            }
        }
    }
}
