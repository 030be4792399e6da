use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatSession, LlmClient, http_client};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Client for the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self> {
        let base_url = std::env::var("GEMINI_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());
        Ok(Self {
            http: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

impl LlmClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn create_session(
        &self,
        model: &str,
        system_instruction: Option<&str>,
    ) -> Box<dyn ChatSession> {
        Box::new(GeminiSession {
            http: self.http.clone(),
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, model
            ),
            api_key: self.api_key.clone(),
            system_instruction: system_instruction.map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            }),
            history: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [GeminiContent],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<&'a GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

struct GeminiSession {
    http: Client,
    endpoint: String,
    api_key: String,
    system_instruction: Option<GeminiContent>,
    history: Vec<GeminiContent>,
}

impl GeminiSession {
    /// Request errors drop the URL, which carries the API key.
    async fn generate(&self) -> Result<String> {
        let request = GenerateContentRequest {
            contents: &self.history,
            system_instruction: self.system_instruction.as_ref(),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("gemini llm request failed")?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .context("gemini llm request returned non-2xx status")?
            .json::<GenerateContentResponse>()
            .await
            .context("gemini response decode failed")?;

        let text = response
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(anyhow::anyhow!("gemini llm request returned no text candidates"));
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send(&mut self, prompt: &str) -> Result<String> {
        self.history.push(GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart {
                text: prompt.to_string(),
            }],
        });

        match self.generate().await {
            Ok(text) => {
                self.history.push(GeminiContent {
                    role: Some("model".to_string()),
                    parts: vec![GeminiPart { text: text.clone() }],
                });
                Ok(text)
            }
            Err(err) => {
                self.history.pop();
                Err(err)
            }
        }
    }
}
