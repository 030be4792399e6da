use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::Provider;
use crate::config::RuntimeConfig;
use crate::llm::{GeminiClient, LlmClient, MockLlm, OpenAiClient};

pub fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::Gemini => "gemini-2.5-flash",
        Provider::Openai => "gpt-4o-mini",
        Provider::Mock | Provider::Auto => "mock-model",
    }
}

pub fn validate_model_for_provider(provider: Provider, model_name: &str) -> Result<()> {
    let is_valid = match provider {
        Provider::Gemini => model_name.starts_with("gemini"),
        Provider::Openai | Provider::Mock | Provider::Auto => !model_name.trim().is_empty(),
    };

    if is_valid {
        return Ok(());
    }

    Err(anyhow::anyhow!(
        "model '{}' is not compatible with provider '{}'",
        model_name,
        provider_label(provider)
    ))
}

pub fn provider_label(provider: Provider) -> &'static str {
    match provider {
        Provider::Auto => "auto",
        Provider::Gemini => "gemini",
        Provider::Openai => "openai",
        Provider::Mock => "mock",
    }
}

pub fn resolve_llm(cfg: &RuntimeConfig) -> Result<(Arc<dyn LlmClient>, Provider, String)> {
    let provider = match cfg.provider {
        Provider::Auto => detect_provider().context(
            "no provider could be auto-detected. Set GOOGLE_API_KEY or OPENAI_API_KEY, \
             or use --provider mock",
        )?,
        p => p,
    };

    let model_name = cfg
        .model
        .clone()
        .unwrap_or_else(|| default_model(provider).to_string());
    validate_model_for_provider(provider, &model_name)?;

    let client: Arc<dyn LlmClient> = match provider {
        Provider::Gemini => {
            let api_key = std::env::var("GOOGLE_API_KEY")
                .context("GOOGLE_API_KEY is required for Gemini provider")?;
            Arc::new(GeminiClient::new(api_key, cfg.llm_timeout_secs)?)
        }
        Provider::Openai => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|value| !value.trim().is_empty());
            if api_key.is_none() && !env_present("OPENAI_BASE_URL") {
                return Err(anyhow::anyhow!(
                    "OPENAI_API_KEY is required for OpenAI provider unless OPENAI_BASE_URL points at a local server"
                ));
            }
            Arc::new(OpenAiClient::new(api_key, cfg.llm_timeout_secs)?)
        }
        Provider::Mock => Arc::new(MockLlm::offline()),
        Provider::Auto => {
            return Err(anyhow::anyhow!(
                "auto provider must be resolved before building a client"
            ));
        }
    };

    Ok((client, provider, model_name))
}

pub fn detect_provider() -> Option<Provider> {
    if env_present("GOOGLE_API_KEY") {
        return Some(Provider::Gemini);
    }
    if env_present("OPENAI_API_KEY") {
        return Some(Provider::Openai);
    }
    None
}

pub fn env_present(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_requires_gemini_model_names() {
        assert!(validate_model_for_provider(Provider::Gemini, "gemini-2.5-flash").is_ok());
        assert!(validate_model_for_provider(Provider::Gemini, "gpt-4o").is_err());
        assert!(validate_model_for_provider(Provider::Openai, "llama3.1").is_ok());
    }
}
