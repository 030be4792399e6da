#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Calendar,
    Config,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Calendar => "CALENDAR",
            ErrorCategory::Config => "CONFIG",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Provider => {
                "Set GOOGLE_API_KEY or OPENAI_API_KEY, or run offline with --provider mock."
            }
            ErrorCategory::Calendar => {
                "Check event ids and ISO-8601 times (YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD)."
            }
            ErrorCategory::Config => {
                "Run oracle-calendar profiles show and fix .oracle/config.toml or the ORACLE_* variables."
            }
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api_key")
        || msg.contains("no provider could be auto-detected")
        || msg.contains("provider")
        || msg.contains("llm request")
    {
        return ErrorCategory::Provider;
    }

    if msg.contains("profile")
        || msg.contains("persona")
        || msg.contains("timezone")
        || msg.contains("lead agent")
        || msg.contains("config")
    {
        return ErrorCategory::Config;
    }

    if msg.contains("calendar") || msg.contains("event id") || msg.contains("datetime") {
        return ErrorCategory::Calendar;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let category = categorize_error(err);
    let rendered_error = render_error_message(err, show_sensitive_config);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        rendered_error,
        category.hint()
    )
}

pub fn render_error_message(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let text = format!("{err:#}");
    if show_sensitive_config {
        text
    } else {
        redact_sensitive_text(&text)
    }
}

pub fn redact_sensitive_text(text: &str) -> String {
    redact_bearer_tokens(&redact_query_keys(text))
}

fn is_token_boundary(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '"' | '\'' | '(' | ')' | '[' | ']' | '{' | '}' | ',' | ';')
}

/// Masks `key=...` query values such as the Gemini API key in request URLs.
pub fn redact_query_keys(text: &str) -> String {
    const KEY_PARAMS: [&str; 2] = ["?key=", "&key="];
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    loop {
        let next = KEY_PARAMS
            .iter()
            .filter_map(|param| {
                text[cursor..]
                    .find(param)
                    .map(|offset| (cursor + offset, param.len()))
            })
            .min_by_key(|(start, _)| *start);
        let Some((start, prefix_len)) = next else {
            break;
        };

        let value_start = start + prefix_len;
        out.push_str(&text[cursor..value_start]);
        let remainder = &text[value_start..];
        let end = remainder
            .find(|ch: char| is_token_boundary(ch) || ch == '&')
            .unwrap_or(remainder.len());
        if end > 0 {
            out.push_str("[REDACTED]");
        }
        cursor = value_start + end;
    }

    out.push_str(&text[cursor..]);
    out
}

pub fn redact_bearer_tokens(text: &str) -> String {
    const BEARER_PREFIX: &str = "Bearer ";
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some(offset) = text[cursor..].find(BEARER_PREFIX) {
        let value_start = cursor + offset + BEARER_PREFIX.len();
        out.push_str(&text[cursor..value_start]);
        let remainder = &text[value_start..];
        let end = remainder.find(is_token_boundary).unwrap_or(remainder.len());
        if end > 0 {
            out.push_str("[REDACTED]");
        }
        cursor = value_start + end;
    }

    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_gemini_key_in_url() {
        let text = "error sending request for url (https://example.test/v1beta/models/m:generateContent?key=abc123&alt=json)";
        let redacted = redact_sensitive_text(text);
        assert!(!redacted.contains("abc123"));
        assert!(redacted.contains("?key=[REDACTED]&alt=json"));
    }

    #[test]
    fn redacts_bearer_tokens() {
        let redacted = redact_sensitive_text("header Authorization: Bearer sk-live-42 rejected");
        assert_eq!(redacted, "header Authorization: Bearer [REDACTED] rejected");
    }

    #[test]
    fn categorizes_common_failures() {
        let provider = anyhow::anyhow!("no provider could be auto-detected");
        assert_eq!(categorize_error(&provider), ErrorCategory::Provider);

        let config = anyhow::anyhow!("invalid timezone 'Mars/Base'");
        assert_eq!(categorize_error(&config), ErrorCategory::Config);

        let calendar = anyhow::anyhow!("no calendar event with event id 'evt-9'");
        assert_eq!(categorize_error(&calendar), ErrorCategory::Calendar);

        let other = anyhow::anyhow!("boom");
        assert_eq!(categorize_error(&other), ErrorCategory::Internal);
    }

    #[test]
    fn format_includes_code_and_hint() {
        let err = anyhow::anyhow!("duplicate persona id 'ak'");
        let rendered = format_cli_error(&err, false);
        assert!(rendered.starts_with("[CONFIG] duplicate persona id 'ak'"));
        assert!(rendered.contains("\nHint: "));
    }
}
