use anyhow::Result;

/// Rejects user messages longer than `max_chars` characters. Zero disables the limit.
pub fn enforce_prompt_limit(prompt: &str, max_chars: usize) -> Result<()> {
    let length = prompt.chars().count();
    if max_chars > 0 && length > max_chars {
        return Err(anyhow::anyhow!(
            "message exceeds maximum length ({} chars > {} limit). Shorten the message or raise max_prompt_chars in the profile.",
            length,
            max_chars
        ));
    }
    Ok(())
}
