use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::agents::parser::{FORMAT_INSTRUCTIONS, GRAMMAR_VERSION};
use crate::agents::tools::tool_catalog;
use crate::config::{PersonaConfig, RuntimeConfig};
use crate::llm::{ChatSession, LlmClient};

pub const USER_PROFILE_FALLBACK: &str = "No particular information about this user is available.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaProfile {
    pub id: String,
    pub display_name: String,
    pub persona_text: String,
}

impl PersonaProfile {
    pub fn load(cfg: &RuntimeConfig, persona: &PersonaConfig) -> Self {
        let fallback = persona.fallback_persona.clone().unwrap_or_else(|| {
            format!(
                "I am {} ({}), a calendar assistant agent.",
                persona.display_name, persona.id
            )
        });
        let persona_text = match persona.persona_file.as_deref() {
            Some(file) => load_text_or(&cfg.knowledge_path(file), &fallback),
            None => fallback,
        };
        Self {
            id: persona.id.clone(),
            display_name: persona.display_name.clone(),
            persona_text,
        }
    }
}

/// Reads a knowledge file, falling back when it is missing or unreadable.
pub fn load_text_or(path: &Path, fallback: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "knowledge file is empty, using fallback text");
            fallback.to_string()
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "knowledge file unavailable, using fallback text");
            fallback.to_string()
        }
    }
}

pub fn load_user_profile(cfg: &RuntimeConfig) -> String {
    load_text_or(
        &cfg.knowledge_path(&cfg.user_profile_file),
        USER_PROFILE_FALLBACK,
    )
}

pub fn build_system_instruction(profile: &PersonaProfile, user_profile: &str) -> String {
    format!(
        "You are {name} ({id}), a dedicated AI calendar agent supporting one specific user.\n\n\
         # Your persona\n{persona}\n\n\
         # Profile of the user you support\n{user_profile}\n\n\
         # Tools you can use\n{tools}\n\n\
         # Output format\n{format}",
        name = profile.display_name,
        id = profile.id,
        persona = profile.persona_text.trim(),
        user_profile = user_profile.trim(),
        tools = tool_catalog(),
        format = FORMAT_INSTRUCTIONS,
    )
}

pub fn build_initial_idea_prompt(
    profile: &PersonaProfile,
    user_profile: &str,
    message: &str,
    conversation: &str,
) -> String {
    let conversation = if conversation.trim().is_empty() {
        "(no earlier conversation)"
    } else {
        conversation
    };
    format!(
        "# Your role and persona\nYou are {name} ({id}).\n{persona}\n\n\
         # Profile of the user you support\n{user_profile}\n\n\
         # Recent conversation\n{conversation}\n\n\
         # The user's request\n\"{message}\"\n\n\
         # Your task\n\
         This is a brainstorming phase. Do not call any tools. Based on your persona and the \
         user's profile, produce two things:\n\
         1. for_oracle: a detailed report for the oracle describing your reasoning and concrete \
         suggestions as bullet points.\n\
         2. for_ui: a short, engaging summary (one to three sentences) in your own voice that \
         tells the user what you are thinking.\n\n\
         # Output format\nReply with only this JSON block and nothing else:\n\
         ```json\n{{\n  \"for_oracle\": \"...\",\n  \"for_ui\": \"...\"\n}}\n```",
        name = profile.display_name,
        id = profile.id,
        persona = profile.persona_text.trim(),
        user_profile = user_profile.trim(),
    )
}

/// One persona agent with its long-lived chat session.
pub struct PersonaAgent {
    profile: PersonaProfile,
    user_profile: Arc<str>,
    llm: Arc<dyn LlmClient>,
    model: String,
    session: Box<dyn ChatSession>,
}

impl PersonaAgent {
    pub fn new(
        profile: PersonaProfile,
        user_profile: Arc<str>,
        llm: Arc<dyn LlmClient>,
        model: &str,
    ) -> Self {
        let system = build_system_instruction(&profile, &user_profile);
        let session = llm.create_session(model, Some(&system));
        tracing::debug!(
            agent = %profile.id,
            model = model,
            grammar = GRAMMAR_VERSION,
            "persona agent ready"
        );
        Self {
            profile,
            user_profile,
            llm,
            model: model.to_string(),
            session,
        }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn user_profile(&self) -> &str {
        &self.user_profile
    }

    pub fn session_mut(&mut self) -> &mut dyn ChatSession {
        self.session.as_mut()
    }

    pub fn thinking_message(&self) -> String {
        format!("({} is thinking...)", self.profile.display_name)
    }

    /// Asks for a brainstorming opinion on a fresh session, leaving the main
    /// session untouched. Returns the raw reply.
    pub async fn initial_idea(&self, message: &str, conversation: &str) -> Result<String> {
        let prompt = build_initial_idea_prompt(&self.profile, &self.user_profile, message, conversation);
        let mut session = self.llm.create_session(&self.model, None);
        session.send(&prompt).await
    }
}
