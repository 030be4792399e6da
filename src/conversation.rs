use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub speaker: String,
    pub text: String,
}

/// Append-only record of one session's exchanges.
#[derive(Debug, Default, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: &str) {
        self.turns.push(ConversationTurn {
            role: Role::User,
            speaker: "user".to_string(),
            text: text.to_string(),
        });
    }

    pub fn push_assistant(&mut self, speaker: &str, text: &str) {
        self.turns.push(ConversationTurn {
            role: Role::Assistant,
            speaker: speaker.to_string(),
            text: text.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn recent(&self, window: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }

    /// Renders the last `window` turns as `speaker: text` lines.
    pub fn render(&self, window: usize) -> String {
        self.recent(window)
            .iter()
            .map(|turn| format!("{}: {}", turn.speaker, turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
