use std::sync::Arc;

use serde::Serialize;

use crate::cli::ClassifierMode;
use crate::llm::LlmClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRoute {
    SimpleListing,
    SingleAgentReact,
    MultiAgentDiscussion,
}

impl WorkflowRoute {
    pub const ALL: [WorkflowRoute; 3] = [
        WorkflowRoute::SimpleListing,
        WorkflowRoute::SingleAgentReact,
        WorkflowRoute::MultiAgentDiscussion,
    ];

    pub fn label(self) -> &'static str {
        match self {
            WorkflowRoute::SimpleListing => "simple_listing",
            WorkflowRoute::SingleAgentReact => "single_agent_react",
            WorkflowRoute::MultiAgentDiscussion => "multi_agent_discussion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|route| route.label() == value)
    }
}

const DISCUSSION_KEYWORDS: [&str; 9] = [
    "提案",
    "アイデア",
    "どう思う",
    "考えて",
    "suggest",
    "idea",
    "what do you think",
    "brainstorm",
    "recommend",
];

const MUTATION_KEYWORDS: [&str; 14] = [
    "追加",
    "削除",
    "消して",
    "入れて",
    "変更",
    "キャンセル",
    "add ",
    "delete",
    "remove",
    "cancel",
    "reschedule",
    "move ",
    "book ",
    "schedule a ",
];

const SCHEDULE_NOUNS: [&str; 7] = [
    "予定",
    "スケジュール",
    "schedule",
    "agenda",
    "events",
    "calendar",
    "plans",
];

const TODAY_CUES: [&str; 3] = ["今日", "本日", "today"];
const TOMORROW_CUES: [&str; 2] = ["明日", "tomorrow"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Keyword routing. Checked in order: blank, discussion, mutation, listing.
pub fn classify_workflow_route(input: &str) -> WorkflowRoute {
    let lower = input.trim().to_lowercase();
    if lower.is_empty() {
        return WorkflowRoute::SingleAgentReact;
    }
    if contains_any(&lower, &DISCUSSION_KEYWORDS) {
        return WorkflowRoute::MultiAgentDiscussion;
    }
    if contains_any(&lower, &MUTATION_KEYWORDS) {
        return WorkflowRoute::SingleAgentReact;
    }
    if contains_any(&lower, &SCHEDULE_NOUNS) && detect_listing_day(&lower).is_some() {
        return WorkflowRoute::SimpleListing;
    }
    WorkflowRoute::SingleAgentReact
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingDay {
    Today,
    Tomorrow,
}

impl ListingDay {
    pub fn offset_days(self) -> i64 {
        match self {
            ListingDay::Today => 0,
            ListingDay::Tomorrow => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ListingDay::Today => "today",
            ListingDay::Tomorrow => "tomorrow",
        }
    }
}

pub fn detect_listing_day(input: &str) -> Option<ListingDay> {
    let lower = input.to_lowercase();
    if contains_any(&lower, &TODAY_CUES) {
        Some(ListingDay::Today)
    } else if contains_any(&lower, &TOMORROW_CUES) {
        Some(ListingDay::Tomorrow)
    } else {
        None
    }
}

pub fn build_route_prompt(message: &str) -> String {
    format!(
        "Classify the user's calendar request into exactly one workflow.\n\n\
         - simple_listing: the user only wants to see today's or tomorrow's schedule.\n\
         - single_agent_react: the user wants something done or looked up (add, delete, check \
         availability, answer a question).\n\
         - multi_agent_discussion: the user asks for ideas, suggestions, opinions, or a plan.\n\n\
         Reply with only one of: simple_listing, single_agent_react, multi_agent_discussion.\n\n\
         Request: \"{}\"",
        message.trim()
    )
}

/// Reads a route token out of a model reply. Zero or several distinct tokens
/// count as ambiguous.
pub fn route_from_reply(reply: &str) -> Option<WorkflowRoute> {
    let lower = reply.to_lowercase();
    let mut found = WorkflowRoute::ALL
        .into_iter()
        .filter(|route| lower.contains(route.label()));
    let first = found.next()?;
    if found.next().is_some() {
        return None;
    }
    Some(first)
}

pub struct WorkflowClassifier {
    mode: ClassifierMode,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl WorkflowClassifier {
    pub fn new(mode: ClassifierMode, llm: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            mode,
            llm,
            model: model.to_string(),
        }
    }

    pub async fn classify(&self, message: &str) -> WorkflowRoute {
        match self.mode {
            ClassifierMode::Keyword => classify_workflow_route(message),
            ClassifierMode::Llm => self.classify_with_llm(message).await,
        }
    }

    async fn classify_with_llm(&self, message: &str) -> WorkflowRoute {
        if message.trim().is_empty() {
            return WorkflowRoute::SingleAgentReact;
        }

        let mut session = self.llm.create_session(&self.model, None);
        match session.send(&build_route_prompt(message)).await {
            Ok(reply) => route_from_reply(&reply).unwrap_or_else(|| {
                tracing::debug!(reply = %reply.trim(), "ambiguous route reply, defaulting to single agent");
                WorkflowRoute::SingleAgentReact
            }),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "route classification call failed");
                WorkflowRoute::SingleAgentReact
            }
        }
    }
}
