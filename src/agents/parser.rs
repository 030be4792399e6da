//! Parser for the `Thought:` / `Action:` / `Action Input:` reply grammar.

use std::fmt;

use serde_json::{Map, Value};

/// Bumped whenever [`FORMAT_INSTRUCTIONS`] or the parse rules change.
pub const GRAMMAR_VERSION: u32 = 1;

pub const FINAL_ANSWER_ACTION: &str = "FinalAnswer";

pub const FORMAT_INSTRUCTIONS: &str = "\
Always answer in exactly this format:

Thought: <your reasoning about what to do next>
Action: <one tool name, or 'FinalAnswer'>
Action Input: <a JSON object of tool arguments, or your final reply to the user>

Rules:
- Call one tool per reply. Put its arguments in Action Input as a JSON object.
- When you can answer the user, use Action: FinalAnswer and write the reply after Action Input.
- The final reply may span several lines.";

const ACTION_PREFIX: &str = "Action:";
const ACTION_INPUT_PREFIX: &str = "Action Input:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    MissingAction,
    MissingJson,
    InvalidJson(String),
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::MissingAction => write!(f, "reply has no 'Action:' line"),
            ParseFailure::MissingJson => {
                write!(f, "tool call has no JSON object in 'Action Input:'")
            }
            ParseFailure::InvalidJson(detail) => {
                write!(f, "tool arguments are not a valid JSON object: {detail}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentDecision {
    FinalAnswer {
        text: String,
    },
    ToolCall {
        action: String,
        arguments: Map<String, Value>,
    },
    ParseError {
        raw_text: String,
        reason: ParseFailure,
    },
}

impl AgentDecision {
    pub fn is_final(&self) -> bool {
        matches!(self, AgentDecision::FinalAnswer { .. })
    }
}

/// Classifies one raw model reply. Never panics; malformed replies become
/// [`AgentDecision::ParseError`].
pub fn parse_agent_reply(raw: &str) -> AgentDecision {
    let mut action: Option<String> = None;
    let mut input = String::new();
    let mut capturing = false;

    // Directives only count at the start of a line; anything else while
    // capturing folds into the input, including `Thought:` lines.
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix(ACTION_INPUT_PREFIX) {
            capturing = true;
            input.clear();
            input.push_str(rest.trim());
        } else if let Some(rest) = line.strip_prefix(ACTION_PREFIX) {
            capturing = false;
            action = Some(clean_action_name(rest));
        } else if capturing {
            input.push('\n');
            input.push_str(line);
        }
    }

    let Some(action) = action.filter(|name| !name.is_empty()) else {
        return AgentDecision::ParseError {
            raw_text: raw.to_string(),
            reason: ParseFailure::MissingAction,
        };
    };

    if action == FINAL_ANSWER_ACTION {
        return AgentDecision::FinalAnswer {
            text: input.trim().to_string(),
        };
    }

    let (Some(open), Some(close)) = (input.find('{'), input.rfind('}')) else {
        return AgentDecision::ParseError {
            raw_text: raw.to_string(),
            reason: ParseFailure::MissingJson,
        };
    };
    if close < open {
        return AgentDecision::ParseError {
            raw_text: raw.to_string(),
            reason: ParseFailure::MissingJson,
        };
    }

    match serde_json::from_str::<Value>(&input[open..=close]) {
        Ok(Value::Object(arguments)) => AgentDecision::ToolCall { action, arguments },
        Ok(other) => AgentDecision::ParseError {
            raw_text: raw.to_string(),
            reason: ParseFailure::InvalidJson(format!("expected an object, found {other}")),
        },
        Err(err) => AgentDecision::ParseError {
            raw_text: raw.to_string(),
            reason: ParseFailure::InvalidJson(err.to_string()),
        },
    }
}

fn clean_action_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|ch: char| matches!(ch, '\'' | '"' | '`'))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_answer_keeps_multiline_text() {
        let raw = "Thought: I know the answer.\nAction: FinalAnswer\nAction Input: Here is your plan:\n- 10:00 gym\n- 12:00 lunch\n";
        assert_eq!(
            parse_agent_reply(raw),
            AgentDecision::FinalAnswer {
                text: "Here is your plan:\n- 10:00 gym\n- 12:00 lunch".to_string()
            }
        );
    }

    #[test]
    fn thought_and_indented_action_lines_fold_into_the_input() {
        let raw = "Thought: ok\nAction: FinalAnswer\nAction Input: Here is a note:\nThought: rest after lunch\n  Action: stretch at 15:00";
        assert_eq!(
            parse_agent_reply(raw),
            AgentDecision::FinalAnswer {
                text: "Here is a note:\nThought: rest after lunch\n  Action: stretch at 15:00"
                    .to_string()
            }
        );
    }

    #[test]
    fn final_answer_may_be_empty() {
        let raw = "Thought: nothing to add\nAction: FinalAnswer\nAction Input:";
        assert_eq!(
            parse_agent_reply(raw),
            AgentDecision::FinalAnswer {
                text: String::new()
            }
        );
    }

    #[test]
    fn tool_call_extracts_json_from_prose() {
        let raw = "Thought: I should add it.\nAction: add_calendar_event\nAction Input: sure, here you go {\"summary\": \"Dentist\", \"start_time\": \"2025-04-02T10:00:00\", \"end_time\": \"2025-04-02T11:00:00\"} thanks";
        match parse_agent_reply(raw) {
            AgentDecision::ToolCall { action, arguments } => {
                assert_eq!(action, "add_calendar_event");
                assert_eq!(arguments["summary"], "Dentist");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_json_may_span_lines() {
        let raw = "Thought: list\nAction: list_calendar_events\nAction Input: {\n  \"start_time\": \"2025-04-01\",\n  \"end_time\": \"2025-04-01\"\n}";
        match parse_agent_reply(raw) {
            AgentDecision::ToolCall { arguments, .. } => {
                assert_eq!(arguments["end_time"], "2025-04-01");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn quoted_action_names_are_cleaned() {
        let raw = "Thought: done\nAction: 'FinalAnswer'\nAction Input: ok";
        assert!(parse_agent_reply(raw).is_final());
        let raw = "Action: `get_current_datetime`\nAction Input: {}";
        assert!(matches!(
            parse_agent_reply(raw),
            AgentDecision::ToolCall { ref action, .. } if action == "get_current_datetime"
        ));
    }

    #[test]
    fn missing_action_is_a_parse_error() {
        let raw = "I think you are free all day!";
        assert_eq!(
            parse_agent_reply(raw),
            AgentDecision::ParseError {
                raw_text: raw.to_string(),
                reason: ParseFailure::MissingAction,
            }
        );
    }

    #[test]
    fn malformed_or_non_object_json_is_a_parse_error() {
        let raw = "Action: add_calendar_event\nAction Input: {\"summary\": \"Gym\",}";
        assert!(matches!(
            parse_agent_reply(raw),
            AgentDecision::ParseError {
                reason: ParseFailure::InvalidJson(_),
                ..
            }
        ));

        let raw = "Action: delete_calendar_event\nAction Input: evt-1";
        assert!(matches!(
            parse_agent_reply(raw),
            AgentDecision::ParseError {
                reason: ParseFailure::MissingJson,
                ..
            }
        ));

        let raw = "Action: delete_calendar_event\nAction Input: } oops {";
        assert!(matches!(
            parse_agent_reply(raw),
            AgentDecision::ParseError {
                reason: ParseFailure::MissingJson,
                ..
            }
        ));
    }

    #[test]
    fn later_action_input_replaces_earlier_buffer() {
        let raw = "Action: list_calendar_events\nAction Input: {\"start_time\": \"a\"}\nAction Input: {\"start_time\": \"b\", \"end_time\": \"c\"}";
        match parse_agent_reply(raw) {
            AgentDecision::ToolCall { arguments, .. } => assert_eq!(arguments["start_time"], "b"),
            other => panic!("expected tool call, got {other:?}"),
        }
    }
}
