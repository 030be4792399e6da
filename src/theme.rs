//! Terminal presentation for `ask` and `chat`: colors, banner, command palette,
//! and one-line rendering of streamed events.

use crate::streaming::{Event, EventStatus};

pub const RESET: &str = "\x1b[0m";
pub const DIM: &str = "\x1b[2m";
pub const CYAN: &str = "\x1b[36m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const MAGENTA: &str = "\x1b[35m";
pub const BOLD_CYAN: &str = "\x1b[1;36m";
pub const BOLD_GREEN: &str = "\x1b[1;32m";
pub const BOLD_RED: &str = "\x1b[1;31m";

/// All registered slash commands with descriptions.
pub const COMMAND_PALETTE: &[(&str, &str)] = &[
    ("help", "show command quick reference"),
    ("history", "show this session's conversation so far"),
    ("route", "show which workflow a message would take"),
    ("status", "show active profile/provider/model/session"),
    ("exit", "end interactive chat"),
];

pub fn build_prompt() -> String {
    format!("{BOLD_CYAN}oracle>{RESET} ")
}

pub fn print_startup_banner(provider: &str, model: &str, agents: &[&str]) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!(
        "  {BOLD_CYAN}oracle-calendar{RESET} {DIM}v{version}{RESET}  {DIM}·{RESET}  {GREEN}{provider}{RESET} {DIM}/{RESET} {GREEN}{model}{RESET}"
    );
    println!("  {DIM}personas:{RESET} {}", agents.join(", "));
    println!(
        "  {CYAN}/help{RESET} {DIM}commands{RESET}  {DIM}·{RESET}  {CYAN}/route{RESET} {DIM}preview routing{RESET}  {DIM}·{RESET}  {CYAN}/exit{RESET} {DIM}quit{RESET}"
    );
    println!("  {DIM}{}{RESET}", "━".repeat(68));
    println!();
}

/// Renders one streamed event for the terminal.
pub fn render_event(event: &Event) -> String {
    let speaker = &event.speaker;
    match event.status {
        EventStatus::Thinking => format!("{DIM}[{speaker}] {}{RESET}", event.message),
        EventStatus::ToolRunning => format!("{YELLOW}[{speaker}] {}{RESET}", event.message),
        EventStatus::AgentOpinion => format!("{MAGENTA}[{speaker}]{RESET} {}", event.message),
        EventStatus::FinalAnswer => format!("{BOLD_GREEN}[{speaker}]{RESET} {}", event.message),
        EventStatus::Error => format!("{BOLD_RED}[{speaker}]{RESET} {}", event.message),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzyResult {
    NoMatch,
    Exact(String),
    Ambiguous(Vec<String>),
}

/// Prefix match against the palette.
pub fn fuzzy_match_command(input: &str) -> FuzzyResult {
    let lower = input.trim_start_matches('/').to_ascii_lowercase();
    let matches: Vec<&str> = COMMAND_PALETTE
        .iter()
        .filter(|(name, _)| name.starts_with(&lower))
        .map(|(name, _)| *name)
        .collect();

    match matches.len() {
        0 => FuzzyResult::NoMatch,
        1 => FuzzyResult::Exact(matches[0].to_string()),
        _ => FuzzyResult::Ambiguous(matches.iter().map(|s| s.to_string()).collect()),
    }
}

pub fn suggest_command(input: &str) -> Option<String> {
    match fuzzy_match_command(input) {
        FuzzyResult::Exact(cmd) => Some(format!("Did you mean {CYAN}/{cmd}{RESET}?")),
        FuzzyResult::Ambiguous(cmds) => {
            let list = cmds
                .iter()
                .map(|c| format!("{CYAN}/{c}{RESET}"))
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!("Did you mean one of: {list}?"))
        }
        FuzzyResult::NoMatch => None,
    }
}

pub fn format_command_palette() -> String {
    let mut out = String::from("Chat commands:\n");
    for (name, desc) in COMMAND_PALETTE {
        out.push_str(&format!("  {CYAN}/{name:<10}{RESET} {DIM}{desc}{RESET}\n"));
    }
    out
}
