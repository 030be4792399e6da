use std::io::{self, Write};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde_json::json;

use crate::agents::orchestrator::Orchestrator;
use crate::config::RuntimeConfig;
use crate::error::format_cli_error;
use crate::guardrail::enforce_prompt_limit;
use crate::provider::{provider_label, resolve_llm};
use crate::runner::{OrchestratorFactory, build_calendar};
use crate::streaming::{Event, event_channel};
use crate::telemetry::TelemetrySink;
use crate::theme::{
    DIM, RESET, build_prompt, format_command_palette, print_startup_banner, render_event,
    suggest_command,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Exit,
    Status,
    Help,
    History,
    Route(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChatCommand {
    NotACommand,
    Command(ChatCommand),
    MissingArgument { usage: &'static str },
    UnknownCommand(String),
}

pub fn parse_chat_command(input: &str) -> ParsedChatCommand {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("/exit") {
        return ParsedChatCommand::Command(ChatCommand::Exit);
    }

    if !trimmed.starts_with('/') {
        return ParsedChatCommand::NotACommand;
    }

    let slashless = trimmed.trim_start_matches('/');
    if slashless.is_empty() {
        return ParsedChatCommand::UnknownCommand("/".to_string());
    }

    let mut parts = slashless.splitn(2, char::is_whitespace);
    let command = parts
        .next()
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match command.as_str() {
        "exit" => ParsedChatCommand::Command(ChatCommand::Exit),
        "status" => ParsedChatCommand::Command(ChatCommand::Status),
        "help" => ParsedChatCommand::Command(ChatCommand::Help),
        "history" => ParsedChatCommand::Command(ChatCommand::History),
        "route" => {
            if arg.is_empty() {
                ParsedChatCommand::MissingArgument {
                    usage: "/route <message>",
                }
            } else {
                ParsedChatCommand::Command(ChatCommand::Route(arg.to_string()))
            }
        }
        other => ParsedChatCommand::UnknownCommand(format!("/{other}")),
    }
}

/// Runs one turn while printing each streamed event as it arrives.
pub async fn run_turn_to_stdout(orchestrator: &mut Orchestrator, message: &str) -> Option<Event> {
    let (sink, mut stream) = event_channel();
    let render = async {
        while let Some(event) = stream.next().await {
            println!("{}", render_event(&event));
        }
    };
    let (terminal, ()) = tokio::join!(orchestrator.handle(message, sink), render);
    terminal
}

pub enum ChatCommandAction {
    Continue,
    Exit,
}

pub struct ChatStatus<'a> {
    pub cfg: &'a RuntimeConfig,
    pub provider: &'a str,
    pub model: &'a str,
}

pub async fn dispatch_chat_command(
    command: ChatCommand,
    orchestrator: &Orchestrator,
    status: &ChatStatus<'_>,
) -> ChatCommandAction {
    match command {
        ChatCommand::Exit => return ChatCommandAction::Exit,
        ChatCommand::Help => print!("{}", format_command_palette()),
        ChatCommand::Status => {
            let settings = orchestrator.settings();
            println!(
                "Profile: {} | Provider: {} | Model: {} | Session: {}",
                status.cfg.profile, status.provider, status.model, status.cfg.session_id
            );
            println!(
                "Lead agent: {} | Personas: {} | Classifier: {:?} | Timezone: {}",
                orchestrator.lead_agent(),
                orchestrator.agent_ids().join(", "),
                status.cfg.classifier,
                status.cfg.timezone
            );
            println!(
                "Max iterations: {} | History window: {} | Parse retries: {} | Turns recorded: {}",
                settings.max_iterations,
                settings.history_window,
                settings.parse_retries,
                orchestrator.history().len()
            );
        }
        ChatCommand::History => {
            let history = orchestrator.history();
            if history.is_empty() {
                println!("No messages in this session yet.");
            }
            for turn in history.turns() {
                println!("{DIM}{}:{RESET} {}", turn.speaker, turn.text);
            }
        }
        ChatCommand::Route(message) => {
            let route = orchestrator.classify(&message).await;
            println!("Route: {}", route.label());
        }
    }
    ChatCommandAction::Continue
}

pub async fn run_chat(cfg: RuntimeConfig, telemetry: &TelemetrySink) -> Result<()> {
    let (llm, provider, model_name) = resolve_llm(&cfg)?;
    let factory = OrchestratorFactory::new(
        &cfg,
        llm,
        &model_name,
        build_calendar(&cfg),
        telemetry.clone(),
    );
    let mut orchestrator = factory.build(&cfg.session_id)?;
    let provider_name = provider_label(provider);

    telemetry.emit(
        "chat.started",
        json!({
            "provider": provider_name,
            "model": model_name.clone(),
            "profile": cfg.profile.clone(),
        }),
    );
    tracing::info!(provider = provider_name, model = %model_name, "Using model");
    print_startup_banner(provider_name, &model_name, &orchestrator.agent_ids());

    let status = ChatStatus {
        cfg: &cfg,
        provider: provider_name,
        model: &model_name,
    };
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("{}", build_prompt());
        io::stdout().flush().context("failed to flush stdout")?;
        line.clear();
        let read = stdin
            .read_line(&mut line)
            .context("failed to read input from stdin")?;
        if read == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match parse_chat_command(input) {
            ParsedChatCommand::NotACommand => {}
            ParsedChatCommand::MissingArgument { usage } => {
                println!("Usage: {usage}");
                continue;
            }
            ParsedChatCommand::UnknownCommand(command) => {
                match suggest_command(&command) {
                    Some(hint) => println!("Unknown command '{command}'. {hint}"),
                    None => println!("Unknown command '{command}'. Use /help."),
                }
                continue;
            }
            ParsedChatCommand::Command(command) => {
                let action = dispatch_chat_command(command, &orchestrator, &status).await;
                if matches!(action, ChatCommandAction::Exit) {
                    break;
                }
                continue;
            }
        }

        if let Err(err) = enforce_prompt_limit(input, cfg.max_prompt_chars) {
            eprintln!("{}", format_cli_error(&err, cfg.show_sensitive_config));
            continue;
        }
        run_turn_to_stdout(&mut orchestrator, input).await;
    }

    Ok(())
}
