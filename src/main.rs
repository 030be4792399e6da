use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use oracle_calendar::chat::{run_chat, run_turn_to_stdout};
use oracle_calendar::cli::{
    ClassifierMode, Cli, Commands, ProfileCommands, Provider, TelemetryCommands, command_label,
};
use oracle_calendar::config::{load_profiles, resolve_runtime_config};
use oracle_calendar::doctor::run_doctor;
use oracle_calendar::error::{categorize_error, format_cli_error, render_error_message};
use oracle_calendar::guardrail::enforce_prompt_limit;
use oracle_calendar::llm::{LlmClient, MockLlm};
use oracle_calendar::profiles::{run_profiles_list, run_profiles_show};
use oracle_calendar::provider::{default_model, resolve_llm};
use oracle_calendar::runner::{OrchestratorFactory, build_calendar};
use oracle_calendar::server::run_server;
use oracle_calendar::streaming::EventStatus;
use oracle_calendar::telemetry::{TelemetrySink, run_telemetry_report};
use oracle_calendar::workflow::WorkflowClassifier;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let show_sensitive_config = cli.show_sensitive_config;
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err, show_sensitive_config));
        tracing::error!(
            category = %categorize_error(&err).code(),
            error = %render_error_message(&err, show_sensitive_config),
            "command failed"
        );
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let command = command_label(&cli.command);
    let telemetry = TelemetrySink::new(&cfg, command);
    telemetry.emit("command.started", json!({ "profile": cfg.profile.clone() }));

    let result = match cli.command {
        Commands::Ask { message } => {
            let message = message.join(" ");
            enforce_prompt_limit(&message, cfg.max_prompt_chars)?;
            let (llm, provider, model_name) = resolve_llm(&cfg)?;
            tracing::info!(provider = ?provider, model = %model_name, "Using model");
            let factory = OrchestratorFactory::new(
                &cfg,
                llm,
                &model_name,
                build_calendar(&cfg),
                telemetry.clone(),
            );
            let mut orchestrator = factory.build(&cfg.session_id)?;
            match run_turn_to_stdout(&mut orchestrator, &message).await {
                Some(event) if event.status == EventStatus::Error => Err(anyhow::anyhow!(
                    "turn ended with an error: {}",
                    event.log.unwrap_or(event.message)
                )),
                Some(_) => Ok(()),
                None => Err(anyhow::anyhow!("turn ended without a final answer")),
            }
        }
        Commands::Chat => run_chat(cfg.clone(), &telemetry).await,
        Commands::Classify { message } => {
            let message = message.join(" ");
            let classifier = match cfg.classifier {
                // Keyword routing never calls the model.
                ClassifierMode::Keyword => {
                    let offline: Arc<dyn LlmClient> = Arc::new(MockLlm::offline());
                    WorkflowClassifier::new(cfg.classifier, offline, default_model(Provider::Mock))
                }
                ClassifierMode::Llm => {
                    let (llm, _, model_name) = resolve_llm(&cfg)?;
                    WorkflowClassifier::new(cfg.classifier, llm, &model_name)
                }
            };
            let route = classifier.classify(&message).await;
            telemetry.emit("route.selected", json!({ "route": route.label() }));
            println!("{}", route.label());
            Ok(())
        }
        Commands::Serve { host, port } => run_server(cfg.clone(), host, port, &telemetry).await,
        Commands::Doctor => run_doctor(&cfg),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => run_profiles_list(&profiles, &cfg),
            ProfileCommands::Show => run_profiles_show(&cfg),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => run_telemetry_report(&cfg, path, limit),
        },
    };

    match &result {
        Ok(()) => telemetry.emit("command.completed", json!({})),
        Err(err) => telemetry.emit(
            "command.failed",
            json!({
                "category": categorize_error(err).code(),
                "error": render_error_message(err, cfg.show_sensitive_config),
            }),
        ),
    }
    result
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_filter)
        .with_context(|| format!("invalid log filter '{log_filter}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
