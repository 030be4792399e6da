use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use futures_util::StreamExt;
use serde_json::json;
use tempfile::tempdir;

use crate::agents::oracle::{OPINION_FALLBACK_FOR_ORACLE, OPINION_FALLBACK_FOR_UI, ORACLE_FAILURE_MESSAGE};
use crate::agents::orchestrator::{INTERNAL_ERROR_MESSAGE, Orchestrator};
use crate::agents::react::NOT_CONVERGED_MESSAGE;
use crate::calendar::{CalendarBackend, InMemoryCalendar, NewEvent};
use crate::cli::*;
use crate::config::*;
use crate::llm::MockLlm;
use crate::runner::OrchestratorFactory;
use crate::server::*;
use crate::session::{SessionRegistry, spawn_turn};
use crate::streaming::*;
use crate::telemetry::*;
use crate::workflow::WorkflowRoute;

fn base_cfg() -> RuntimeConfig {
    RuntimeConfig {
        profile: "default".to_string(),
        config_path: ".oracle/config.toml".to_string(),
        provider: Provider::Mock,
        model: None,
        session_id: "test-session".to_string(),
        knowledge_dir: PathBuf::from("knowledge-missing-for-tests"),
        user_profile_file: "user_profile.txt".to_string(),
        oracle_persona_file: "oracle_persona.md".to_string(),
        personas: default_personas(),
        lead_agent: "ak".to_string(),
        max_iterations: DEFAULT_MAX_ITERATIONS,
        history_window: DEFAULT_HISTORY_WINDOW,
        parse_retries: 0,
        classifier: ClassifierMode::Keyword,
        timezone: chrono_tz::Asia::Tokyo,
        show_sensitive_config: false,
        telemetry_enabled: false,
        telemetry_path: ".oracle/test-telemetry.jsonl".to_string(),
        llm_timeout_secs: 5,
        max_prompt_chars: 8000,
        server_session_cache_max: 8,
    }
}

fn test_cli(config_path: &str, profile: &str) -> Cli {
    Cli {
        provider: Provider::Auto,
        model: None,
        profile: profile.to_string(),
        config_path: config_path.to_string(),
        session_id: None,
        knowledge_dir: None,
        lead_agent: None,
        max_iterations: None,
        history_window: None,
        parse_retries: None,
        classifier: None,
        timezone: None,
        show_sensitive_config: false,
        telemetry_enabled: None,
        telemetry_path: None,
        log_filter: "warn".to_string(),
        command: Commands::Doctor,
    }
}

fn pinned_calendar() -> Arc<InMemoryCalendar> {
    Arc::new(
        InMemoryCalendar::new(chrono_tz::Asia::Tokyo)
            .with_fixed_now("2025-04-01T09:00:00")
            .expect("fixed clock should parse"),
    )
}

fn factory_with(
    cfg: &RuntimeConfig,
    llm: &MockLlm,
    calendar: Arc<InMemoryCalendar>,
    telemetry: TelemetrySink,
) -> OrchestratorFactory {
    OrchestratorFactory::new(cfg, Arc::new(llm.clone()), "mock-model", calendar, telemetry)
}

fn orchestrator_with(cfg: &RuntimeConfig, llm: &MockLlm, calendar: Arc<InMemoryCalendar>) -> Orchestrator {
    factory_with(cfg, llm, calendar, TelemetrySink::disabled())
        .build(&cfg.session_id)
        .expect("orchestrator should build")
}

async fn run_turn(orchestrator: &mut Orchestrator, message: &str) -> (Vec<Event>, Option<Event>) {
    let (sink, stream) = event_channel();
    let (terminal, events) = tokio::join!(
        orchestrator.handle(message, sink),
        stream.collect::<Vec<Event>>()
    );
    (events, terminal)
}

fn statuses(events: &[Event]) -> Vec<EventStatus> {
    events.iter().map(|event| event.status).collect()
}

fn terminal_count(events: &[Event]) -> usize {
    events.iter().filter(|event| event.is_terminal()).count()
}

async fn add(calendar: &InMemoryCalendar, summary: &str, start: &str, end: &str) -> String {
    calendar
        .add_event(NewEvent {
            summary: summary.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            is_all_day: false,
            description: None,
            location: None,
        })
        .await
        .expect("event should be added")
        .event_id
        .expect("added event should carry an id")
}

fn opinion_reply(for_oracle: &str, for_ui: &str) -> String {
    format!(
        "```json\n{}\n```",
        json!({ "for_oracle": for_oracle, "for_ui": for_ui })
    )
}

#[tokio::test]
async fn todays_schedule_question_reads_calendar_without_model() {
    let calendar = pinned_calendar();
    add(&calendar, "Standup", "2025-04-01T10:00:00", "2025-04-01T10:30:00").await;
    add(&calendar, "Dentist", "2025-04-02T10:00:00", "2025-04-02T11:00:00").await;
    let llm = MockLlm::new();
    let mut orchestrator = orchestrator_with(&base_cfg(), &llm, calendar);

    let (events, terminal) = run_turn(&mut orchestrator, "今日の予定は？").await;

    assert_eq!(
        statuses(&events),
        vec![EventStatus::ToolRunning, EventStatus::FinalAnswer]
    );
    assert!(events.iter().all(|event| event.speaker == ORCHESTRATOR_SPEAKER));
    assert_eq!(
        events[0].log.as_deref(),
        Some("list_calendar_events 2025-04-01T00:00:00..2025-04-01T23:59:59")
    );
    let answer = terminal.expect("turn should produce a terminal event");
    assert!(answer.message.contains("- 10:00-10:30 Standup"));
    assert!(!answer.message.contains("Dentist"));
    assert!(llm.prompts().is_empty(), "listing must not call the model");
    assert_eq!(orchestrator.history().len(), 2);
}

#[tokio::test]
async fn tomorrow_listing_shifts_the_day_window() {
    let calendar = pinned_calendar();
    add(&calendar, "Dentist", "2025-04-02T10:00:00", "2025-04-02T11:00:00").await;
    let mut orchestrator = orchestrator_with(&base_cfg(), &MockLlm::new(), calendar);

    let (events, terminal) = run_turn(&mut orchestrator, "What is on my schedule tomorrow?").await;

    assert_eq!(
        events[0].log.as_deref(),
        Some("list_calendar_events 2025-04-02T00:00:00..2025-04-02T23:59:59")
    );
    let answer = terminal.expect("terminal");
    assert!(answer.message.contains("tomorrow (2025-04-02)"));
    assert!(answer.message.contains("- 10:00-11:00 Dentist"));
}

#[tokio::test]
async fn add_request_runs_tool_then_answers() {
    let calendar = pinned_calendar();
    let llm = MockLlm::with_replies([
        "Thought: I should add the appointment.\nAction: add_calendar_event\nAction Input: {\"summary\": \"Dentist\", \"start_time\": \"2025-04-02T10:00:00\", \"end_time\": \"2025-04-02T11:00:00\"}",
        "Thought: It is on the calendar.\nAction: FinalAnswer\nAction Input: I added the dentist for tomorrow at 10:00.",
    ]);
    let mut orchestrator = orchestrator_with(&base_cfg(), &llm, calendar.clone());

    let (events, terminal) = run_turn(&mut orchestrator, "明日10時に歯医者の予定を追加して").await;

    assert_eq!(
        statuses(&events),
        vec![
            EventStatus::Thinking,
            EventStatus::ToolRunning,
            EventStatus::Thinking,
            EventStatus::FinalAnswer,
        ]
    );
    assert!(events.iter().all(|event| event.speaker == "ak"));
    assert_eq!(
        terminal.map(|event| event.message),
        Some("I added the dentist for tomorrow at 10:00.".to_string())
    );
    assert_eq!(calendar.len(), 1);

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0].session, prompts[1].session, "lead agent keeps one session");
    assert!(prompts[1].prompt.contains("[Tool result]"));
    assert!(prompts[1].prompt.contains("evt-1"));
    assert!(
        prompts[0]
            .system_instruction
            .as_deref()
            .is_some_and(|system| system.contains("add_calendar_event"))
    );
}

#[tokio::test]
async fn react_loop_stops_at_iteration_cap_with_one_terminal() {
    let mut cfg = base_cfg();
    cfg.max_iterations = 2;
    let tool_reply = "Thought: check the time\nAction: get_current_datetime\nAction Input: {}";
    let llm = MockLlm::new().with_responder(move |_| tool_reply.to_string());
    let mut orchestrator = orchestrator_with(&cfg, &llm, pinned_calendar());

    let (events, terminal) = run_turn(&mut orchestrator, "Move my 3pm meeting").await;

    let thinking = events
        .iter()
        .filter(|event| event.status == EventStatus::Thinking)
        .count();
    assert_eq!(thinking, 2);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(
        terminal.map(|event| event.message),
        Some(NOT_CONVERGED_MESSAGE.to_string())
    );
    assert_eq!(llm.prompts().len(), 2);
}

#[tokio::test]
async fn reply_without_action_ends_politely() {
    let llm = MockLlm::with_replies(["I am not sure what to do here."]);
    let mut orchestrator = orchestrator_with(&base_cfg(), &llm, pinned_calendar());

    let (events, terminal) = run_turn(&mut orchestrator, "Cancel the dentist").await;

    assert_eq!(terminal_count(&events), 1);
    let answer = terminal.expect("terminal");
    assert_eq!(answer.status, EventStatus::FinalAnswer);
    assert!(answer.message.starts_with("Sorry, I seem to be a little confused. Error:"));
}

#[tokio::test]
async fn discussion_survives_one_failed_opinion() {
    let llm = MockLlm::new();
    llm.push_failure("quota exceeded");
    llm.push_reply(opinion_reply("- hike on Saturday\n- rest on Sunday", "Let's go hiking!"));
    llm.push_reply("A gentle hike on Saturday and a quiet Sunday would suit you well.");
    let mut orchestrator = orchestrator_with(&base_cfg(), &llm, pinned_calendar());

    let (events, terminal) = run_turn(&mut orchestrator, "週末の過ごし方を提案して").await;

    assert_eq!(
        statuses(&events),
        vec![
            EventStatus::Thinking,
            EventStatus::AgentOpinion,
            EventStatus::AgentOpinion,
            EventStatus::Thinking,
            EventStatus::FinalAnswer,
        ]
    );
    assert_eq!(events[0].speaker, ORCHESTRATOR_SPEAKER);
    assert_eq!(events[1].speaker, "ak");
    assert_eq!(events[1].message, OPINION_FALLBACK_FOR_UI);
    assert_eq!(events[2].speaker, "ae");
    assert_eq!(events[2].message, "Let's go hiking!");
    assert_eq!(events[3].speaker, ORACLE_SPEAKER);

    let answer = terminal.expect("terminal");
    assert_eq!(answer.speaker, ORACLE_SPEAKER);
    assert!(answer.message.starts_with("A gentle hike"));

    let synthesis_prompt = llm.prompts().last().map(|p| p.prompt.clone()).unwrap_or_default();
    assert!(synthesis_prompt.contains(OPINION_FALLBACK_FOR_ORACLE));
    assert!(synthesis_prompt.contains("- hike on Saturday"));
    assert!(synthesis_prompt.contains("Current date and time: 2025-04-01"));
}

#[tokio::test]
async fn discussion_with_failed_synthesis_still_ends_once() {
    let llm = MockLlm::new();
    llm.push_reply(opinion_reply("a", "b"));
    llm.push_reply(opinion_reply("c", "d"));
    llm.push_failure("timeout");
    let mut orchestrator = orchestrator_with(&base_cfg(), &llm, pinned_calendar());

    let (events, terminal) = run_turn(&mut orchestrator, "What do you think about my week?").await;

    assert_eq!(terminal_count(&events), 1);
    let answer = terminal.expect("terminal");
    assert_eq!(answer.status, EventStatus::FinalAnswer);
    assert_eq!(answer.message, ORACLE_FAILURE_MESSAGE);
}

#[tokio::test]
async fn later_turns_see_earlier_conversation() {
    let llm = MockLlm::with_replies([
        "Thought: easy\nAction: FinalAnswer\nAction Input: You're welcome.",
    ]);
    let mut orchestrator = orchestrator_with(&base_cfg(), &llm, pinned_calendar());

    run_turn(&mut orchestrator, "今日の予定は？").await;
    run_turn(&mut orchestrator, "Thanks a lot").await;

    let prompt = llm.prompts()[0].prompt.clone();
    assert!(prompt.contains("# Recent conversation"));
    assert!(prompt.contains("user: 今日の予定は？"));
    assert!(prompt.contains("orchestrator: You have no events today"));
    assert!(!prompt.contains("user: Thanks a lot\n"), "current message is not part of history");
    assert_eq!(orchestrator.history().len(), 4);
}

#[tokio::test]
async fn llm_classifier_reply_selects_the_flow() {
    let mut cfg = base_cfg();
    cfg.classifier = ClassifierMode::Llm;
    let llm = MockLlm::with_replies(["simple_listing"]);
    let mut orchestrator = orchestrator_with(&cfg, &llm, pinned_calendar());

    let (events, _) = run_turn(&mut orchestrator, "anything going on?").await;
    assert_eq!(
        statuses(&events),
        vec![EventStatus::ToolRunning, EventStatus::FinalAnswer]
    );

    llm.push_reply("simple_listing or single_agent_react");
    assert_eq!(
        orchestrator.classify("anything going on?").await,
        WorkflowRoute::SingleAgentReact
    );
}

#[tokio::test]
async fn panicking_flow_is_reported_as_error_event() {
    let llm = MockLlm::new().with_responder(|_| panic!("responder exploded"));
    let mut orchestrator = orchestrator_with(&base_cfg(), &llm, pinned_calendar());

    let (events, terminal) = run_turn(&mut orchestrator, "Add lunch at noon").await;

    assert_eq!(terminal_count(&events), 1);
    let event = terminal.expect("terminal");
    assert_eq!(event.status, EventStatus::Error);
    assert_eq!(event.message, INTERNAL_ERROR_MESSAGE);
    assert_eq!(event.log.as_deref(), Some("responder exploded"));
    assert_eq!(orchestrator.history().len(), 2);
}

#[tokio::test]
async fn custom_persona_file_reaches_system_instruction() {
    let dir = tempdir().expect("temp directory should create");
    std::fs::write(dir.path().join("ak_persona.md"), "I am a very strict timekeeper.")
        .expect("persona file should write");
    std::fs::write(dir.path().join("user_profile.txt"), "Prefers mornings.")
        .expect("profile file should write");
    let mut cfg = base_cfg();
    cfg.knowledge_dir = dir.path().to_path_buf();
    let llm = MockLlm::with_replies(["Thought: ok\nAction: FinalAnswer\nAction Input: Done."]);
    let mut orchestrator = orchestrator_with(&cfg, &llm, pinned_calendar());

    run_turn(&mut orchestrator, "Remove the gym session").await;

    let prompt = &llm.prompts()[0];
    let system = prompt.system_instruction.as_deref().unwrap_or_default();
    assert!(system.contains("I am a very strict timekeeper."));
    assert!(system.contains("Prefers mornings."));
    assert!(prompt.prompt.contains("Prefers mornings."));
}

#[tokio::test]
async fn registry_evicts_least_recently_used_session() {
    let cfg = base_cfg();
    let factory = Arc::new(factory_with(
        &cfg,
        &MockLlm::new(),
        pinned_calendar(),
        TelemetrySink::disabled(),
    ));
    let registry = SessionRegistry::new(factory, 2);

    let (_, first) = registry.get_or_create("a").await.expect("session a");
    assert_eq!(first, "miss");
    registry.get_or_create("b").await.expect("session b");
    let (_, again) = registry.get_or_create("a").await.expect("session a again");
    assert_eq!(again, "hit");
    registry.get_or_create("c").await.expect("session c");

    assert_eq!(registry.len().await, 2);
    assert!(registry.contains("a").await);
    assert!(!registry.contains("b").await);
    assert!(registry.contains("c").await);
    assert!(registry.get_or_create("  ").await.is_err());
}

#[tokio::test]
async fn sessions_keep_separate_histories() {
    let cfg = base_cfg();
    let factory = Arc::new(factory_with(
        &cfg,
        &MockLlm::new(),
        pinned_calendar(),
        TelemetrySink::disabled(),
    ));
    let registry = SessionRegistry::new(factory, 4);

    let (alice, _) = registry.get_or_create("alice").await.expect("alice");
    let events = spawn_turn(alice.clone(), "今日の予定は？".to_string())
        .collect::<Vec<_>>()
        .await;
    assert_eq!(events.last().map(|e| e.status), Some(EventStatus::FinalAnswer));

    let (bob, _) = registry.get_or_create("bob").await.expect("bob");
    assert_eq!(alice.lock().await.history().len(), 2);
    assert!(bob.lock().await.history().is_empty());
}

fn server_state(auth_token: Option<&str>) -> (ServerState, Arc<InMemoryCalendar>) {
    let cfg = base_cfg();
    let calendar = pinned_calendar();
    let factory = factory_with(&cfg, &MockLlm::new(), calendar.clone(), TelemetrySink::disabled());
    let state = ServerState {
        cfg: cfg.clone(),
        registry: Arc::new(SessionRegistry::new(Arc::new(factory), 4)),
        telemetry: TelemetrySink::disabled(),
        provider_label: "mock".to_string(),
        model_name: "mock-model".to_string(),
        auth_token: auth_token.map(str::to_string),
    };
    (state, calendar)
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value should build"),
    );
    headers
}

#[tokio::test]
async fn chat_endpoint_checks_auth_and_message() {
    let (state, _) = server_state(Some("secret"));

    let unauthorized = start_chat_turn(
        &state,
        &HeaderMap::new(),
        ChatRequest {
            message: "今日の予定は？".to_string(),
            session_id: None,
        },
    )
    .await
    .expect_err("missing token should be rejected");
    assert_eq!(unauthorized.0, StatusCode::UNAUTHORIZED);

    let empty = start_chat_turn(
        &state,
        &bearer("secret"),
        ChatRequest {
            message: "   ".to_string(),
            session_id: None,
        },
    )
    .await
    .expect_err("empty message should be rejected");
    assert_eq!(empty.0, StatusCode::BAD_REQUEST);

    let events = start_chat_turn(
        &state,
        &bearer("secret"),
        ChatRequest {
            message: "今日の予定は？".to_string(),
            session_id: Some("web-1".to_string()),
        },
    )
    .await
    .expect("authorized chat should start")
    .collect::<Vec<_>>()
    .await;
    assert_eq!(
        statuses(&events),
        vec![EventStatus::ToolRunning, EventStatus::FinalAnswer]
    );
    assert!(state.registry.contains("web-1").await);
}

#[tokio::test]
async fn chat_endpoint_enforces_prompt_limit() {
    let (mut state, _) = server_state(None);
    state.cfg.max_prompt_chars = 5;

    let err = start_chat_turn(
        &state,
        &HeaderMap::new(),
        ChatRequest {
            message: "this is far too long".to_string(),
            session_id: None,
        },
    )
    .await
    .expect_err("long message should be rejected");
    assert_eq!(err.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_endpoint_removes_event_or_reports_not_found() {
    let (state, calendar) = server_state(None);
    let event_id = add(&calendar, "Lunch", "2025-04-01T12:00:00", "2025-04-01T13:00:00").await;
    let state = Arc::new(state);

    let missing = handle_delete_event(
        State(state.clone()),
        HeaderMap::new(),
        Json(DeleteEventRequest {
            event_id: "evt-404".to_string(),
        }),
    )
    .await
    .expect_err("unknown id should fail");
    assert_eq!(missing.0, StatusCode::NOT_FOUND);

    let Json(result) = handle_delete_event(
        State(state),
        HeaderMap::new(),
        Json(DeleteEventRequest { event_id }),
    )
    .await
    .expect("existing event should delete");
    assert_eq!(result.status, "success");
    assert!(calendar.is_empty());
}

#[tokio::test]
async fn health_reports_profile_and_model() {
    let (state, _) = server_state(None);
    let Json(health) = handle_server_health(State(Arc::new(state))).await;
    assert_eq!(health.status, "ok");
    assert_eq!(health.provider, "mock");
    assert_eq!(health.model, "mock-model");
}

#[test]
fn default_profile_resolves_builtin_defaults() {
    let cli = test_cli(".oracle/missing.toml", "default");
    let cfg = resolve_runtime_config(&cli, &ProfilesFile::default())
        .expect("runtime config should resolve");

    assert_eq!(cfg.provider, Provider::Auto);
    assert_eq!(cfg.session_id, "default-session");
    assert_eq!(cfg.lead_agent, "ak");
    assert_eq!(cfg.max_iterations, DEFAULT_MAX_ITERATIONS);
    assert_eq!(cfg.history_window, DEFAULT_HISTORY_WINDOW);
    assert_eq!(cfg.parse_retries, 0);
    assert_eq!(cfg.classifier, ClassifierMode::Keyword);
    assert_eq!(cfg.timezone, chrono_tz::Asia::Tokyo);
    assert_eq!(
        cfg.personas.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
        vec!["ak", "ae"]
    );
}

#[test]
fn profile_file_values_apply_and_cli_overrides_them() {
    let dir = tempdir().expect("temp directory should create");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[profiles.work]
provider = "mock"
lead_agent = "ae"
timezone = "Europe/Berlin"
max_iterations = 8
history_window = 4

[[profiles.work.personas]]
id = "ak"
display_name = "Ark"
persona_file = "ak.md"

[[profiles.work.personas]]
id = "ae"
display_name = "El"
"#,
    )
    .expect("config should write");

    let config_path = path.to_string_lossy().to_string();
    let profiles = load_profiles(&config_path).expect("profiles should load");
    let mut cli = test_cli(&config_path, "work");
    cli.max_iterations = Some(0);

    let cfg = resolve_runtime_config(&cli, &profiles).expect("runtime config should resolve");
    assert_eq!(cfg.provider, Provider::Mock);
    assert_eq!(cfg.lead_agent, "ae");
    assert_eq!(cfg.timezone, chrono_tz::Europe::Berlin);
    assert_eq!(cfg.max_iterations, 1, "zero iterations clamps to one");
    assert_eq!(cfg.history_window, 4);
    assert_eq!(cfg.personas[0].persona_file.as_deref(), Some("ak.md"));
    assert_eq!(cfg.personas[1].persona_file, None);
}

#[test]
fn unknown_profile_lists_available_names() {
    let profiles = parse_profiles("[profiles.work]\nprovider = \"mock\"\n").expect("profiles parse");
    let err = resolve_runtime_config(&test_cli("cfg.toml", "home"), &profiles)
        .expect_err("missing profile should fail");
    assert!(err.to_string().contains("Available profiles: work"));
}

#[test]
fn profile_rejects_unknown_fields_and_bad_values() {
    assert!(parse_profiles("[profiles.work]\nturbo = true\n").is_err());

    let profiles = parse_profiles("[profiles.work]\ntimezone = \"Mars/Olympus\"\n").expect("parse");
    assert!(resolve_runtime_config(&test_cli("cfg.toml", "work"), &profiles).is_err());

    let profiles = parse_profiles("[profiles.work]\nlead_agent = \"zz\"\n").expect("parse");
    let err = resolve_runtime_config(&test_cli("cfg.toml", "work"), &profiles)
        .expect_err("unknown lead agent should fail");
    assert!(err.to_string().contains("lead agent 'zz'"));
}

#[test]
fn persona_roster_validation() {
    let persona = |id: &str| PersonaConfig {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        persona_file: None,
        fallback_persona: None,
    };
    assert!(validate_personas(&[persona("ak"), persona("ak")], "ak").is_err());
    assert!(validate_personas(&[persona("oracle")], "oracle").is_err());
    assert!(validate_personas(&[], "ak").is_err());
    assert!(validate_personas(&[persona("ak"), persona("ae")], "ae").is_ok());
}

#[test]
fn telemetry_summary_groups_turns_by_route_and_tools_by_name() {
    let lines = vec![
        json!({"ts_unix_ms": 1000, "event": "turn.started", "run_id": "run-a", "session_id": "s1"}).to_string(),
        json!({"ts_unix_ms": 1100, "event": "route.selected", "run_id": "run-a", "session_id": "s1", "route": "single_agent_react"}).to_string(),
        json!({"ts_unix_ms": 1200, "event": "tool.requested", "run_id": "run-a", "session_id": "s1", "tool": "add_calendar_event"}).to_string(),
        json!({"ts_unix_ms": 1300, "event": "tool.failed", "run_id": "run-a", "session_id": "s1", "tool": "add_calendar_event"}).to_string(),
        json!({"ts_unix_ms": 1400, "event": "llm.failed", "run_id": "run-a", "session_id": "s1", "phase": "react"}).to_string(),
        json!({"ts_unix_ms": 1500, "event": "turn.completed", "run_id": "run-a", "session_id": "s1", "route": "single_agent_react", "elapsed_ms": 400}).to_string(),
        json!({"ts_unix_ms": 1600, "event": "route.selected", "run_id": "run-b", "session_id": "s2", "route": "simple_listing"}).to_string(),
        json!({"ts_unix_ms": 1700, "event": "turn.failed", "run_id": "run-b", "session_id": "s2", "route": "simple_listing", "elapsed_ms": 20}).to_string(),
        "not json".to_string(),
    ];

    let summary = summarize_telemetry_lines(lines, 100);
    assert_eq!(summary.total_lines, 9);
    assert_eq!(summary.parsed_events, 8);
    assert_eq!(summary.parse_errors, 1);
    assert_eq!(summary.turns_started, 1);
    assert_eq!(summary.turns_completed(), 1);
    assert_eq!(summary.turns_failed(), 1);

    let react = &summary.routes["single_agent_react"];
    assert_eq!((react.selected, react.completed, react.failed), (1, 1, 0));
    assert_eq!(react.mean_elapsed_ms(), Some(400));
    assert_eq!(summary.routes["simple_listing"].failed, 1);

    assert_eq!(
        summary.tools["add_calendar_event"],
        ToolOutcomes {
            requested: 1,
            succeeded: 0,
            failed: 1
        }
    );
    assert_eq!(summary.llm_failures.get("react"), Some(&1));
    assert_eq!(summary.sessions.len(), 2);
    assert_eq!(summary.runs.len(), 2);
    assert_eq!(summary.last_event_ts_unix_ms, Some(1700));

    let report = format_telemetry_report(std::path::Path::new("events.jsonl"), &summary);
    assert!(report.contains("Turns: started=1 completed=1 failed=1"));
    assert!(report.contains("add_calendar_event"));
    assert!(report.contains("Model failures: react=1"));
}

#[test]
fn telemetry_summary_only_reads_the_most_recent_lines() {
    let lines = vec![
        json!({"event": "turn.started", "run_id": "old"}).to_string(),
        json!({"event": "turn.started", "run_id": "new"}).to_string(),
    ];
    let summary = summarize_telemetry_lines(lines, 1);
    assert_eq!(summary.parsed_events, 1);
    assert!(summary.runs.contains("new"));
    assert!(!summary.runs.contains("old"));
}

#[tokio::test]
async fn turns_write_telemetry_jsonl() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg();
    cfg.telemetry_enabled = true;
    cfg.telemetry_path = dir
        .path()
        .join("events.jsonl")
        .to_string_lossy()
        .to_string();
    let telemetry = TelemetrySink::new(&cfg, "ask".to_string());
    let mut orchestrator = factory_with(&cfg, &MockLlm::new(), pinned_calendar(), telemetry)
        .build("tele-session")
        .expect("orchestrator should build");

    run_turn(&mut orchestrator, "今日の予定は？").await;

    let content = std::fs::read_to_string(&cfg.telemetry_path).expect("telemetry file should exist");
    let summary = summarize_telemetry_lines(content.lines().map(str::to_string).collect(), 100);
    assert_eq!(summary.parse_errors, 0);
    assert_eq!(summary.turns_started, 1);
    assert_eq!(summary.turns_completed(), 1);
    assert_eq!(summary.routes["simple_listing"].selected, 1);
    assert_eq!(summary.routes["simple_listing"].completed, 1);
    assert_eq!(summary.tools["list_calendar_events"].requested, 1);
    assert_eq!(summary.tools["list_calendar_events"].succeeded, 1);
    assert!(summary.sessions.contains("tele-session"));
}
