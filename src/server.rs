use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::calendar::MutationResult;
use crate::config::RuntimeConfig;
use crate::guardrail::enforce_prompt_limit;
use crate::provider::provider_label;
use crate::runner::{OrchestratorFactory, build_calendar};
use crate::session::{SessionRegistry, spawn_turn};
use crate::streaming::EventStream;
use crate::telemetry::TelemetrySink;

#[derive(Clone)]
pub struct ServerState {
    pub cfg: RuntimeConfig,
    pub registry: Arc<SessionRegistry>,
    pub telemetry: TelemetrySink,
    pub provider_label: String,
    pub model_name: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServerHealthResponse {
    pub status: &'static str,
    pub app_name: &'static str,
    pub profile: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteEventRequest {
    #[serde(alias = "eventId")]
    pub event_id: String,
}

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn check_server_auth(
    state: &ServerState,
    headers: &axum::http::HeaderMap,
) -> Result<(), ApiError> {
    let Some(expected_token) = state.auth_token.as_deref() else {
        return Ok(());
    };

    let header_value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let provided_token = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();

    if provided_token.is_empty() || provided_token != expected_token {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "missing or invalid Authorization bearer token",
        ));
    }

    Ok(())
}

pub async fn handle_server_health(
    State(state): State<Arc<ServerState>>,
) -> Json<ServerHealthResponse> {
    Json(ServerHealthResponse {
        status: "ok",
        app_name: "oracle-calendar",
        profile: state.cfg.profile.clone(),
        provider: state.provider_label.clone(),
        model: state.model_name.clone(),
    })
}

/// Validates a chat request and starts its turn on the session's orchestrator.
pub async fn start_chat_turn(
    state: &ServerState,
    headers: &axum::http::HeaderMap,
    request: ChatRequest,
) -> std::result::Result<EventStream, ApiError> {
    check_server_auth(state, headers)?;

    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "message cannot be empty for /api/chat",
        ));
    }
    enforce_prompt_limit(&message, state.cfg.max_prompt_chars)
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, err.to_string()))?;

    let session_id = request
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| state.cfg.session_id.clone());

    let (orchestrator, cache_status) = state
        .registry
        .get_or_create(&session_id)
        .await
        .map_err(|err| api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    tracing::info!(session_id = %session_id, cache = cache_status, "chat turn accepted");

    Ok(spawn_turn(orchestrator, message))
}

pub async fn handle_chat(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ApiError> {
    let events = start_chat_turn(&state, &headers, request).await?;
    let stream = events.map(|event| SseEvent::default().json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub async fn handle_delete_event(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<DeleteEventRequest>,
) -> ApiResult<MutationResult> {
    check_server_auth(&state, &headers)?;
    let event_id = request.event_id.trim();
    if event_id.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "event_id is required"));
    }

    let calendar = state.registry.factory().calendar().clone();
    match calendar.delete_event(event_id).await {
        Ok(result) => {
            state
                .telemetry
                .emit("calendar.event.deleted", json!({ "event_id": event_id }));
            Ok(Json(result))
        }
        Err(err) => Err(api_error(StatusCode::NOT_FOUND, format!("{err:#}"))),
    }
}

pub fn build_server_router(state: Arc<ServerState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(handle_server_health))
        .route("/api/chat", post(handle_chat))
        .route("/api/events/delete", post(handle_delete_event))
        .with_state(state)
}

pub fn build_server_state(
    cfg: &RuntimeConfig,
    llm: Arc<dyn crate::llm::LlmClient>,
    provider: crate::cli::Provider,
    model_name: &str,
    telemetry: &TelemetrySink,
) -> ServerState {
    let factory = OrchestratorFactory::new(
        cfg,
        llm,
        model_name,
        build_calendar(cfg),
        telemetry.clone(),
    );
    ServerState {
        cfg: cfg.clone(),
        registry: Arc::new(SessionRegistry::new(
            Arc::new(factory),
            cfg.server_session_cache_max,
        )),
        telemetry: telemetry.clone(),
        provider_label: provider_label(provider).to_string(),
        model_name: model_name.to_string(),
        auth_token: std::env::var("ORACLE_SERVER_AUTH_TOKEN")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
    }
}

pub async fn run_server(
    cfg: RuntimeConfig,
    host: String,
    port: u16,
    telemetry: &TelemetrySink,
) -> Result<()> {
    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server bind address '{}:{}'", host, port))?;
    let (llm, provider, model_name) = crate::provider::resolve_llm(&cfg)?;
    let state = Arc::new(build_server_state(&cfg, llm, provider, &model_name, telemetry));

    telemetry.emit(
        "server.started",
        json!({
            "host": host,
            "port": port,
            "profile": cfg.profile,
            "provider": state.provider_label.clone(),
            "model": model_name,
            "auth": state.auth_token.is_some(),
        }),
    );

    println!(
        "Server mode listening on http://{} (health: /healthz, chat: /api/chat, delete: /api/events/delete)",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server listener")?;
    axum::serve(listener, build_server_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed")
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { println!("\nReceived Ctrl+C, shutting down gracefully..."); }
        _ = terminate => { println!("\nReceived SIGTERM, shutting down gracefully..."); }
    }
}
