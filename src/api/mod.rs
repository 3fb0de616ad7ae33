//! HTTP API — thin JSON routes over the session service and the
//! decision engine.
//!
//! The router owns the per-session flow graphs and a per-session submission
//! lock: one message submission for a session runs start to finish before
//! the next one begins. Distinct sessions never contend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, SessionError};
use crate::export::{ExportFormat, Exporter};
use crate::orchestration::Orchestrator;
use crate::orchestration::flow::ConversationFlow;
use crate::orchestration::stop;
use crate::session::model::{Message, SessionConfig, SessionStatus};
use crate::session::service::SessionService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: SessionService,
    pub orchestrator: Arc<Orchestrator>,
    pub exporter: Arc<Exporter>,
    /// Café rules text file served by the config endpoints.
    pub rules_path: Arc<PathBuf>,
    /// Caller-owned flow graphs, one per session.
    flows: Arc<Mutex<HashMap<String, ConversationFlow>>>,
    /// Per-session submission locks.
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppState {
    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Build the Axum router with all Café Virtuel routes.
pub fn cafe_routes(
    service: SessionService,
    orchestrator: Arc<Orchestrator>,
    exporter: Arc<Exporter>,
    rules_path: PathBuf,
) -> Router {
    let state = AppState {
        service,
        orchestrator,
        exporter,
        rules_path: Arc::new(rules_path),
        flows: Arc::new(Mutex::new(HashMap::new())),
        locks: Arc::new(Mutex::new(HashMap::new())),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/cafe/sessions", post(create_session).get(list_sessions))
        .route("/api/cafe/sessions/{id}", get(get_session))
        .route("/api/cafe/sessions/active/current", get(active_session))
        .route("/api/cafe/sessions/search/{query}", get(search_sessions))
        .route("/api/cafe/sessions/{id}/pause", post(pause_session))
        .route("/api/cafe/sessions/{id}/resume", post(resume_session))
        .route("/api/cafe/sessions/{id}/complete", post(complete_session))
        .route(
            "/api/cafe/sessions/{id}/participants/{name}/availability",
            put(update_availability),
        )
        .route("/api/cafe/messages", post(submit_message))
        .route(
            "/api/cafe/orchestration/suggest/{session_id}/{message_id}",
            get(suggest),
        )
        .route("/api/cafe/orchestration/next/{session_id}", get(next_speaker))
        .route("/api/cafe/stats/{session_id}", get(session_stats))
        .route("/api/cafe/stats/{session_id}/pitch", get(session_pitch))
        .route("/api/cafe/flow/{session_id}", get(session_flow))
        .route("/api/cafe/export/{id}/local", post(export_local))
        .route("/api/cafe/export/{id}/github", post(export_github))
        .route("/api/cafe/export/{id}/email", post(export_email))
        .route("/api/cafe/config/rules", get(get_rules).put(put_rules))
        .with_state(state)
}

fn service_error(err: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        Error::Session(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cafe-virtuel"
    }))
}

// ── Sessions ────────────────────────────────────────────────────────

async fn create_session(
    State(state): State<AppState>,
    Json(config): Json<SessionConfig>,
) -> impl IntoResponse {
    match state.service.create(config).await {
        Ok(session) => {
            let mut flows = state.flows.lock().await;
            flows.insert(session.id.clone(), ConversationFlow::new(&session.id));
            (StatusCode::CREATED, Json(serde_json::json!(session)))
        }
        Err(e) => service_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    status: Option<SessionStatus>,
}

fn default_limit() -> usize {
    50
}

async fn list_sessions(
    State(state): State<AppState>,
    query: Result<axum::extract::Query<ListQuery>, axum::extract::rejection::QueryRejection>,
) -> impl IntoResponse {
    let query = query.ok().map(|q| q.0).unwrap_or(ListQuery {
        limit: default_limit(),
        status: None,
    });
    match state.service.list(query.limit, query.status).await {
        Ok(sessions) => (StatusCode::OK, Json(serde_json::json!(sessions))),
        Err(e) => service_error(e),
    }
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.get(&id).await {
        Ok(session) => (StatusCode::OK, Json(serde_json::json!(session))),
        Err(e) => service_error(e),
    }
}

async fn active_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.find_active().await {
        Ok(session) => (StatusCode::OK, Json(serde_json::json!(session))),
        Err(e) => service_error(e),
    }
}

async fn search_sessions(
    State(state): State<AppState>,
    Path(query): Path<String>,
) -> impl IntoResponse {
    match state.service.search(&query).await {
        Ok(sessions) => (StatusCode::OK, Json(serde_json::json!(sessions))),
        Err(e) => service_error(e),
    }
}

async fn pause_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.pause(&id).await {
        Ok(session) => (StatusCode::OK, Json(serde_json::json!(session))),
        Err(e) => service_error(e),
    }
}

async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.resume(&id).await {
        Ok(session) => (StatusCode::OK, Json(serde_json::json!(session))),
        Err(e) => service_error(e),
    }
}

async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.complete(&id).await {
        Ok(session) => (StatusCode::OK, Json(serde_json::json!(session))),
        Err(e) => service_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityRequest {
    available: bool,
    tokens_remaining: Option<u32>,
}

async fn update_availability(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(req): Json<AvailabilityRequest>,
) -> impl IntoResponse {
    match state
        .service
        .update_availability(&id, &name, req.available, req.tokens_remaining)
        .await
    {
        Ok(session) => (StatusCode::OK, Json(serde_json::json!(session))),
        Err(e) => service_error(e),
    }
}

// ── Messages ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SubmitMessageRequest {
    session_id: String,
    sender: String,
    raw_text: String,
    #[serde(default)]
    is_human: bool,
    addressee: Option<String>,
    metadata: Option<serde_json::Value>,
}

/// Submit a raw message. Always accepted: a malformed envelope is stored
/// as `null` alongside the raw text, never rejected.
async fn submit_message(
    State(state): State<AppState>,
    Json(req): Json<SubmitMessageRequest>,
) -> impl IntoResponse {
    let lock = state.session_lock(&req.session_id).await;
    let _guard = lock.lock().await;

    let (envelope, envelope_error) = match state
        .orchestrator
        .parser
        .parse(&req.raw_text, &req.sender)
    {
        Ok(envelope) => (Some(envelope), None),
        Err(e) => {
            warn!(session_id = %req.session_id, error = %e, "Envelope rejected, storing raw message");
            (None, Some(e.to_string()))
        }
    };

    let questions = state.orchestrator.detector.detect(&req.raw_text);

    let mut message = Message::new(&req.session_id, &req.sender, &req.raw_text);
    message.is_human = req.is_human;
    message.addressee = req.addressee;
    message.envelope = envelope;
    message.detected_questions = questions.into_iter().map(|q| q.question_text).collect();
    if let Some(metadata) = req.metadata {
        message.metadata = metadata;
    }

    // Without an envelope there is no declared state; classify the raw
    // text instead and keep the verdict with the message.
    if message.envelope.is_none() {
        let (classified, confidence) = state.orchestrator.classifier.classify(&message.raw_text);
        if let Some(map) = message.metadata.as_object_mut() {
            map.insert("classified_state".into(), serde_json::json!(classified));
            map.insert(
                "classification_confidence".into(),
                serde_json::json!(confidence),
            );
        }
    }

    let message = match state.service.add_message(&req.session_id, message).await {
        Ok(message) => message,
        Err(e) => return service_error(e),
    };

    {
        let mut flows = state.flows.lock().await;
        let flow = flows
            .entry(req.session_id.clone())
            .or_insert_with(|| ConversationFlow::new(&req.session_id));
        let addressee = message
            .envelope
            .as_ref()
            .map(|e| e.addressee.as_str())
            .or(message.addressee.as_deref());
        flow.record(&message.sender, addressee);
    }

    info!(
        session_id = %req.session_id,
        message_id = %message.id,
        envelope = message.envelope.is_some(),
        "Message accepted"
    );
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": message,
            "envelope_error": envelope_error,
        })),
    )
}

// ── Orchestration ───────────────────────────────────────────────────

async fn suggest(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let session = match state.service.get(&session_id).await {
        Ok(session) => session,
        Err(e) => return service_error(e),
    };
    let Some(message) = session.messages.iter().find(|m| m.id == message_id) else {
        return service_error(
            SessionError::MessageNotFound {
                session_id,
                message_id,
            }
            .into(),
        );
    };

    let suggestion = state.orchestrator.sommelier.suggest(&session, message);
    (StatusCode::OK, Json(serde_json::json!({ "suggestion": suggestion })))
}

async fn next_speaker(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let session = match state.service.get(&session_id).await {
        Ok(session) => session,
        Err(e) => return service_error(e),
    };

    let next = session
        .messages
        .last()
        .and_then(|latest| state.orchestrator.pilote.next_speaker(&session, latest));
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "next_speaker": next,
            "should_stop": stop::should_stop(&session),
        })),
    )
}

// ── Statistics and flow ─────────────────────────────────────────────

async fn session_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.service.statistics(&session_id).await {
        Ok(stats) => (StatusCode::OK, Json(serde_json::json!(stats))),
        Err(e) => service_error(e),
    }
}

async fn session_pitch(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.service.statistics(&session_id).await {
        Ok(stats) => (
            StatusCode::OK,
            Json(serde_json::json!({ "pitch": stats.to_pitch_format() })),
        ),
        Err(e) => service_error(e),
    }
}

async fn session_flow(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    // Session must exist even when no flow has been recorded yet.
    if let Err(e) = state.service.get(&session_id).await {
        return service_error(e);
    }
    let flows = state.flows.lock().await;
    let flow = flows
        .get(&session_id)
        .cloned()
        .unwrap_or_else(|| ConversationFlow::new(&session_id));
    let busiest = flow.busiest_pair().cloned();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "flow": flow,
            "busiest_pair": busiest,
        })),
    )
}

// ── Export ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
struct ExportRequest {
    formats: Option<Vec<String>>,
}

async fn export_local(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ExportRequest>>,
) -> impl IntoResponse {
    let session = match state.service.get(&id).await {
        Ok(session) => session,
        Err(e) => return service_error(e),
    };

    let requested = body
        .and_then(|Json(req)| req.formats)
        .unwrap_or_else(|| vec!["markdown".to_string(), "json".to_string()]);
    let mut formats = Vec::with_capacity(requested.len());
    for raw in &requested {
        match raw.parse::<ExportFormat>() {
            Ok(format) => formats.push(format),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": e.to_string() })),
                );
            }
        }
    }

    let stats = match state.service.statistics(&id).await {
        Ok(stats) => stats,
        Err(e) => return service_error(e),
    };

    match state.exporter.save_to_local(&session, Some(&stats), &formats) {
        Ok(saved) => {
            let files: serde_json::Map<String, serde_json::Value> = saved
                .into_iter()
                .map(|(format, path)| {
                    (
                        format.as_str().to_string(),
                        serde_json::json!(path.display().to_string()),
                    )
                })
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "saved_files": files })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn export_github(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let session = match state.service.get(&id).await {
        Ok(session) => session,
        Err(e) => return service_error(e),
    };
    let stats = match state.service.statistics(&id).await {
        Ok(stats) => stats,
        Err(e) => return service_error(e),
    };

    match state.exporter.save_to_github(&session, Some(&stats)) {
        Ok(Some(path)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "file": path.display().to_string(),
            })),
        ),
        Ok(None) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "warning",
                "message": "GitHub non configuré",
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize, Default)]
struct EmailRequest {
    recipient: Option<String>,
}

async fn export_email(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<EmailRequest>>,
) -> impl IntoResponse {
    let session = match state.service.get(&id).await {
        Ok(session) => session,
        Err(e) => return service_error(e),
    };
    let stats = match state.service.statistics(&id).await {
        Ok(stats) => stats,
        Err(e) => return service_error(e),
    };
    let recipient = body.and_then(|Json(req)| req.recipient);

    match state
        .exporter
        .send_to_email(&session, Some(&stats), recipient.as_deref())
    {
        Ok(true) => (StatusCode::OK, Json(serde_json::json!({ "status": "sent" }))),
        Ok(false) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "failed",
                "message": "Configuration SMTP manquante",
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

// ── Café rules ──────────────────────────────────────────────────────

async fn get_rules(State(state): State<AppState>) -> impl IntoResponse {
    match tokio::fs::read_to_string(state.rules_path.as_ref()).await {
        Ok(rules) => (StatusCode::OK, Json(serde_json::json!({ "rules": rules }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("Lecture des règles impossible: {e}") })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct RulesRequest {
    rules: String,
}

async fn put_rules(
    State(state): State<AppState>,
    Json(req): Json<RulesRequest>,
) -> impl IntoResponse {
    let path = state.rules_path.as_ref();
    if let Some(parent) = path.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        );
    }
    match tokio::fs::write(path, req.rules).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "updated" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}
