use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use super::{SessionStatus, SessionStore};
use crate::config::{resolve, ConfigOverrides, Preset, PresetName, RunOptions};
use crate::io::read_input;
use crate::llm::ChatBackend;
use crate::models::ProgressEvent;
use crate::pipeline::Orchestrator;

/// Shared state for every handler
pub struct AppState<B> {
    pub sessions: Arc<dyn SessionStore>,
    pub backend: Arc<B>,
    /// Options applied to every run started through the API
    pub options: RunOptions,
}

/// Body of `POST /api/analyze`: inline text or a server-side path
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub overrides: Option<ConfigOverrides>,
}

fn default_preset() -> String {
    PresetName::default().to_string()
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
}

pub fn router<B: ChatBackend + 'static>(state: Arc<AppState<B>>) -> Router {
    Router::new()
        .route("/api/health", get(health::<B>))
        .route("/api/presets", get(presets))
        .route("/api/analyze", post(analyze::<B>))
        .route("/api/progress/{id}", get(progress::<B>))
        .route("/api/results/{id}", get(results::<B>))
        .route("/api/sessions/{id}", delete(delete_session::<B>))
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "session not found" }))).into_response()
}

async fn health<B: ChatBackend + 'static>(State(state): State<Arc<AppState<B>>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "active_sessions": state.sessions.len(),
    }))
}

async fn presets() -> Json<Vec<Preset>> {
    Json(PresetName::ALL.into_iter().map(Preset::get).collect())
}

/// Validate the request, then run the pipeline on a background task
async fn analyze<B: ChatBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Json(request): Json<AnalyzeRequest>,
) -> Response {
    let config = match resolve(&request.preset, request.overrides.as_ref()) {
        Ok(config) => config,
        Err(e) => return bad_request(e.to_string()),
    };

    let text = match (request.text, request.path) {
        (Some(text), _) if !text.trim().is_empty() => text,
        (_, Some(path)) => match read_input(&path) {
            Ok(input) => input.text,
            Err(e) => return bad_request(e.to_string()),
        },
        _ => return bad_request("either text or path is required"),
    };

    let orchestrator = match Orchestrator::new(state.backend.clone(), config, state.options.clone()) {
        Ok(orchestrator) => orchestrator,
        Err(e) => return bad_request(e.to_string()),
    };

    let session = state.sessions.create(orchestrator.config().preset);
    let id = session.id;
    info!(session = %id, "Analysis started (preset={})", session.preset);

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let store = sessions.clone();
        let mut sink = move |event: ProgressEvent| {
            let mut event = Some(event);
            store.update(id, &mut |s| s.progress.extend(event.take()));
        };

        match orchestrator.run(&text, &mut sink).await {
            Ok(run) => {
                let mut run = Some(run);
                sessions.update(id, &mut |s| {
                    s.status = SessionStatus::Completed;
                    s.result = run.take();
                });
                info!(session = %id, "Analysis completed");
            }
            Err(e) => {
                error!(session = %id, "Analysis failed: {}", e);
                let message = e.to_string();
                sessions.update(id, &mut |s| {
                    s.status = SessionStatus::Error;
                    s.error = Some(message.clone());
                });
            }
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            session_id: id,
            status: SessionStatus::Running,
        }),
    )
        .into_response()
}

async fn progress<B: ChatBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.sessions.get(id) {
        Some(session) => Json(json!({
            "session_id": session.id,
            "status": session.status,
            "progress": session.progress,
            "error": session.error,
        }))
        .into_response(),
        None => not_found(),
    }
}

/// 202 while the run is in flight; the session (with its run record) after
async fn results<B: ChatBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.sessions.get(id) {
        Some(session) if session.status == SessionStatus::Running => (
            StatusCode::ACCEPTED,
            Json(json!({ "session_id": session.id, "status": session.status })),
        )
            .into_response(),
        Some(session) => Json(session).into_response(),
        None => not_found(),
    }
}

async fn delete_session<B: ChatBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if state.sessions.delete(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
