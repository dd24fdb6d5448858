//! Debug-only HTTP surface, freely reshaped or omitted without affecting
//! call handling. Never load-bearing for call logic, every handler only
//! reads the engine's session snapshots or injects a synthetic event for
//! manual probing.
//!
//! Axum router shape: state extension + simple `Json` responses, no
//! templated HTML.

use crate::callcontrol::CallControlEvent;
use crate::engine::DialogEngine;
use crate::error::AppError;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<DialogEngine>,
}

pub fn router(engine: Arc<DialogEngine>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/sessions", get(sessions))
        .route("/test/call", post(test_call))
        .route("/test/tts", post(test_tts))
        .route("/test/stt", post(test_stt))
        .route("/test/intent", post(test_intent))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AdminState { engine })
}

async fn root(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let config = state.engine.services().config;
    Json(serde_json::json!({
        "service": "voicedesk",
        "company": config.company_name,
        "status": "running",
        "services": config.services(),
    }))
}

async fn health(State(state): State<AdminState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active_sessions": state.engine.active_session_count(),
    }))
}

async fn sessions(State(state): State<AdminState>) -> Json<Vec<crate::engine::SessionSnapshot>> {
    Json(state.engine.session_snapshots())
}

#[derive(Deserialize)]
struct TestCallRequest {
    channel_id: String,
    #[serde(default = "default_caller_id")]
    caller_id: String,
}

fn default_caller_id() -> String {
    "+41000000000".to_string()
}

/// Synthesizes a `CallStarted` event locally, bypassing the real
/// WebSocket bus, so a session can be driven manually while probing.
async fn test_call(State(state): State<AdminState>, Json(request): Json<TestCallRequest>) -> Json<serde_json::Value> {
    state.engine.dispatch(CallControlEvent::CallStarted {
        channel_id: request.channel_id.clone(),
        caller_id: request.caller_id,
    });
    Json(serde_json::json!({ "dispatched": true, "channel_id": request.channel_id }))
}

#[derive(Deserialize)]
struct TestTtsRequest {
    text: String,
}

/// Drives the TTS cache directly for manual probing, bypassing the dialog
/// engine entirely.
async fn test_tts(
    State(state): State<AdminState>,
    Json(request): Json<TestTtsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let services = state.engine.services();
    let path = services.tts.ensure_audio(&request.text, true).await?;
    Ok(Json(serde_json::json!({ "status": "ok", "audio_path": path })))
}

#[derive(Deserialize)]
struct TestSttRequest {
    audio_path: String,
}

/// Drives transcription directly against a file already on disk, for manual
/// probing.
async fn test_stt(
    State(state): State<AdminState>,
    Json(request): Json<TestSttRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let services = state.engine.services();
    let transcript = services.ai.transcribe(&PathBuf::from(request.audio_path), "fr").await?;
    Ok(Json(serde_json::json!({ "status": "ok", "transcript": transcript })))
}

#[derive(Deserialize)]
struct TestIntentRequest {
    text: String,
}

/// Drives the intent classifier directly, for manual probing.
async fn test_intent(
    State(state): State<AdminState>,
    Json(request): Json<TestIntentRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let services = state.engine.services();
    let result = services.intent.classify(&request.text).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": result.service.map(|s| s.name),
        "response": result.response,
    })))
}
