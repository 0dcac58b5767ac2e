//! HTTP API for the nayru TTS engine.
//!
//! Runs on port 2003 by default, CORS-permissive so local frontends can
//! call it. Every handler is a 1:1 wrapper over an engine method; upstream
//! failures never surface here (they degrade through `/status`).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use nayru_core::types::{ConfigPatch, EngineError, TtsConfig, TtsStatus};

use crate::tts::TtsEngine;

/// Build the axum router with a shared [`TtsEngine`].
pub fn router(engine: TtsEngine) -> Router {
    Router::new()
        .route("/speak", post(speak))
        .route("/stop", post(stop))
        .route("/skip", post(skip))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/status", get(status))
        .route("/config", get(get_config).post(set_config))
        .route("/preview_split", post(preview_split))
        .route("/stream/chunk", post(stream_chunk))
        .route("/stream/end", post(stream_end))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "ok": false, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        }
    }
}

#[derive(serde::Deserialize)]
struct SpeakRequest {
    text: String,
    #[serde(default)]
    voice: Option<String>,
}

#[derive(serde::Serialize)]
struct SpeakResponse {
    ok: bool,
    queued_chunks: usize,
}

#[derive(serde::Serialize)]
struct OkResponse {
    ok: bool,
}

async fn speak(
    State(engine): State<TtsEngine>,
    Json(req): Json<SpeakRequest>,
) -> Result<Json<SpeakResponse>, ApiError> {
    if let Some(voice) = req.voice {
        engine.set_config(ConfigPatch {
            voice: Some(voice),
            ..Default::default()
        })?;
    }
    let reply = engine.speak(&req.text)?;
    Ok(Json(SpeakResponse {
        ok: true,
        queued_chunks: reply.queued_chunks,
    }))
}

async fn stop(State(engine): State<TtsEngine>) -> Json<OkResponse> {
    engine.stop();
    Json(OkResponse { ok: true })
}

async fn skip(State(engine): State<TtsEngine>) -> Json<OkResponse> {
    engine.skip();
    Json(OkResponse { ok: true })
}

async fn pause(State(engine): State<TtsEngine>) -> Json<OkResponse> {
    engine.pause();
    Json(OkResponse { ok: true })
}

async fn resume(State(engine): State<TtsEngine>) -> Json<OkResponse> {
    engine.resume();
    Json(OkResponse { ok: true })
}

async fn status(State(engine): State<TtsEngine>) -> Json<TtsStatus> {
    Json(engine.status())
}

async fn get_config(State(engine): State<TtsEngine>) -> Json<TtsConfig> {
    Json(engine.get_config())
}

async fn set_config(
    State(engine): State<TtsEngine>,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<OkResponse>, ApiError> {
    engine.set_config(patch)?;
    Ok(Json(OkResponse { ok: true }))
}

#[derive(serde::Deserialize)]
struct PreviewRequest {
    text: String,
}

#[derive(serde::Serialize)]
struct PreviewResponse {
    chunks: Vec<String>,
}

async fn preview_split(
    State(engine): State<TtsEngine>,
    Json(req): Json<PreviewRequest>,
) -> Json<PreviewResponse> {
    Json(PreviewResponse {
        chunks: engine.preview_split(&req.text),
    })
}

#[derive(serde::Deserialize)]
struct StreamChunkRequest {
    text: String,
}

async fn stream_chunk(
    State(engine): State<TtsEngine>,
    Json(req): Json<StreamChunkRequest>,
) -> Json<OkResponse> {
    engine.stream_chunk(&req.text);
    Json(OkResponse { ok: true })
}

async fn stream_end(State(engine): State<TtsEngine>) -> Json<OkResponse> {
    engine.stream_end();
    Json(OkResponse { ok: true })
}
