use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    pub voice_id: Option<String>,
}

/// POST /api/tts: voice previews for the dashboard. Returns MP3 bytes.
pub async fn handle_tts(
    State(state): State<AppState>,
    payload: Result<Json<TtsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let audio = state
        .tts
        .synthesize(&req.text, req.voice_id.as_deref())
        .await?;
    tracing::debug!(bytes = audio.len(), "TTS preview ready");
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}
