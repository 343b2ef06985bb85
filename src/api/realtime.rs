use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RealtimeRequest {
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

/// POST /api/realtime/session: mint an ephemeral OpenAI Realtime session
/// for the in-browser demo. The vendor response is returned as-is.
pub async fn handle_session(
    State(state): State<AppState>,
    payload: Result<Json<RealtimeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let session = state
        .llm
        .create_realtime_session(req.voice.as_deref(), req.instructions.as_deref())
        .await?;
    tracing::info!(session_id = ?session["id"].as_str(), "Realtime session created");
    Ok(Json(session))
}
