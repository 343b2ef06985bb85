use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::twilio::callback_url;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    /// Phone number to call (E.164 format, e.g., "+15550007777")
    pub to: String,
    /// Outreach job to run on the call. Without it the callee gets the
    /// regular receptionist greeting.
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub call_sid: String,
    pub status: String,
}

/// POST /api/call: Trigger an outbound call.
///
/// Request body:
/// ```json
/// {
///   "to": "+15550007777",
///   "job_id": "8c1f..."
/// }
/// ```
pub async fn handle_call(
    State(state): State<AppState>,
    payload: Result<Json<CallRequest>, JsonRejection>,
) -> Result<Json<CallResponse>, ApiError> {
    let Json(req) = payload?;
    if !validate_e164(&req.to) {
        return Err(ApiError::Validation(format!(
            "invalid phone number {:?}, expected E.164 (+<digits>)",
            req.to
        )));
    }

    let base = state.config.server.external_url.trim_end_matches('/');
    let webhook = match req.job_id.as_deref() {
        Some(job_id) => callback_url(&format!("{base}/twilio/voice/outreach"), "job_id", job_id),
        None => format!("{base}/twilio/voice"),
    };
    let status = format!("{base}/twilio/status");

    tracing::info!(to = %req.to, job_id = ?req.job_id, "Outbound call requested");
    let call_sid = state.twilio.call(&req.to, &webhook, &status).await?;

    Ok(Json(CallResponse {
        call_sid,
        status: "initiated".to_string(),
    }))
}

fn validate_e164(s: &str) -> bool {
    if !s.starts_with('+') || s.len() < 8 || s.len() > 16 {
        return false;
    }
    s[1..].chars().all(|c| c.is_ascii_digit())
}
