use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::AppState;

/// Middleware guarding every `/api/*` route.
pub async fn require_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match check_auth(req.headers(), &state.config.api.token) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Compare the `Authorization: Bearer` header against the configured token.
pub fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), ApiError> {
    if expected_token.is_empty() {
        tracing::warn!("API token not configured, rejecting request");
        return Err(ApiError::NotConfigured("API token"));
    }

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected_token => Ok(()),
        _ => {
            tracing::warn!("Unauthorized API request");
            Err(ApiError::Unauthorized)
        }
    }
}
