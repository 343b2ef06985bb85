pub mod outbound;
pub mod signature;
pub mod speech;
pub mod twiml;
pub mod webhook;

use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::AppState;

/// Form parameters of a Twilio webhook, in the order they were posted.
pub type WebhookParams = Vec<(String, String)>;

pub fn param<'a>(params: &'a WebhookParams, key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// `base?key=value` with the value form-encoded, for webhook callback URLs.
pub fn callback_url(base: &str, key: &str, value: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(key, value)
        .finish();
    format!("{base}?{query}")
}

pub fn twiml_response(xml: String) -> Response {
    ([("Content-Type", "text/xml")], xml).into_response()
}

/// Reject webhooks whose `X-Twilio-Signature` does not match.
///
/// Twilio signs the public URL it called, so the signed URL is rebuilt
/// from `server.external_url` plus the request path and query.
#[allow(clippy::result_large_err)]
pub fn verify_request(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    params: &WebhookParams,
) -> Result<(), Response> {
    if !state.config.twilio.validate_signatures {
        return Ok(());
    }

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let url = format!(
        "{}{}",
        state.config.server.external_url.trim_end_matches('/'),
        path
    );

    let provided = headers
        .get("x-twilio-signature")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(sig) if signature::validate(&state.config.twilio.auth_token, &url, params, sig) => {
            Ok(())
        }
        _ => {
            tracing::warn!(%url, "Rejected webhook with invalid Twilio signature");
            Err((StatusCode::FORBIDDEN, "invalid signature").into_response())
        }
    }
}
