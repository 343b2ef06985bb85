use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::pipeline::llm::{ChatMessage, Role};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Answer as this business's receptionist.
    pub business_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

/// POST /api/chat: one reply for the dashboard chat widget.
///
/// ```json
/// { "messages": [{ "role": "user", "content": "Are you open Sunday?" }], "business_id": "b1" }
/// ```
pub async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;
    // The system prompt is always ours.
    let history: Vec<ChatMessage> = req
        .messages
        .into_iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter(|m| m.content.as_deref().is_some_and(|c| !c.trim().is_empty()))
        .collect();
    if history.is_empty() {
        return Err(ApiError::Validation("messages must not be empty".to_string()));
    }

    let business = match req.business_id.as_deref() {
        Some(id) => Some(
            state
                .repo
                .business_by_id(id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("business {id} not found")))?,
        ),
        None => None,
    };

    tracing::info!(
        messages = history.len(),
        business_id = ?req.business_id,
        "Dashboard chat"
    );
    let reply = state.assistant.chat_reply(business.as_ref(), history).await?;
    Ok(Json(ChatResponse { reply }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{api_request, body_string, test_state};
    use axum::http::StatusCode;
    use httpmock::prelude::*;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn replies_with_business_prompt() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/business_profiles")
                    .query_param("id", "eq.b1");
                then.status(200).json_body(json!([{
                    "id": "b1",
                    "business_name": "Glow Salon",
                    "phone_number": "+15550001111"
                }]));
            })
            .await;
        let llm = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_contains("Glow Salon")
                    .body_contains("Are you open Sunday?");
                then.status(200).json_body(json!({
                    "choices": [{
                        "message": { "role": "assistant", "content": " Yes, 10 to 4. " }
                    }]
                }));
            })
            .await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(api_request(
                "/api/chat",
                json!({
                    "messages": [{ "role": "user", "content": "Are you open Sunday?" }],
                    "business_id": "b1"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        llm.assert_async().await;
        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["reply"], "Yes, 10 to 4.");
    }

    #[tokio::test]
    async fn empty_messages_are_rejected() {
        let resp = crate::build_router(test_state("http://127.0.0.1:9"))
            .oneshot(api_request("/api/chat", json!({ "messages": [] })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_business_is_404() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rest/v1/business_profiles");
                then.status(200).json_body(json!([]));
            })
            .await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(api_request(
                "/api/chat",
                json!({
                    "messages": [{ "role": "user", "content": "hi" }],
                    "business_id": "missing"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_400() {
        let resp = crate::build_router(test_state("http://127.0.0.1:9"))
            .oneshot(api_request("/api/chat", json!({ "messages": "hi" })))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()["content-type"], "application/json");
        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }
}
