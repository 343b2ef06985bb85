use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::pipeline::gemini::GeminiTurn;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GeminiRequest {
    pub prompt: String,
    #[serde(default)]
    pub history: Vec<GeminiTurn>,
}

#[derive(Debug, Serialize)]
pub struct GeminiResponse {
    pub text: String,
}

/// POST /api/gemini: text generation for dashboard helpers.
pub async fn handle_gemini(
    State(state): State<AppState>,
    payload: Result<Json<GeminiRequest>, JsonRejection>,
) -> Result<Json<GeminiResponse>, ApiError> {
    if !state.gemini.is_configured() {
        return Err(ApiError::NotConfigured("Gemini API key"));
    }
    let Json(req) = payload?;
    if req.prompt.trim().is_empty() {
        return Err(ApiError::Validation("prompt must not be empty".to_string()));
    }

    let text = state.gemini.generate(&req.prompt, &req.history).await?;
    Ok(Json(GeminiResponse { text }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::tests::test_config;
    use crate::pipeline::gemini::GeminiClient;
    use crate::test_support::{api_request, body_string, test_state};
    use axum::http::StatusCode;
    use httpmock::prelude::*;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn returns_generated_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path_contains(":generateContent")
                    .query_param("key", "gm-test")
                    .body_contains("Write a promo");
                then.status(200).json_body(json!({
                    "candidates": [{ "content": { "parts": [{ "text": "Spring sale!" }] } }]
                }));
            })
            .await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(api_request(
                "/api/gemini",
                json!({
                    "prompt": "Write a promo",
                    "history": [
                        { "role": "user", "text": "hi" },
                        { "role": "model", "text": "hello" }
                    ]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["text"], "Spring sale!");
    }

    #[tokio::test]
    async fn missing_key_is_503() {
        let mut config = test_config("http://127.0.0.1:9");
        config.gemini.api_key.clear();
        let mut state = test_state("http://127.0.0.1:9");
        state.gemini = Arc::new(GeminiClient::new(&config.gemini));

        let resp = crate::build_router(state)
            .oneshot(api_request("/api/gemini", json!({ "prompt": "hi" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected() {
        let resp = crate::build_router(test_state("http://127.0.0.1:9"))
            .oneshot(api_request("/api/gemini", json!({ "prompt": "  " })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
