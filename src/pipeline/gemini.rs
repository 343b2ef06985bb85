use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::GeminiConfig;

/// A prior exchange passed to Gemini. `role` is `user` or `model`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeminiTurn {
    pub role: String,
    pub text: String,
}

/// Google Generative Language API client (`generateContent`).
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub async fn generate(
        &self,
        prompt: &str,
        history: &[GeminiTurn],
    ) -> Result<String, GeminiError> {
        let mut contents: Vec<serde_json::Value> = history
            .iter()
            .map(|t| json!({ "role": t.role, "parts": [{ "text": t.text }] }))
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": prompt }] }));

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let resp = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&json!({ "contents": contents }))
            .send()
            .await
            .map_err(|e| GeminiError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GeminiError::Api(format!("{status}: {body}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GeminiError::Parse(e.to_string()))?;

        extract_text(&body).ok_or_else(|| GeminiError::Parse("no candidate text".to_string()))
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(body: &serde_json::Value) -> Option<String> {
    let parts = body["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Gemini API error: {0}")]
    Api(String),
    #[error("Failed to parse Gemini response: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use httpmock::prelude::*;

    #[test]
    fn extracts_joined_parts() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "there" }] } }]
        });
        assert_eq!(extract_text(&body).as_deref(), Some("Hello there"));
        assert_eq!(extract_text(&json!({ "candidates": [] })), None);
    }

    #[tokio::test]
    async fn generate_sends_history_and_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-1.5-flash:generateContent")
                    .query_param("key", "gm-test")
                    .body_contains("\"model\"")
                    .body_contains("Write a tagline");
                then.status(200).json_body(json!({
                    "candidates": [{ "content": { "parts": [{ "text": "Never miss a call." }] } }]
                }));
            })
            .await;

        let gemini = GeminiClient::new(&test_config(&server.base_url()).gemini);
        let history = vec![
            GeminiTurn { role: "user".into(), text: "Hi".into() },
            GeminiTurn { role: "model".into(), text: "Hello!".into() },
        ];
        let text = gemini.generate("Write a tagline", &history).await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "Never miss a call.");
    }
}
