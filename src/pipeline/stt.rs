use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::config::OpenAiConfig;

/// OpenAI Whisper speech-to-text client.
pub struct SttClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl SttClient {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!(
                "{}/audio/transcriptions",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            model: config.stt_model.clone(),
        }
    }

    /// Transcribe a WAV recording. Returns the raw transcript text.
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String, SttError> {
        let part = Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::Request(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", "en");

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SttError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SttError::Api(format!("{status}: {body}")));
        }

        let parsed: TranscriptionResponse = resp
            .json()
            .await
            .map_err(|e| SttError::Api(format!("Bad transcription response: {e}")))?;

        Ok(parsed.text)
    }
}

/// Known Whisper hallucinations: phrases it generates from silence/noise.
const WHISPER_HALLUCINATIONS: &[&str] = &[
    "thank you",
    "thank you.",
    "thanks for watching",
    "thanks for watching.",
    "thank you for watching",
    "thank you for watching.",
    "subscribe",
    "like and subscribe",
    "you",
    "you.",
    "the end",
    "the end.",
    "so",
    "...",
    "eh",
    "hmm",
    "uh",
    "oh",
    "amen",
    "amen.",
];

pub fn is_whisper_hallucination(transcript: &str) -> bool {
    let lower = transcript.trim().to_lowercase();
    WHISPER_HALLUCINATIONS.iter().any(|h| lower == *h)
}

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("API error: {0}")]
    Api(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn detects_known_hallucinations() {
        assert!(is_whisper_hallucination("thank you"));
        assert!(is_whisper_hallucination("Thank You"));
        assert!(is_whisper_hallucination(" THANKS FOR WATCHING. "));
        assert!(is_whisper_hallucination("..."));
    }

    #[test]
    fn passes_real_speech() {
        assert!(!is_whisper_hallucination("I'd like to book a haircut"));
        assert!(!is_whisper_hallucination("Thank you for your help today"));
        assert!(!is_whisper_hallucination(""));
    }

    #[tokio::test]
    async fn transcribe_posts_multipart_with_model() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/audio/transcriptions")
                    .header("authorization", "Bearer sk-test")
                    .body_contains("whisper-1")
                    .body_contains("recording.wav");
                then.status(200)
                    .json_body(json!({ "text": "Do you have anything Tuesday?" }));
            })
            .await;

        let stt = SttClient::new(&test_config(&server.base_url()).openai);
        let text = stt.transcribe(b"RIFF....WAVE".to_vec()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "Do you have anything Tuesday?");
    }

    #[tokio::test]
    async fn transcribe_reports_api_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/audio/transcriptions");
                then.status(429).body("rate limited");
            })
            .await;

        let stt = SttClient::new(&test_config(&server.base_url()).openai);
        let err = stt.transcribe(vec![0; 4]).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }
}
