use serde_json::json;

use crate::config::ElevenLabsConfig;

/// ElevenLabs text-to-speech client.
///
/// Returns MP3 audio, which Twilio can `<Play>` directly.
pub struct TtsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    model_id: String,
    stability: f32,
    similarity_boost: f32,
}

/// Per-request character limit we keep under.
const MAX_CHARS: usize = 2500;

impl TtsClient {
    pub fn new(config: &ElevenLabsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
        }
    }

    /// Convert text to MP3 audio, using `voice_id` or the configured default voice.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: Option<&str>,
    ) -> Result<Vec<u8>, TtsError> {
        if text.trim().is_empty() {
            return Err(TtsError::EmptyText);
        }
        let voice_id = voice_id.unwrap_or(&self.voice_id);
        let chunks = split_text(text, MAX_CHARS);
        let mut all_audio = Vec::new();

        for chunk in &chunks {
            let audio = self.synthesize_chunk(chunk, voice_id).await?;
            all_audio.extend_from_slice(&audio);
        }

        Ok(all_audio)
    }

    /// Synthesize a single chunk (must be <= MAX_CHARS).
    async fn synthesize_chunk(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, TtsError> {
        let body = json!({
            "text": text,
            "model_id": &self.model_id,
            "voice_settings": {
                "stability": self.stability,
                "similarity_boost": self.similarity_boost
            }
        });

        let resp = self
            .client
            .post(format!("{}/v1/text-to-speech/{voice_id}", self.base_url))
            .query(&[("output_format", "mp3_44100_128")])
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TtsError::Api(format!("{status}: {body}")));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

/// Split text at sentence boundaries to stay under the character limit.
///
/// Splits on `. `, `! `, `? ` boundaries. If a single sentence exceeds the
/// limit, falls back to splitting at the limit (on a char boundary).
fn split_text(text: &str, max_chars: usize) -> Vec<&str> {
    if text.len() <= max_chars {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            chunks.push(remaining);
            break;
        }

        let mut limit = max_chars;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        // Find the last sentence boundary within the limit
        let search_slice = &remaining[..limit];
        let split_pos = search_slice
            .rmatch_indices(". ")
            .chain(search_slice.rmatch_indices("! "))
            .chain(search_slice.rmatch_indices("? "))
            .map(|(i, s)| i + s.len())
            .max();

        let pos = split_pos.unwrap_or(limit);
        chunks.push(&remaining[..pos]);
        remaining = remaining[pos..].trim_start();
    }

    chunks
}

#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("nothing to synthesize")]
    EmptyText,
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("API error: {0}")]
    Api(String),
}
