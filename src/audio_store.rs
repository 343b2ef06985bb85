use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Mutex;

struct Clip {
    audio: Bytes,
    created_at: Instant,
}

/// Short-lived store of synthesized MP3 clips, keyed by random id.
///
/// TwiML can only reference audio by URL, so each TTS reply is parked here
/// and served from `GET /audio/{id}` until Twilio has fetched it.
#[derive(Clone)]
pub struct AudioStore {
    inner: Arc<Mutex<HashMap<String, Clip>>>,
    ttl: Duration,
}

impl AudioStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Store a clip and return its id.
    pub async fn put(&self, audio: Vec<u8>) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut clips = self.inner.lock().await;
        clips.retain(|_, c| c.created_at.elapsed() < self.ttl);
        clips.insert(
            id.clone(),
            Clip {
                audio: Bytes::from(audio),
                created_at: Instant::now(),
            },
        );
        tracing::debug!(clip_id = %id, stored = clips.len(), "Audio clip stored");
        id
    }

    /// Look up a clip that has not expired.
    pub async fn get(&self, id: &str) -> Option<Bytes> {
        let clips = self.inner.lock().await;
        clips
            .get(id)
            .filter(|c| c.created_at.elapsed() < self.ttl)
            .map(|c| c.audio.clone())
    }
}
