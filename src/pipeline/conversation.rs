use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::llm::{ChatMessage, Role};
use crate::models::CallDirection;

/// Per-call conversation state, kept between Twilio webhook invocations.
#[derive(Debug, Clone)]
pub struct Session {
    pub business_id: Option<String>,
    pub caller_phone: String,
    pub caller_name: Option<String>,
    pub direction: CallDirection,
    /// Chat history sent to the model, excluding the system prompt.
    pub history: Vec<ChatMessage>,
    /// Human-readable transcript for the call log.
    pub transcript: Vec<String>,
    last_used: Instant,
}

impl Session {
    pub fn new(
        business_id: Option<String>,
        caller_phone: String,
        caller_name: Option<String>,
        direction: CallDirection,
    ) -> Self {
        Self {
            business_id,
            caller_phone,
            caller_name,
            direction,
            history: Vec::new(),
            transcript: Vec::new(),
            last_used: Instant::now(),
        }
    }
}

/// Conversation sessions keyed by CallSid. Idle sessions are pruned on access.
#[derive(Clone)]
pub struct ConversationStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    timeout: Duration,
    max_history: usize,
}

impl ConversationStore {
    pub fn new(timeout_secs: u64, max_history: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            timeout: Duration::from_secs(timeout_secs),
            max_history: max_history.max(2),
        }
    }

    /// Start (or restart) the session for a call.
    pub async fn open(&self, call_sid: &str, session: Session) {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, s| s.last_used.elapsed() < self.timeout);
        sessions.insert(call_sid.to_string(), session);
    }

    /// Snapshot of a call's session, refreshing its idle timer.
    pub async fn get(&self, call_sid: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, s| s.last_used.elapsed() < self.timeout);
        let session = sessions.get_mut(call_sid)?;
        session.last_used = Instant::now();
        Some(session.clone())
    }

    /// Append messages produced by one caller turn.
    ///
    /// History is trimmed from the front to `max_history`, always at the
    /// start of a caller turn so a tool result never loses its tool call.
    /// The latest turn is kept whole even when it alone exceeds the cap.
    pub async fn append(&self, call_sid: &str, messages: Vec<ChatMessage>) {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(call_sid) else {
            return;
        };

        for msg in &messages {
            let line = match (msg.role, msg.content.as_deref()) {
                (Role::User, Some(text)) => format!("Caller: {text}"),
                (Role::Assistant, Some(text)) if !text.is_empty() => format!("Assistant: {text}"),
                _ => continue,
            };
            session.transcript.push(line);
        }

        session.history.extend(messages);
        if session.history.len() > self.max_history {
            let history = &session.history;
            let start = history.len() - self.max_history;
            let cut = history[start..]
                .iter()
                .position(|m| m.role == Role::User)
                .map(|i| start + i)
                .or_else(|| history.iter().rposition(|m| m.role == Role::User))
                .unwrap_or_else(|| {
                    start
                        + history[start..]
                            .iter()
                            .take_while(|m| m.role == Role::Tool)
                            .count()
                });
            session.history.drain(..cut);
        }
        session.last_used = Instant::now();
    }

    /// Record something the assistant said outside the model (greeting, script).
    pub async fn note_assistant(&self, call_sid: &str, text: &str) {
        self.append(call_sid, vec![ChatMessage::assistant(text)]).await;
    }

    /// Remove a session (call ended), returning its final state.
    pub async fn end(&self, call_sid: &str) -> Option<Session> {
        self.sessions.lock().await.remove(call_sid)
    }
}
