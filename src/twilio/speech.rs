//! The call-and-response speech loop.
//!
//! Every caller utterance arrives as a `<Record>` callback. One turn runs
//! download -> STT -> reply generation -> TTS, then answers with TwiML that
//! plays the reply and records the caller again.

use axum::extract::{OriginalUri, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Form;
use serde::Deserialize;

use super::outbound::TwilioError;
use super::twiml::{RecordOptions, TwimlBuilder};
use super::{callback_url, param, twiml_response, verify_request, WebhookParams};
use crate::models::{BusinessProfile, CallDirection};
use crate::pipeline::conversation::Session;
use crate::pipeline::llm::{ChatMessage, LlmError};
use crate::pipeline::stt::{is_whisper_hallucination, SttError};
use crate::AppState;

pub const APOLOGY: &str = "Sorry, I'm having trouble right now. Could you say that again?";
const REPROMPT: &str = "Sorry, I didn't catch that. Could you repeat it?";
const NO_INPUT: &str = "I didn't hear anything, so I'll let you go. Goodbye!";

/// Query string carried on the `<Record>` action URL.
#[derive(Debug, Default, Deserialize)]
pub struct RecordingQuery {
    pub business_id: Option<String>,
}

/// Outcome of one caller turn.
#[derive(Debug, PartialEq)]
enum Turn {
    Reply(String),
    Reprompt,
    Goodbye,
}

#[derive(Debug, thiserror::Error)]
enum TurnError {
    #[error("recording: {0}")]
    Recording(#[from] TwilioError),
    #[error("speech-to-text: {0}")]
    Stt(#[from] SttError),
    #[error("response generation: {0}")]
    Llm(#[from] LlmError),
}

/// Handle POST /twilio/recording: the caller finished speaking.
pub async fn handle_recording(
    State(state): State<AppState>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<RecordingQuery>,
    Form(params): Form<WebhookParams>,
) -> Response {
    if let Err(resp) = verify_request(&state, &headers, &uri, &params) {
        return resp;
    }

    let call_sid = param(&params, "CallSid").unwrap_or("unknown").to_string();
    let from = param(&params, "From").unwrap_or_default().to_string();

    let session = match state.conversations.get(&call_sid).await {
        Some(s) => s,
        None => {
            // Sessions live in memory; rebuild from the callback after a restart or timeout.
            tracing::info!(call_sid = %call_sid, "No session for recording, starting a new one");
            let s = Session::new(query.business_id.clone(), from, None, CallDirection::Inbound);
            state.conversations.open(&call_sid, s.clone()).await;
            s
        }
    };

    let business_id = session.business_id.clone().or(query.business_id);
    let business = match business_id.as_deref() {
        Some(id) => match state.repo.business_by_id(id).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(
                    call_sid = %call_sid,
                    business_id = id,
                    "Business lookup failed: {e}"
                );
                None
            }
        },
        None => None,
    };

    let turn = run_turn(&state, &call_sid, &session, business.as_ref(), &params).await;
    let voice = business.as_ref().and_then(|b| b.voice_id.as_deref());
    let action = recording_action(&state, business_id.as_deref());

    let twiml = match turn {
        Ok(Turn::Reply(text)) => {
            let builder = speak(&state, TwimlBuilder::new(), &text, voice).await;
            listen(&state, builder, &action)
        }
        Ok(Turn::Reprompt) => listen(&state, TwimlBuilder::new().say(REPROMPT), &action),
        Ok(Turn::Goodbye) => {
            let farewell = farewell(business.as_ref());
            state.conversations.note_assistant(&call_sid, &farewell).await;
            speak(&state, TwimlBuilder::new(), &farewell, voice)
                .await
                .hangup()
        }
        Err(e) => {
            tracing::error!(call_sid = %call_sid, "Speech loop failed: {e}");
            listen(&state, TwimlBuilder::new().say(APOLOGY), &action)
        }
    };

    twiml_response(twiml.build())
}

/// One turn: recording -> transcript -> reply text.
async fn run_turn(
    state: &AppState,
    call_sid: &str,
    session: &Session,
    business: Option<&BusinessProfile>,
    params: &WebhookParams,
) -> Result<Turn, TurnError> {
    let Some(recording_url) = param(params, "RecordingUrl") else {
        tracing::debug!(call_sid, "Callback without recording");
        return Ok(Turn::Reprompt);
    };
    let duration: u32 = param(params, "RecordingDuration")
        .and_then(|d| d.parse().ok())
        .unwrap_or(0);
    if duration == 0 {
        tracing::debug!(call_sid, "Empty recording");
        return Ok(Turn::Reprompt);
    }

    // speech-to-text
    let wav = match state.twilio.download_recording(recording_url).await {
        Err(TwilioError::UntrustedUrl(url)) => {
            tracing::warn!(call_sid, %url, "Ignoring recording from an unexpected host");
            return Ok(Turn::Reprompt);
        }
        other => other?,
    };
    let transcript = state.stt.transcribe(wav).await?;
    let trimmed = transcript.trim();
    if trimmed.is_empty() || is_whisper_hallucination(trimmed) {
        tracing::debug!(call_sid, transcript = %trimmed, "Discarded transcript");
        return Ok(Turn::Reprompt);
    }
    tracing::info!(call_sid, transcript = %trimmed, "Transcribed");

    if is_goodbye(trimmed) {
        state
            .conversations
            .append(call_sid, vec![ChatMessage::user(trimmed)])
            .await;
        tracing::info!(call_sid, "Caller said goodbye");
        return Ok(Turn::Goodbye);
    }

    // ai-response-generator
    let reply = state
        .assistant
        .respond(call_sid, session, business, trimmed)
        .await?;
    tracing::info!(call_sid, response_len = reply.len(), "Reply generated");

    if reply.is_empty() {
        return Ok(Turn::Reprompt);
    }
    Ok(Turn::Reply(reply))
}

/// text-to-speech-twilio: synthesize `text` and `<Play>` it, or `<Say>` it
/// when synthesis fails.
pub async fn speak(
    state: &AppState,
    builder: TwimlBuilder,
    text: &str,
    voice_id: Option<&str>,
) -> TwimlBuilder {
    match state.tts.synthesize(text, voice_id).await {
        Ok(audio) => {
            let bytes = audio.len();
            let id = state.audio.put(audio).await;
            tracing::debug!(clip_id = %id, bytes, "TTS audio ready");
            builder.play(&format!(
                "{}/audio/{id}",
                state.config.server.external_url.trim_end_matches('/')
            ))
        }
        Err(e) => {
            tracing::warn!("TTS failed, falling back to <Say>: {e}");
            builder.say(text)
        }
    }
}

/// Record the caller's next utterance. If they stay silent, Twilio falls
/// through to the goodbye.
pub fn listen(state: &AppState, builder: TwimlBuilder, action: &str) -> TwimlBuilder {
    builder
        .record(&RecordOptions {
            action,
            max_length_secs: state.config.call.max_record_secs,
            timeout_secs: state.config.call.silence_timeout_secs,
        })
        .say(NO_INPUT)
        .hangup()
}

pub fn recording_action(state: &AppState, business_id: Option<&str>) -> String {
    let base = format!(
        "{}/twilio/recording",
        state.config.server.external_url.trim_end_matches('/')
    );
    match business_id {
        Some(id) => callback_url(&base, "business_id", id),
        None => base,
    }
}

fn farewell(business: Option<&BusinessProfile>) -> String {
    match business {
        Some(b) => format!(
            "Thanks for calling {}. Have a great day, goodbye!",
            b.business_name
        ),
        None => "Thanks for calling. Have a great day, goodbye!".to_string(),
    }
}

const GOODBYES: &[&str] = &[
    "bye",
    "bye bye",
    "goodbye",
    "good bye",
    "thats all",
    "that is all",
    "thats it",
    "thats all thanks",
    "no thats it",
    "no thats all",
    "nothing else",
    "no thank you bye",
    "thanks bye",
    "thank you bye",
    "thank you goodbye",
];

/// Whether the caller is ending the conversation.
fn is_goodbye(transcript: &str) -> bool {
    let normalized: String = transcript
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    GOODBYES.contains(&normalized.as_str())
        || normalized.ends_with(" goodbye")
        || normalized.ends_with(" bye")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_string, form_request, test_state};
    use httpmock::prelude::*;
    use serde_json::json;
    use tower::ServiceExt;

    async fn mock_business(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rest/v1/business_profiles");
                then.status(200).json_body(json!([{
                    "id": "b1",
                    "business_name": "Glow Salon",
                    "business_type": "hair salon",
                    "phone_number": "+15550001111"
                }]));
            })
            .await;
    }

    async fn mock_recording(server: &MockServer, transcript: &str) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/Recordings/RE1.wav");
                then.status(200).body(b"RIFF".to_vec());
            })
            .await;
        let text = transcript.to_string();
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/audio/transcriptions");
                then.status(200).json_body(json!({ "text": text }));
            })
            .await;
    }

    fn recording_body(server: &MockServer, duration: u32) -> String {
        format!(
            "CallSid=CA1&From=%2B15550003333&RecordingUrl={}%2FRecordings%2FRE1&RecordingDuration={duration}",
            server.base_url().replace(':', "%3A").replace('/', "%2F")
        )
    }

    #[test]
    fn goodbye_detection() {
        assert!(is_goodbye("Goodbye!"));
        assert!(is_goodbye("OK, thanks, bye."));
        assert!(is_goodbye("That's all."));
        assert!(!is_goodbye("Can I book for Friday?"));
        assert!(!is_goodbye("bye the way, are you open late"));
    }

    #[tokio::test]
    async fn full_turn_plays_reply_and_records_again() {
        let server = MockServer::start_async().await;
        mock_business(&server).await;
        mock_recording(&server, "When are you open?").await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": "Tuesday to Saturday, nine to six."
                        }
                    }]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains("/v1/text-to-speech/");
                then.status(200).body(vec![0xFF, 0xFB]);
            })
            .await;

        let state = test_state(&server.base_url());
        let resp = crate::build_router(state.clone())
            .oneshot(form_request(
                "/twilio/recording?business_id=b1",
                &recording_body(&server, 4),
            ))
            .await
            .unwrap();
        let xml = body_string(resp).await;

        chat.assert_async().await;
        assert!(xml.contains("<Play>https://clara.example.com/audio/"), "{xml}");
        assert!(xml.contains("twilio/recording?business_id=b1"), "{xml}");
        let session = state.conversations.get("CA1").await.unwrap();
        assert_eq!(session.history.len(), 2);
    }

    #[tokio::test]
    async fn goodbye_hangs_up() {
        let server = MockServer::start_async().await;
        mock_business(&server).await;
        mock_recording(&server, "Thanks, bye!").await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains("/v1/text-to-speech/");
                then.status(500).body("down");
            })
            .await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(form_request(
                "/twilio/recording?business_id=b1",
                &recording_body(&server, 2),
            ))
            .await
            .unwrap();
        let xml = body_string(resp).await;

        assert!(xml.contains("Thanks for calling Glow Salon"), "{xml}");
        assert!(xml.contains("<Hangup/>"));
        assert!(!xml.contains("<Record"));
    }

    #[tokio::test]
    async fn empty_recording_reprompts_without_vendor_calls() {
        let server = MockServer::start_async().await;
        mock_business(&server).await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(form_request(
                "/twilio/recording?business_id=b1",
                &recording_body(&server, 0),
            ))
            .await
            .unwrap();
        let xml = body_string(resp).await;

        assert!(xml.contains(REPROMPT.replace('\'', "&apos;").as_str()), "{xml}");
        assert!(xml.contains("<Record"));
    }

    #[tokio::test]
    async fn stt_failure_apologizes_and_keeps_listening() {
        let server = MockServer::start_async().await;
        mock_business(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/Recordings/RE1.wav");
                then.status(200).body(b"RIFF".to_vec());
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/audio/transcriptions");
                then.status(500).body("whisper down");
            })
            .await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(form_request(
                "/twilio/recording?business_id=b1",
                &recording_body(&server, 3),
            ))
            .await
            .unwrap();
        let xml = body_string(resp).await;

        assert!(xml.contains(APOLOGY.replace('\'', "&apos;").as_str()), "{xml}");
        assert!(xml.contains("<Record"));
    }

    #[tokio::test]
    async fn reply_failure_apologizes_and_keeps_listening() {
        let server = MockServer::start_async().await;
        mock_business(&server).await;
        mock_recording(&server, "Can I book a trim on Friday?").await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(500).body("overloaded");
            })
            .await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(form_request(
                "/twilio/recording?business_id=b1",
                &recording_body(&server, 3),
            ))
            .await
            .unwrap();
        let xml = body_string(resp).await;

        chat.assert_async().await;
        assert!(xml.contains(APOLOGY.replace('\'', "&apos;").as_str()), "{xml}");
        assert!(xml.contains("<Record"));
    }

    #[tokio::test]
    async fn hallucinated_transcript_reprompts_without_a_reply() {
        let server = MockServer::start_async().await;
        mock_business(&server).await;
        mock_recording(&server, "Thanks for watching.").await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "Hi" } }]
                }));
            })
            .await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(form_request(
                "/twilio/recording?business_id=b1",
                &recording_body(&server, 2),
            ))
            .await
            .unwrap();
        let xml = body_string(resp).await;

        chat.assert_hits_async(0).await;
        assert!(xml.contains(REPROMPT.replace('\'', "&apos;").as_str()), "{xml}");
        assert!(xml.contains("<Record"));
    }

    #[tokio::test]
    async fn callback_without_recording_url_reprompts() {
        let server = MockServer::start_async().await;
        mock_business(&server).await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(form_request(
                "/twilio/recording?business_id=b1",
                "CallSid=CA1&From=%2B15550003333&RecordingDuration=4",
            ))
            .await
            .unwrap();
        let xml = body_string(resp).await;

        assert!(xml.contains(REPROMPT.replace('\'', "&apos;").as_str()), "{xml}");
        assert!(xml.contains("twilio/recording?business_id=b1"), "{xml}");
    }

    #[tokio::test]
    async fn recording_on_foreign_host_gets_no_credentials() {
        let server = MockServer::start_async().await;
        let elsewhere = MockServer::start_async().await;
        mock_business(&server).await;
        let foreign = elsewhere
            .mock_async(|when, then| {
                when.any_request();
                then.status(200).body(b"RIFF".to_vec());
            })
            .await;

        let resp = crate::build_router(test_state(&server.base_url()))
            .oneshot(form_request(
                "/twilio/recording?business_id=b1",
                &recording_body(&elsewhere, 4),
            ))
            .await
            .unwrap();
        let xml = body_string(resp).await;

        foreign.assert_hits_async(0).await;
        assert!(xml.contains(REPROMPT.replace('\'', "&apos;").as_str()), "{xml}");
        assert!(xml.contains("<Record"));
    }
}
