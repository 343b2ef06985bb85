use axum::extract::{OriginalUri, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Form;
use chrono::Utc;
use serde::Deserialize;

use super::speech::{listen, recording_action, speak};
use super::twiml::TwimlBuilder;
use super::{param, twiml_response, verify_request, WebhookParams};
use crate::greeting;
use crate::models::{BusinessProfile, CallDirection, CallLog, OutreachCampaign, OutreachLead};
use crate::pipeline::conversation::Session;
use crate::store::StoreError;
use crate::AppState;

/// Handle POST /twilio/voice: Twilio webhook for incoming calls.
///
/// Looks up the business by the dialled number, greets the caller and
/// starts the record loop handled by /twilio/recording.
pub async fn handle_voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Form(params): Form<WebhookParams>,
) -> Response {
    if let Err(resp) = verify_request(&state, &headers, &uri, &params) {
        return resp;
    }

    let call_sid = param(&params, "CallSid").unwrap_or("unknown").to_string();
    let from = param(&params, "From").unwrap_or_default().to_string();
    let to = param(&params, "To").unwrap_or_default().to_string();

    // Calls placed through /api/call come back here with the numbers swapped.
    let direction = match param(&params, "Direction") {
        Some(d) if d.starts_with("outbound") => CallDirection::Outbound,
        _ => CallDirection::Inbound,
    };
    let (business_number, from) = match direction {
        CallDirection::Outbound => (from, to),
        CallDirection::Inbound => (to, from),
    };
    tracing::info!(
        call_sid = %call_sid,
        caller = %from,
        business_number = %business_number,
        ?direction,
        "Call answered"
    );

    let business = match state.repo.business_by_phone(&business_number).await {
        Ok(Some(b)) => Some(b),
        Ok(None) => {
            tracing::warn!(
                call_sid = %call_sid,
                number = %business_number,
                "No business for number"
            );
            None
        }
        Err(e) => {
            tracing::error!(call_sid = %call_sid, "Business lookup failed: {e}");
            None
        }
    };

    let caller_name = match business {
        Some(ref b) if !from.is_empty() => {
            match state.repo.upsert_caller(&b.id, &from, Utc::now()).await {
                Ok(caller) => caller.name,
                Err(e) => {
                    tracing::warn!(call_sid = %call_sid, "Caller profile update failed: {e}");
                    None
                }
            }
        }
        _ => None,
    };

    let text = choose_greeting(
        &state.config.assistant,
        business.as_ref(),
        caller_name.as_deref(),
    );

    let business_id = business.as_ref().map(|b| b.id.clone());
    state
        .conversations
        .open(
            &call_sid,
            Session::new(business_id.clone(), from, caller_name, direction),
        )
        .await;
    state.conversations.note_assistant(&call_sid, &text).await;

    let voice = business.as_ref().and_then(|b| b.voice_id.as_deref());
    let builder = speak(&state, TwimlBuilder::new(), &text, voice).await;
    let action = recording_action(&state, business_id.as_deref());
    twiml_response(listen(&state, builder, &action).build())
}

#[derive(Debug, Default, Deserialize)]
pub struct OutreachQuery {
    pub job_id: Option<String>,
}

/// Handle POST /twilio/voice/outreach: a lead picked up an outreach call.
///
/// Speaks the campaign script, then continues in the normal record loop
/// with the campaign's business as context.
pub async fn handle_voice_outreach(
    State(state): State<AppState>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<OutreachQuery>,
    Form(params): Form<WebhookParams>,
) -> Response {
    if let Err(resp) = verify_request(&state, &headers, &uri, &params) {
        return resp;
    }

    let call_sid = param(&params, "CallSid").unwrap_or("unknown").to_string();
    let to = param(&params, "To").unwrap_or_default().to_string();
    let Some(job_id) = query.job_id.as_deref().filter(|id| !id.is_empty()) else {
        tracing::warn!(call_sid = %call_sid, "Outreach call answered without a job id");
        return try_again_later(&state);
    };
    tracing::info!(call_sid = %call_sid, job_id, "Outreach call answered");

    let (lead, campaign, business) = match load_outreach_context(&state, job_id).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(
                call_sid = %call_sid,
                job_id,
                "Outreach context unavailable: {e}"
            );
            return try_again_later(&state);
        }
    };

    let script = render_script(
        &campaign.script,
        lead.name.as_deref(),
        business.as_ref().map(|b| b.business_name.as_str()),
        &state.config.assistant.name,
    );

    let business_id = business
        .as_ref()
        .map(|b| b.id.clone())
        .unwrap_or_else(|| campaign.business_id.clone());
    state
        .conversations
        .open(
            &call_sid,
            Session::new(
                Some(business_id.clone()),
                to,
                lead.name.clone(),
                CallDirection::Outbound,
            ),
        )
        .await;
    state.conversations.note_assistant(&call_sid, &script).await;

    // Short pause after pickup, then the script.
    let voice = business.as_ref().and_then(|b| b.voice_id.as_deref());
    let builder = speak(&state, TwimlBuilder::new().pause(1), &script, voice).await;
    let action = recording_action(&state, Some(&business_id));
    twiml_response(listen(&state, builder, &action).build())
}

/// Apologize and hang up when an outreach call cannot run its script.
fn try_again_later(state: &AppState) -> Response {
    let twiml = TwimlBuilder::new()
        .say(&format!(
            "Hello, this is {}. Sorry, we'll try you again later. Goodbye!",
            state.config.assistant.name
        ))
        .hangup();
    twiml_response(twiml.build())
}

async fn load_outreach_context(
    state: &AppState,
    job_id: &str,
) -> Result<(OutreachLead, OutreachCampaign, Option<BusinessProfile>), StoreError> {
    let job = state.repo.job(job_id).await?;
    let lead = state.repo.lead(&job.lead_id).await?;
    let campaign = state.repo.campaign(&job.campaign_id).await?;
    let business = state.repo.business_by_id(&campaign.business_id).await?;
    Ok((lead, campaign, business))
}

const TERMINAL_STATUSES: &[&str] = &["completed", "busy", "failed", "no-answer", "canceled"];

/// Handle POST /twilio/status: call lifecycle callback.
///
/// On a terminal status the conversation session is closed and its
/// transcript written to `call_logs`.
pub async fn handle_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Form(params): Form<WebhookParams>,
) -> Response {
    if let Err(resp) = verify_request(&state, &headers, &uri, &params) {
        return resp;
    }

    let call_sid = param(&params, "CallSid").unwrap_or("unknown").to_string();
    let status = param(&params, "CallStatus").unwrap_or("unknown").to_string();
    tracing::info!(call_sid = %call_sid, status = %status, "Call status");

    if TERMINAL_STATUSES.contains(&status.as_str()) {
        if let Some(session) = state.conversations.end(&call_sid).await {
            let log = CallLog {
                call_sid: call_sid.clone(),
                business_id: session.business_id,
                caller_phone: session.caller_phone,
                direction: session.direction,
                status,
                transcript: session.transcript.join("\n"),
                duration_secs: param(&params, "CallDuration").and_then(|d| d.parse().ok()),
            };
            if let Err(e) = state.repo.insert_call_log(&log).await {
                tracing::warn!(call_sid = %call_sid, "Failed to write call log: {e}");
            }
        }
    }

    twiml_response(TwimlBuilder::new().build())
}

/// Pick the opening line: returning callers by name, then the business's
/// own greeting, then the configured one, then a time-of-day greeting.
fn choose_greeting(
    assistant: &crate::config::AssistantConfig,
    business: Option<&BusinessProfile>,
    caller_name: Option<&str>,
) -> String {
    let name = business
        .and_then(|b| b.assistant_name.as_deref())
        .unwrap_or(&assistant.name);
    let business_name = business.map(|b| b.business_name.as_str());

    if let Some(caller) = caller_name {
        return greeting::returning_caller(caller, name, business_name);
    }
    if let Some(custom) = business.and_then(|b| b.greeting_message.as_deref()) {
        if !custom.trim().is_empty() {
            return custom.to_string();
        }
    }
    if !assistant.greeting.is_empty() {
        return assistant.greeting.clone();
    }
    greeting::select_greeting(name, business_name)
}

/// Fill `{name}`, `{business}` and `{assistant}` in a campaign script.
fn render_script(
    script: &str,
    lead_name: Option<&str>,
    business: Option<&str>,
    assistant: &str,
) -> String {
    script
        .replace("{name}", lead_name.unwrap_or("there"))
        .replace("{business}", business.unwrap_or("our team"))
        .replace("{assistant}", assistant)
}
