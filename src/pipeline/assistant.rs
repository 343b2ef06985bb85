use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::conversation::{ConversationStore, Session};
use super::llm::{ChatMessage, LlmError, OpenAiClient, ToolCall, ToolSpec};
use crate::models::{
    Appointment, AppointmentStatus, BusinessProfile, Reservation, ReservationStatus,
};
use crate::store::Repository;

/// Upper bound on model round-trips for a single caller turn.
const MAX_TOOL_ROUNDS: usize = 3;

const FOLLOW_UP: &str =
    "I want to make sure I get that right, so I'll have someone from the team follow up with you.";

/// Generates the assistant's spoken replies and carries out bookings.
pub struct Assistant {
    llm: Arc<OpenAiClient>,
    repo: Arc<Repository>,
    conversations: ConversationStore,
    default_name: String,
}

impl Assistant {
    pub fn new(
        llm: Arc<OpenAiClient>,
        repo: Arc<Repository>,
        conversations: ConversationStore,
        default_name: String,
    ) -> Self {
        Self {
            llm,
            repo,
            conversations,
            default_name,
        }
    }

    /// Produce the reply to one caller utterance and record the turn in the
    /// call's conversation history.
    pub async fn respond(
        &self,
        call_sid: &str,
        session: &Session,
        business: Option<&BusinessProfile>,
        utterance: &str,
    ) -> Result<String, LlmError> {
        let system = system_prompt(
            &self.default_name,
            business,
            session.caller_name.as_deref(),
            Utc::now(),
        );
        let tools = business.map(tools_for).unwrap_or_default();

        let mut messages = Vec::with_capacity(session.history.len() + 4);
        messages.push(ChatMessage::system(system));
        messages.extend(session.history.iter().cloned());
        let mut turn = vec![ChatMessage::user(utterance)];
        messages.push(ChatMessage::user(utterance));

        for round in 0..MAX_TOOL_ROUNDS {
            let reply = self.llm.chat(&messages, &tools).await?;

            if reply.tool_calls.is_empty() {
                let text = reply.content.unwrap_or_default().trim().to_string();
                turn.push(ChatMessage::assistant(text.clone()));
                self.conversations.append(call_sid, turn).await;
                return Ok(text);
            }

            tracing::info!(
                call_sid,
                round,
                tools = reply.tool_calls.len(),
                "Model requested tool calls"
            );

            let calls = reply.tool_calls.clone();
            messages.push(reply.clone());
            turn.push(reply);
            for call in &calls {
                let result = match business {
                    Some(b) => self.execute_tool(b, session, call).await,
                    None => json!({ "error": "no business context" }).to_string(),
                };
                let msg = ChatMessage::tool_result(&call.id, result);
                messages.push(msg.clone());
                turn.push(msg);
            }
        }

        tracing::warn!(call_sid, "Tool round limit reached, deferring to staff");
        turn.push(ChatMessage::assistant(FOLLOW_UP));
        self.conversations.append(call_sid, turn).await;
        Ok(FOLLOW_UP.to_string())
    }

    /// Single-shot reply for the dashboard chat widget. No tools, no session.
    pub async fn chat_reply(
        &self,
        business: Option<&BusinessProfile>,
        history: Vec<ChatMessage>,
    ) -> Result<String, LlmError> {
        let mut messages = vec![ChatMessage::system(system_prompt(
            &self.default_name,
            business,
            None,
            Utc::now(),
        ))];
        messages.extend(history);
        let reply = self.llm.chat(&messages, &[]).await?;
        Ok(reply.content.unwrap_or_default().trim().to_string())
    }

    /// Run a tool call and return the JSON result fed back to the model.
    async fn execute_tool(
        &self,
        business: &BusinessProfile,
        session: &Session,
        call: &ToolCall,
    ) -> String {
        let args = &call.function.arguments;
        let result = match call.function.name.as_str() {
            "book_appointment" => self.book_appointment(business, session, args).await,
            "make_reservation" => self.make_reservation(business, session, args).await,
            other => Err(format!("unknown tool {other}")),
        };
        match result {
            Ok(v) => v.to_string(),
            Err(e) => {
                tracing::warn!(tool = %call.function.name, "Tool call failed: {e}");
                json!({ "error": e }).to_string()
            }
        }
    }

    async fn book_appointment(
        &self,
        business: &BusinessProfile,
        session: &Session,
        arguments: &str,
    ) -> Result<serde_json::Value, String> {
        let args: AppointmentArgs =
            serde_json::from_str(arguments).map_err(|e| format!("invalid arguments: {e}"))?;
        let scheduled_for = parse_when(&args.datetime, Utc::now())?;

        let appointment = Appointment {
            id: None,
            business_id: business.id.clone(),
            caller_phone: session.caller_phone.clone(),
            caller_name: args.caller_name,
            service: args.service,
            scheduled_for,
            status: AppointmentStatus::Scheduled,
            notes: args.notes,
        };
        let saved = self.repo.create_appointment(&appointment).await.map_err(|e| {
            tracing::error!(business_id = %business.id, "Failed to save appointment: {e}");
            "could not save the appointment".to_string()
        })?;

        tracing::info!(
            business_id = %business.id,
            scheduled_for = %saved.scheduled_for,
            "Appointment booked"
        );
        Ok(json!({
            "status": "booked",
            "id": saved.id,
            "service": saved.service,
            "scheduled_for": saved.scheduled_for,
        }))
    }

    async fn make_reservation(
        &self,
        business: &BusinessProfile,
        session: &Session,
        arguments: &str,
    ) -> Result<serde_json::Value, String> {
        let args: ReservationArgs =
            serde_json::from_str(arguments).map_err(|e| format!("invalid arguments: {e}"))?;
        if args.party_size == 0 {
            return Err("party size must be at least 1".to_string());
        }
        let reserved_for = parse_when(&args.datetime, Utc::now())?;

        let reservation = Reservation {
            id: None,
            business_id: business.id.clone(),
            caller_phone: session.caller_phone.clone(),
            caller_name: args.caller_name,
            party_size: args.party_size,
            reserved_for,
            status: ReservationStatus::Pending,
            notes: args.notes,
        };
        let saved = self.repo.create_reservation(&reservation).await.map_err(|e| {
            tracing::error!(business_id = %business.id, "Failed to save reservation: {e}");
            "could not save the reservation".to_string()
        })?;

        tracing::info!(
            business_id = %business.id,
            party_size = saved.party_size,
            "Reservation made"
        );
        Ok(json!({
            "status": "reserved",
            "id": saved.id,
            "party_size": saved.party_size,
            "reserved_for": saved.reserved_for,
        }))
    }
}

#[derive(Deserialize)]
struct AppointmentArgs {
    caller_name: String,
    service: String,
    datetime: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
struct ReservationArgs {
    caller_name: String,
    party_size: u32,
    datetime: String,
    #[serde(default)]
    notes: Option<String>,
}

/// Parse a model-supplied date/time. Values without an offset are taken as UTC.
fn parse_when(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| naive.and_utc())
        })
        .ok_or_else(|| {
            format!("could not understand the date/time '{raw}', use YYYY-MM-DDTHH:MM")
        })?;

    if parsed < now {
        return Err("that time is in the past".to_string());
    }
    Ok(parsed)
}

/// Function tools offered to the model for this kind of business.
pub fn tools_for(business: &BusinessProfile) -> Vec<ToolSpec> {
    if business.takes_reservations() {
        vec![ToolSpec {
            name: "make_reservation",
            description: "Reserve a table once the caller has confirmed their name, \
                          party size and time.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "caller_name": { "type": "string" },
                    "party_size": { "type": "integer", "minimum": 1 },
                    "datetime": { "type": "string", "description": "ISO 8601, e.g. 2025-06-01T19:30" },
                    "notes": { "type": "string" }
                },
                "required": ["caller_name", "party_size", "datetime"]
            }),
        }]
    } else {
        vec![ToolSpec {
            name: "book_appointment",
            description: "Book an appointment once the caller has confirmed their name, \
                          the service and the time.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "caller_name": { "type": "string" },
                    "service": { "type": "string" },
                    "datetime": { "type": "string", "description": "ISO 8601, e.g. 2025-06-01T14:00" },
                    "notes": { "type": "string" }
                },
                "required": ["caller_name", "service", "datetime"]
            }),
        }]
    }
}

/// Build the system prompt for a phone conversation.
pub fn system_prompt(
    default_name: &str,
    business: Option<&BusinessProfile>,
    caller_name: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let name = business
        .and_then(|b| b.assistant_name.as_deref())
        .unwrap_or(default_name);

    let mut prompt = match business {
        Some(b) => format!(
            "You are {name}, the friendly AI receptionist for {}{}. ",
            b.business_name,
            b.business_type
                .as_deref()
                .map(|t| format!(", a {t}"))
                .unwrap_or_default()
        ),
        None => format!("You are {name}, a friendly AI phone assistant. "),
    };

    prompt.push_str(
        "You are speaking on the phone, so keep every answer to one or two short \
         sentences, never use lists, markdown or emoji, and ask one question at a time. ",
    );

    if let Some(b) = business {
        if let Some(ref hours) = b.business_hours {
            prompt.push_str(&format!("Business hours: {hours}. "));
        }
        if !b.services.is_empty() {
            prompt.push_str(&format!("Services offered: {}. ", b.services.join(", ")));
        }
        if b.takes_reservations() {
            prompt.push_str(
                "You can reserve tables. Collect the caller's name, party size and time, \
                 confirm them back, then call make_reservation. ",
            );
        } else {
            prompt.push_str(
                "You can book appointments. Collect the caller's name, the service and a time, \
                 confirm them back, then call book_appointment. ",
            );
        }
    }

    if let Some(caller) = caller_name {
        prompt.push_str(&format!("The caller is {caller}, a returning customer. "));
    }

    prompt.push_str(&format!(
        "The current date and time is {} UTC. \
         If you cannot help, offer to have a team member call back.",
        now.format("%A %Y-%m-%d %H:%M")
    ));
    prompt
}
