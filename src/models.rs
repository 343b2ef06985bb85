//! Rows of the Supabase tables the voice service reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const RESERVATION_KINDS: &[&str] = &[
    "restaurant",
    "restaurants",
    "cafe",
    "café",
    "bar",
    "bistro",
    "diner",
    "pub",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessProfile {
    pub id: String,
    pub business_name: String,
    #[serde(default)]
    pub business_type: Option<String>,
    pub phone_number: String,
    #[serde(default)]
    pub greeting_message: Option<String>,
    #[serde(default)]
    pub business_hours: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub assistant_name: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl BusinessProfile {
    /// Restaurants, cafes and bars take reservations; everyone else books appointments.
    pub fn takes_reservations(&self) -> bool {
        let Some(kind) = self.business_type.as_deref() else {
            return false;
        };
        kind.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| RESERVATION_KINDS.contains(&word))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallerProfile {
    pub id: String,
    pub business_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub call_count: i64,
    #[serde(default)]
    pub last_called_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub business_id: String,
    pub caller_phone: String,
    pub caller_name: String,
    pub service: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub business_id: String,
    pub caller_phone: String,
    pub caller_name: String,
    pub party_size: u32,
    pub reserved_for: DateTime<Utc>,
    pub status: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutreachCampaign {
    pub id: String,
    pub business_id: String,
    pub name: String,
    /// What the assistant says when the lead picks up.
    pub script: String,
    pub status: CampaignStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    Contacted,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutreachLead {
    pub id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub phone_number: String,
    pub status: LeadStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutreachJob {
    pub id: String,
    pub campaign_id: String,
    pub lead_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Partial update for an outreach job. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallLog {
    pub call_sid: String,
    #[serde(default)]
    pub business_id: Option<String>,
    pub caller_phone: String,
    pub direction: CallDirection,
    pub status: String,
    pub transcript: String,
    #[serde(default)]
    pub duration_secs: Option<u32>,
}
