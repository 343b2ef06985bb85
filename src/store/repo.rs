use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

use super::supabase::{Query, StoreError, SupabaseClient};
use crate::models::{
    Appointment, BusinessProfile, CallLog, CallerProfile, JobPatch, JobStatus, LeadStatus,
    OutreachCampaign, OutreachJob, OutreachLead, Reservation,
};

const BUSINESSES: &str = "business_profiles";
const CALLERS: &str = "caller_profiles";
const APPOINTMENTS: &str = "appointments";
const RESERVATIONS: &str = "reservations";
const CAMPAIGNS: &str = "outreach_campaigns";
const LEADS: &str = "outreach_leads";
const JOBS: &str = "outreach_jobs";
const CALL_LOGS: &str = "call_logs";

/// Typed table operations used by the call loop, outreach and the dashboard API.
pub struct Repository {
    db: SupabaseClient,
}

impl Repository {
    pub fn new(db: SupabaseClient) -> Self {
        Self { db }
    }

    pub async fn business_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<BusinessProfile>, StoreError> {
        let rows = self
            .db
            .select(BUSINESSES, &Query::new().eq("phone_number", phone_number).limit(1))
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn business_by_id(&self, id: &str) -> Result<Option<BusinessProfile>, StoreError> {
        let rows = self
            .db
            .select(BUSINESSES, &Query::new().eq("id", id).limit(1))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Record a call from `phone_number`: bump the counter of a known caller,
    /// or create the profile on first contact.
    pub async fn upsert_caller(
        &self,
        business_id: &str,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<CallerProfile, StoreError> {
        let existing: Vec<CallerProfile> = self
            .db
            .select(
                CALLERS,
                &Query::new()
                    .eq("business_id", business_id)
                    .eq("phone_number", phone_number)
                    .limit(1),
            )
            .await?;

        let rows: Vec<CallerProfile> = match existing.into_iter().next() {
            Some(caller) => {
                self.db
                    .update(
                        CALLERS,
                        &Query::new().eq("id", &caller.id),
                        &json!({
                            "call_count": caller.call_count + 1,
                            "last_called_at": now,
                        }),
                    )
                    .await?
            }
            None => {
                self.db
                    .insert(
                        CALLERS,
                        &json!({
                            "business_id": business_id,
                            "phone_number": phone_number,
                            "call_count": 1,
                            "last_called_at": now,
                        }),
                    )
                    .await?
            }
        };

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("caller {phone_number}")))
    }

    pub async fn create_appointment(
        &self,
        appointment: &Appointment,
    ) -> Result<Appointment, StoreError> {
        let rows = self.db.insert(APPOINTMENTS, appointment).await?;
        first(rows, "inserted appointment")
    }

    pub async fn create_reservation(
        &self,
        reservation: &Reservation,
    ) -> Result<Reservation, StoreError> {
        let rows = self.db.insert(RESERVATIONS, reservation).await?;
        first(rows, "inserted reservation")
    }

    /// Jobs ready to run: pending or retrying, not scheduled in the future, oldest first.
    pub async fn due_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutreachJob>, StoreError> {
        let ts = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.db
            .select(
                JOBS,
                &Query::new()
                    .in_list("status", &["pending", "retrying"])
                    .or(&[
                        "scheduled_at.is.null".to_string(),
                        format!("scheduled_at.lte.{ts}"),
                    ])
                    .order("created_at", true)
                    .limit(limit),
            )
            .await
    }

    pub async fn job(&self, id: &str) -> Result<OutreachJob, StoreError> {
        let rows = self.db.select(JOBS, &Query::new().eq("id", id).limit(1)).await?;
        first(rows, &format!("job {id}"))
    }

    /// Move a due job to `processing` with its new attempt count. The update
    /// only matches while the job is still pending or retrying, so `false`
    /// means another run claimed it first.
    pub async fn claim_job(&self, id: &str, attempts: u32) -> Result<bool, StoreError> {
        let rows: Vec<serde_json::Value> = self
            .db
            .update(
                JOBS,
                &Query::new()
                    .eq("id", id)
                    .in_list("status", &["pending", "retrying"]),
                &JobPatch {
                    status: Some(JobStatus::Processing),
                    attempts: Some(attempts),
                    ..Default::default()
                },
            )
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn update_job(&self, id: &str, patch: &JobPatch) -> Result<(), StoreError> {
        let _: Vec<serde_json::Value> = self
            .db
            .update(JOBS, &Query::new().eq("id", id), patch)
            .await?;
        Ok(())
    }

    pub async fn lead(&self, id: &str) -> Result<OutreachLead, StoreError> {
        let rows = self.db.select(LEADS, &Query::new().eq("id", id).limit(1)).await?;
        first(rows, &format!("lead {id}"))
    }

    pub async fn update_lead_status(&self, id: &str, status: LeadStatus) -> Result<(), StoreError> {
        let _: Vec<serde_json::Value> = self
            .db
            .update(LEADS, &Query::new().eq("id", id), &json!({ "status": status }))
            .await?;
        Ok(())
    }

    pub async fn campaign(&self, id: &str) -> Result<OutreachCampaign, StoreError> {
        let rows = self
            .db
            .select(CAMPAIGNS, &Query::new().eq("id", id).limit(1))
            .await?;
        first(rows, &format!("campaign {id}"))
    }

    pub async fn insert_call_log(&self, log: &CallLog) -> Result<(), StoreError> {
        let _: Vec<serde_json::Value> = self.db.insert(CALL_LOGS, log).await?;
        Ok(())
    }
}

fn first<T>(rows: Vec<T>, what: &str) -> Result<T, StoreError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(what.to_string()))
}
