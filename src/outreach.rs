//! Outbound outreach: turns queued `outreach_jobs` rows into phone calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::OutreachConfig;
use crate::models::{CampaignStatus, JobPatch, JobStatus, LeadStatus, OutreachJob};
use crate::store::{Repository, StoreError};
use crate::twilio::callback_url;
use crate::twilio::outbound::TwilioClient;

/// Counts from one processing run.
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct OutreachSummary {
    pub processed: usize,
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    Retrying,
    Failed,
    Skipped,
}

enum Attempt {
    Called(String),
    CampaignInactive,
}

pub struct OutreachProcessor {
    repo: Arc<Repository>,
    twilio: Arc<TwilioClient>,
    config: OutreachConfig,
    external_url: String,
}

impl OutreachProcessor {
    pub fn new(
        repo: Arc<Repository>,
        twilio: Arc<TwilioClient>,
        config: OutreachConfig,
        external_url: &str,
    ) -> Self {
        Self {
            repo,
            twilio,
            config,
            external_url: external_url.trim_end_matches('/').to_string(),
        }
    }

    /// Process one batch of due jobs, strictly one after another.
    ///
    /// Only failing to fetch the batch is an error; per-job failures are
    /// recorded on the job and logged.
    pub async fn run_once(&self) -> Result<OutreachSummary, StoreError> {
        let jobs = self
            .repo
            .due_jobs(self.config.batch_size, Utc::now())
            .await?;
        let mut summary = OutreachSummary::default();

        if jobs.is_empty() {
            tracing::debug!("No outreach jobs due");
            return Ok(summary);
        }
        tracing::info!(jobs = jobs.len(), "Processing outreach jobs");

        for job in &jobs {
            summary.processed += 1;
            match self.process(job).await {
                Ok(JobOutcome::Completed) => summary.completed += 1,
                Ok(JobOutcome::Retrying) => summary.retrying += 1,
                Ok(JobOutcome::Failed) => summary.failed += 1,
                Ok(JobOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(job_id = %job.id, "Failed to update outreach job: {e}");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            completed = summary.completed,
            retrying = summary.retrying,
            failed = summary.failed,
            skipped = summary.skipped,
            "Outreach run finished"
        );
        Ok(summary)
    }

    async fn process(&self, job: &OutreachJob) -> Result<JobOutcome, StoreError> {
        let attempts = job.attempts + 1;
        if !self.repo.claim_job(&job.id, attempts).await? {
            tracing::info!(job_id = %job.id, "Job already claimed by another run");
            return Ok(JobOutcome::Skipped);
        }

        match self.attempt(job).await {
            Ok(Attempt::Called(call_sid)) => {
                self.repo
                    .update_job(
                        &job.id,
                        &JobPatch {
                            status: Some(JobStatus::Completed),
                            call_sid: Some(call_sid),
                            ..Default::default()
                        },
                    )
                    .await?;
                if let Err(e) = self
                    .repo
                    .update_lead_status(&job.lead_id, LeadStatus::Contacted)
                    .await
                {
                    tracing::warn!(lead_id = %job.lead_id, "Failed to mark lead contacted: {e}");
                }
                Ok(JobOutcome::Completed)
            }
            Ok(Attempt::CampaignInactive) => {
                tracing::info!(
                    job_id = %job.id,
                    campaign_id = %job.campaign_id,
                    "Campaign not active, skipping job"
                );
                self.repo
                    .update_job(
                        &job.id,
                        &JobPatch {
                            status: Some(JobStatus::Failed),
                            last_error: Some("campaign not active".to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(JobOutcome::Skipped)
            }
            Err(reason) => {
                let status = status_after_failure(attempts, self.config.max_attempts);
                tracing::warn!(
                    job_id = %job.id,
                    attempts,
                    status = status.as_str(),
                    "Outreach attempt failed: {reason}"
                );
                let scheduled_at = retry_at(status, self.config.retry_delay_secs, Utc::now());
                self.repo
                    .update_job(
                        &job.id,
                        &JobPatch {
                            status: Some(status),
                            last_error: Some(reason),
                            scheduled_at,
                            ..Default::default()
                        },
                    )
                    .await?;

                if status == JobStatus::Failed {
                    if let Err(e) = self
                        .repo
                        .update_lead_status(&job.lead_id, LeadStatus::Failed)
                        .await
                    {
                        tracing::warn!(lead_id = %job.lead_id, "Failed to mark lead failed: {e}");
                    }
                    Ok(JobOutcome::Failed)
                } else {
                    Ok(JobOutcome::Retrying)
                }
            }
        }
    }

    async fn attempt(&self, job: &OutreachJob) -> Result<Attempt, String> {
        let lead = self.repo.lead(&job.lead_id).await.map_err(|e| e.to_string())?;
        let campaign = self
            .repo
            .campaign(&job.campaign_id)
            .await
            .map_err(|e| e.to_string())?;

        if campaign.status != CampaignStatus::Active {
            return Ok(Attempt::CampaignInactive);
        }

        let webhook = callback_url(
            &format!("{}/twilio/voice/outreach", self.external_url),
            "job_id",
            &job.id,
        );
        let status = format!("{}/twilio/status", self.external_url);
        let call_sid = self
            .twilio
            .call(&lead.phone_number, &webhook, &status)
            .await
            .map_err(|e| e.to_string())?;

        tracing::info!(
            job_id = %job.id,
            lead_id = %lead.id,
            call_sid = %call_sid,
            "Outreach call placed"
        );
        Ok(Attempt::Called(call_sid))
    }

    /// Run `run_once` every `interval` until `cancel` fires.
    pub fn spawn_poller(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = interval.as_secs(), "Outreach poller started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Outreach poller stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!("Outreach run failed: {e}");
                        }
                    }
                }
            }
        })
    }
}

/// A failed job retries until it has used `max_attempts`, then fails for good.
fn status_after_failure(attempts: u32, max_attempts: u32) -> JobStatus {
    if attempts >= max_attempts {
        JobStatus::Failed
    } else {
        JobStatus::Retrying
    }
}

/// When a retrying job becomes due again. `None` leaves it due on the next run.
fn retry_at(status: JobStatus, delay_secs: u64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if status != JobStatus::Retrying || delay_secs == 0 {
        return None;
    }
    Some(now + chrono::Duration::seconds(delay_secs as i64))
}
