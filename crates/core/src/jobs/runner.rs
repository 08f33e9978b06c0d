//! Job coordination: ticket issuance, completion, and long-polling.

use crate::jobs::channel::NotificationChannel;
use crate::jobs::store::{ApiJobStore, ResultStore, StoreError};
use crate::jobs::{issue_ticket, JobPayload, JobRecord, JobStatus};
use crate::query::QueryResponse;
use meridian_error::{ErrorCode, MeridianError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Owns the job stores and the notification channel, and sequences the
/// writes so a published ticket always has its result persisted first.
pub struct JobCoordinator {
    jobs: Arc<dyn ApiJobStore>,
    results: Arc<dyn ResultStore>,
    channel: Arc<dyn NotificationChannel>,
    api_url: String,
}

fn store_error(err: StoreError) -> MeridianError {
    MeridianError::new(ErrorCode::StoreSaveFailed, err.to_string())
}

impl JobCoordinator {
    pub fn new(
        jobs: Arc<dyn ApiJobStore>,
        results: Arc<dyn ResultStore>,
        channel: Arc<dyn NotificationChannel>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            results,
            channel,
            api_url: api_url.into(),
        }
    }

    /// Issue a ticket and persist the pending record.
    pub async fn create_job(
        &self,
        query: serde_json::Value,
        user_id: &str,
    ) -> meridian_error::Result<JobRecord> {
        let ticket = issue_ticket(user_id, &query);
        let record = JobRecord::new(ticket.clone(), query, user_id.to_string());
        self.jobs.save(record.clone()).await.map_err(store_error)?;
        info!(target: "jobs", ticket, user = user_id, "job created");
        Ok(record)
    }

    /// Flip the record to `Running` and return the record as stored.
    pub async fn mark_running(&self, record: &JobRecord) -> meridian_error::Result<JobRecord> {
        let running = record.clone().with_status(JobStatus::Running);
        self.jobs.save(running.clone()).await.map_err(store_error)?;
        Ok(running)
    }

    /// Persist the result, flip the record to `Complete`, then announce.
    /// The result write comes first so any subscriber woken by the
    /// announcement finds it in the store.
    pub async fn complete(
        &self,
        record: &JobRecord,
        response: QueryResponse,
    ) -> meridian_error::Result<()> {
        self.results
            .save(&record.ticket, response)
            .await
            .map_err(store_error)?;
        self.jobs
            .save(record.clone().with_status(JobStatus::Complete))
            .await
            .map_err(store_error)?;
        info!(target: "jobs", ticket = record.ticket, "job complete");

        if let Err(e) = self.channel.publish(&record.ticket).await {
            return Err(MeridianError::new(
                ErrorCode::ChannelClosed,
                format!("Completion published after channel close: {}", e),
            ));
        }
        Ok(())
    }

    /// Flip the record to `Error` and announce so long-pollers re-check
    /// instead of waiting out their deadline.
    pub async fn fail(&self, record: &JobRecord, error: &MeridianError) -> meridian_error::Result<()> {
        warn!(target: "jobs", ticket = record.ticket, error = %error, "job failed");
        self.jobs
            .save(record.clone().with_status(JobStatus::Error))
            .await
            .map_err(store_error)?;
        if let Err(e) = self.channel.publish(&record.ticket).await {
            return Err(MeridianError::new(
                ErrorCode::ChannelClosed,
                format!("Failure published after channel close: {}", e),
            ));
        }
        Ok(())
    }

    /// Long-poll for a ticket's result.
    ///
    /// Checks the store, subscribes, then checks the store again to close
    /// the race with a completion that landed between the two. `None`
    /// means the result did not arrive within `timeout`; an unknown
    /// ticket is indistinguishable from a slow one by design.
    pub async fn await_result(
        &self,
        ticket: &str,
        timeout: Duration,
    ) -> meridian_error::Result<Option<QueryResponse>> {
        if let Some(stored) = self.results.get(ticket).await.map_err(store_error)? {
            return Ok(Some(stored.response));
        }

        let mut subscription = self.channel.subscribe().await;

        if let Some(stored) = self.results.get(ticket).await.map_err(store_error)? {
            return Ok(Some(stored.response));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(target: "jobs", ticket, "long-poll timed out");
                return Ok(None);
            }
            match tokio::time::timeout(remaining, subscription.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => {
                    // Channel closed underneath us; one final store check.
                    let stored = self.results.get(ticket).await.map_err(store_error)?;
                    return Ok(stored.map(|s| s.response));
                }
                Ok(Some(_notice)) => {
                    // Re-check the store on every wakeup. A lagged
                    // subscription may have dropped our own ticket's
                    // announcement, so the store is the arbiter, not the
                    // notice content.
                    if let Some(stored) = self.results.get(ticket).await.map_err(store_error)? {
                        return Ok(Some(stored.response));
                    }
                }
            }
        }
    }

    /// The client-facing document for a ticket, if the job exists.
    pub async fn payload(&self, ticket: &str) -> meridian_error::Result<Option<JobPayload>> {
        let record = match self.jobs.get(ticket).await.map_err(store_error)? {
            None => return Ok(None),
            Some(record) => record,
        };
        JobPayload::from_record(&record, &self.api_url).map(Some)
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}
