//! Asynchronous job coordination.
//!
//! Queries that outlive their synchronous window are promoted to ticketed
//! jobs. Job metadata and query results live in separate stores so result
//! retention can differ from bookkeeping retention, and completion is
//! announced over a [`channel::NotificationChannel`] that waiting clients
//! (possibly on other gateway instances) subscribe to.

pub mod channel;
pub mod cluster;
pub mod runner;
pub mod store;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use meridian_error::{ErrorCode, ErrorContext, MeridianError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// Lifecycle of a ticketed job. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

/// Server-side bookkeeping for one ticketed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub ticket: String,
    /// The original query, serialized for replay and display.
    pub query: serde_json::Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: String,
}

impl JobRecord {
    pub fn new(ticket: String, query: serde_json::Value, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            ticket,
            query,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            user_id,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }
}

/// The client-facing job document.
///
/// Field names follow the public API contract, hence the camelCase and
/// the `self` link field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub query: serde_json::Value,
    /// Link to the completed results, present once the job finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,
    /// Inline results for jobs that completed within the sync window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_results: Option<crate::query::QueryResponse>,
    #[serde(rename = "self")]
    pub self_link: String,
    pub status: JobStatus,
    pub ticket: String,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    pub user_id: String,
}

impl JobPayload {
    /// Build the client document from a stored record. Link fields are
    /// derived from the gateway's public API URL.
    pub fn from_record(record: &JobRecord, api_url: &str) -> meridian_error::Result<Self> {
        if record.ticket.is_empty() {
            return Err(missing_field(None, "ticket"));
        }
        if record.user_id.is_empty() {
            return Err(missing_field(Some(&record.ticket), "userId"));
        }

        let base = api_url.trim_end_matches('/');
        let self_link = format!("{}/jobs/{}", base, record.ticket);
        let results = match record.status {
            JobStatus::Complete => Some(format!("{}/jobs/{}/results", base, record.ticket)),
            _ => None,
        };

        Ok(Self {
            query: record.query.clone(),
            results,
            sync_results: None,
            self_link,
            status: record.status,
            ticket: record.ticket.clone(),
            date_created: record.created_at,
            date_updated: record.updated_at,
            user_id: record.user_id.clone(),
        })
    }
}

fn missing_field(ticket: Option<&str>, field: &str) -> MeridianError {
    MeridianError::new(
        ErrorCode::JobFieldMissing,
        format!("Job record is missing required field '{}'", field),
    )
    .with_context(ErrorContext::Job {
        ticket: ticket.map(str::to_string),
        missing_field: field.to_string(),
    })
}

/// Issue a ticket for a user's query: the user id, a short digest of the
/// serialized query, and the creation time in epoch millis. The digest
/// keeps identical re-submissions distinguishable from unrelated ones in
/// logs without leaking query contents.
pub fn issue_ticket(user_id: &str, query: &serde_json::Value) -> String {
    let serialized = query.to_string();
    let digest = Sha512::digest(serialized.as_bytes());
    let short = &URL_SAFE_NO_PAD.encode(digest)[..12];
    format!("{}_{}_{}", user_id, short, Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn test_ticket_shape() {
        let ticket = issue_ticket("alice", &json!({"table": "pageviews"}));
        let parts: Vec<&str> = ticket.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "alice");
        assert_eq!(parts[1].len(), 12);
        assert!(parts[2].parse::<i64>().is_ok());
    }

    #[test]
    fn test_same_query_same_digest_component() {
        let q = json!({"table": "pageviews"});
        let a = issue_ticket("alice", &q);
        let b = issue_ticket("alice", &q);
        assert_eq!(a.split('_').nth(1), b.split('_').nth(1));
    }

    #[test]
    fn test_payload_links_depend_on_status() {
        let record = JobRecord::new(
            "alice_abc_1".to_string(),
            json!({"table": "pageviews"}),
            "alice".to_string(),
        );
        let api = "http://gw.internal/api/v1/";

        let pending = JobPayload::from_record(&record, api).unwrap();
        assert_eq!(pending.self_link, "http://gw.internal/api/v1/jobs/alice_abc_1");
        assert!(pending.results.is_none());

        let complete =
            JobPayload::from_record(&record.clone().with_status(JobStatus::Complete), api).unwrap();
        assert_eq!(
            complete.results.as_deref(),
            Some("http://gw.internal/api/v1/jobs/alice_abc_1/results")
        );
    }

    #[test]
    fn test_payload_rejects_empty_user() {
        let mut record = JobRecord::new(
            "t".to_string(),
            json!({}),
            "alice".to_string(),
        );
        record.user_id = String::new();

        let err = JobPayload::from_record(&record, "http://x").unwrap_err();
        assert_eq!(err.code, ErrorCode::JobFieldMissing);
        match err.context {
            Some(ErrorContext::Job { missing_field, .. }) => {
                assert_eq!(missing_field, "userId");
            }
            other => panic!("unexpected context: {:?}", other),
        }
    }

    #[test]
    fn test_payload_serializes_self_field() {
        let record = JobRecord::new(
            "alice_abc_1".to_string(),
            json!({}),
            "alice".to_string(),
        );
        let payload = JobPayload::from_record(&record, "http://x/api").unwrap();
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"self\":"));
        assert!(json.contains("\"dateCreated\":"));
        assert!(json.contains("\"userId\":\"alice\""));
    }
}
