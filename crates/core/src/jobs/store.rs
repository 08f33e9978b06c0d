//! Job metadata and result stores.
//!
//! The two stores are deliberately separate traits: job records are small
//! and long-lived, results are large and aged out sooner. Saves are
//! last-write-wins upserts.

use crate::jobs::JobRecord;
use crate::query::QueryResponse;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store save failed: {0}")]
    Save(String),

    #[error("store read failed: {0}")]
    Read(String),
}

/// Persistence for job bookkeeping records, keyed by ticket.
#[async_trait]
pub trait ApiJobStore: Send + Sync {
    async fn save(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn get(&self, ticket: &str) -> Result<Option<JobRecord>, StoreError>;
}

/// A completed response held for later retrieval.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub response: QueryResponse,
    pub saved_at: DateTime<Utc>,
}

/// Persistence for completed query results, keyed by ticket.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, ticket: &str, response: QueryResponse) -> Result<(), StoreError>;

    async fn get(&self, ticket: &str) -> Result<Option<StoredResult>, StoreError>;
}

/// In-process job store for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiJobStore for InMemoryJobStore {
    async fn save(&self, record: JobRecord) -> Result<(), StoreError> {
        debug!(target: "jobs", ticket = record.ticket, status = ?record.status, "saving job record");
        self.records
            .write()
            .await
            .insert(record.ticket.clone(), record);
        Ok(())
    }

    async fn get(&self, ticket: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(ticket).cloned())
    }
}

/// In-process result store.
#[derive(Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<String, StoredResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save(&self, ticket: &str, response: QueryResponse) -> Result<(), StoreError> {
        self.results.write().await.insert(
            ticket.to_string(),
            StoredResult {
                response,
                saved_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, ticket: &str) -> Result<Option<StoredResult>, StoreError> {
        Ok(self.results.read().await.get(ticket).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::IntervalSet;
    use crate::jobs::JobStatus;
    use crate::query::{CacheStatus, ResponseMetadata, ResultSet};
    use serde_json::json;

    fn response() -> QueryResponse {
        QueryResponse {
            results: ResultSet::default(),
            meta: ResponseMetadata {
                missing_intervals: IntervalSet::empty(),
                volatile_intervals: IntervalSet::empty(),
                partial_data: false,
                cache_status: CacheStatus::Miss,
            },
        }
    }

    #[tokio::test]
    async fn test_job_store_upsert_is_last_write_wins() {
        let store = InMemoryJobStore::new();
        let record = JobRecord::new("t1".to_string(), json!({}), "alice".to_string());

        store.save(record.clone()).await.unwrap();
        store
            .save(record.clone().with_status(JobStatus::Complete))
            .await
            .unwrap();

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_result_store_roundtrip() {
        let store = InMemoryResultStore::new();
        assert!(store.get("t1").await.unwrap().is_none());

        store.save("t1", response()).await.unwrap();
        let stored = store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.response, response());
    }
}
