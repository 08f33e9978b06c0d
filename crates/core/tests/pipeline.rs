//! End-to-end pipeline tests over an in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use meridian_common::config::AppConfig;
use meridian_core::backend::{BackendClient, BackendError, BackendPool};
use meridian_core::interval::{Grain, Interval, IntervalSet};
use meridian_core::jobs::channel::InMemoryNotificationChannel;
use meridian_core::jobs::store::{InMemoryJobStore, InMemoryResultStore};
use meridian_core::jobs::JobStatus;
use meridian_core::pipeline::{ExecutionOutcome, Pipeline};
use meridian_core::query::{BackendQuery, CacheStatus, QueryRequest, ResultSet, Row};
use meridian_core::table::{
    Availability, LogicalTable, PhysicalTable, StaticAvailability, TableRegistry,
};
use meridian_error::ErrorCode;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
}

fn days(from: u32, to: u32) -> IntervalSet {
    IntervalSet::single(Interval::new(day(from), day(to)).unwrap())
}

/// Emits one row per day bucket, counting how often it is called.
struct DayCountingBackend {
    calls: AtomicU32,
    delay: Duration,
}

impl DayCountingBackend {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            delay,
        }
    }
}

#[async_trait]
impl BackendClient for DayCountingBackend {
    fn name(&self) -> &str {
        "test-backend"
    }

    async fn execute(&self, query: &BackendQuery) -> Result<ResultSet, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let rows: Vec<Row> = query
            .intervals()
            .iter()
            .flat_map(|run| query.grain().buckets(run))
            .map(|bucket| {
                let mut row = Row::new();
                row.insert("timestamp".to_string(), json!(bucket.start().to_rfc3339()));
                row.insert("added".to_string(), json!(42));
                row
            })
            .collect();
        Ok(ResultSet::new(rows))
    }
}

fn registry() -> TableRegistry {
    let mut registry = TableRegistry::new();
    registry.register(LogicalTable::Physical(
        PhysicalTable::new("edits", Grain::Day)
            .with_columns(["added"])
            .with_dimension("country", 200),
    ));
    registry
}

fn pipeline_with(
    backend: Arc<DayCountingBackend>,
    availability: StaticAvailability,
    config: AppConfig,
) -> Pipeline {
    meridian_common::telemetry::init_telemetry("warn");
    Pipeline::new(
        registry(),
        Arc::new(availability),
        Arc::new(BackendPool::new(backend)),
        Arc::new(InMemoryJobStore::new()),
        Arc::new(InMemoryResultStore::new()),
        Arc::new(InMemoryNotificationChannel::default()),
        &config,
    )
}

fn request(from: u32, to: u32) -> QueryRequest {
    let mut request = QueryRequest::new("edits", Grain::Day, days(from, to));
    request.metrics = vec!["added".to_string()];
    request
}

#[tokio::test]
async fn test_partial_data_annotated_in_response() {
    let backend = Arc::new(DayCountingBackend::new());
    let availability = StaticAvailability::new()
        .with_table("edits", Availability::Known(days(1, 3)));
    let pipeline = pipeline_with(backend, availability, AppConfig::default());

    let outcome = pipeline.execute(request(1, 5)).await.unwrap();
    let response = match outcome {
        ExecutionOutcome::Completed(response) => response,
        other => panic!("expected completion, got {:?}", other),
    };

    assert!(response.meta.partial_data);
    // Days 3 and 4 are uncovered; they merge into one run.
    assert_eq!(response.meta.missing_intervals.runs().len(), 1);
    assert_eq!(response.meta.missing_intervals.start(), Some(day(3)));
    assert_eq!(response.meta.missing_intervals.end(), Some(day(5)));
    // Rows are still returned in full without masking.
    assert_eq!(response.results.len(), 4);
}

#[tokio::test]
async fn test_masking_drops_uncovered_rows() {
    let backend = Arc::new(DayCountingBackend::new());
    let availability = StaticAvailability::new()
        .with_table("edits", Availability::Known(days(1, 3)));
    let mut config = AppConfig::default();
    config.partial_data.mask_missing = true;
    let pipeline = pipeline_with(backend, availability, config);

    let outcome = pipeline.execute(request(1, 5)).await.unwrap();
    let response = match outcome {
        ExecutionOutcome::Completed(response) => response,
        other => panic!("expected completion, got {:?}", other),
    };

    assert!(response.meta.partial_data);
    // Only the covered days 1 and 2 survive.
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn test_repeat_query_served_from_cache() {
    let backend = Arc::new(DayCountingBackend::new());
    let availability =
        StaticAvailability::new().with_table("edits", Availability::AlwaysAvailable);
    let pipeline = pipeline_with(backend.clone(), availability, AppConfig::default());

    let first = pipeline.execute(request(1, 3)).await.unwrap();
    match first {
        ExecutionOutcome::Completed(response) => {
            assert_eq!(response.meta.cache_status, CacheStatus::Miss);
        }
        other => panic!("expected completion, got {:?}", other),
    }

    let second = pipeline.execute(request(1, 3)).await.unwrap();
    match second {
        ExecutionOutcome::Completed(response) => {
            assert_eq!(response.meta.cache_status, CacheStatus::Hit);
        }
        other => panic!("expected completion, got {:?}", other),
    }

    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_heavy_query_rejected_before_backend() {
    let backend = Arc::new(DayCountingBackend::new());
    let availability =
        StaticAvailability::new().with_table("edits", Availability::AlwaysAvailable);
    let mut config = AppConfig::default();
    config.admission.max_weight = 100;
    let pipeline = pipeline_with(backend.clone(), availability, config);

    let mut req = request(1, 5);
    req.dimensions = vec!["country".to_string()];

    let err = pipeline.execute(req).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::WeightExceeded);
    assert!(err.hint.is_some());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_split_query_fans_out_and_reassembles() {
    let backend = Arc::new(DayCountingBackend::new());
    let availability =
        StaticAvailability::new().with_table("edits", Availability::AlwaysAvailable);
    let mut config = AppConfig::default();
    config.split.max_buckets_per_query = 2;
    let pipeline = pipeline_with(backend.clone(), availability, config);

    let outcome = pipeline.execute(request(1, 7)).await.unwrap();
    let response = match outcome {
        ExecutionOutcome::Completed(response) => response,
        other => panic!("expected completion, got {:?}", other),
    };

    // 6 buckets in shards of 2: three backend calls, all rows present,
    // time-ordered.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(response.results.len(), 6);
    let stamps: Vec<&str> = response
        .results
        .rows
        .iter()
        .map(|r| r["timestamp"].as_str().unwrap())
        .collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);
}

#[tokio::test]
async fn test_unknown_table_is_client_fault() {
    let backend = Arc::new(DayCountingBackend::new());
    let pipeline = pipeline_with(backend, StaticAvailability::new(), AppConfig::default());

    let mut req = request(1, 3);
    req.table = "nope".to_string();

    let err = pipeline.execute(req).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::TableNotFound);
    assert!(err.is_client_fault());
}

#[tokio::test]
async fn test_slow_query_promotes_to_ticket() {
    let backend = Arc::new(DayCountingBackend::slow(Duration::from_millis(200)));
    let availability =
        StaticAvailability::new().with_table("edits", Availability::AlwaysAvailable);
    let pipeline = pipeline_with(backend, availability, AppConfig::default());

    let mut req = request(1, 3);
    req.user_id = "alice".to_string();
    req.async_after = meridian_core::query::AsyncAfter::After(Duration::from_millis(10));

    let outcome = pipeline.execute(req).await.unwrap();
    let payload = match outcome {
        ExecutionOutcome::Ticketed(payload) => payload,
        other => panic!("expected ticket, got {:?}", other),
    };
    assert!(payload.ticket.starts_with("alice_"));
    // The ticket reflects the stored record, which is already running.
    assert_eq!(payload.status, JobStatus::Running);
    assert!(payload.results.is_none());

    // The job finishes in the background; long-poll for its result.
    let result = pipeline
        .coordinator()
        .await_result(&payload.ticket, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(result.is_some());
    assert_eq!(result.unwrap().results.len(), 2);
}

#[tokio::test]
async fn test_fast_query_completes_within_window() {
    let backend = Arc::new(DayCountingBackend::new());
    let availability =
        StaticAvailability::new().with_table("edits", Availability::AlwaysAvailable);
    let pipeline = pipeline_with(backend, availability, AppConfig::default());

    let mut req = request(1, 3);
    req.async_after = meridian_core::query::AsyncAfter::After(Duration::from_secs(5));

    let outcome = pipeline.execute(req).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
}

#[tokio::test]
async fn test_always_async_returns_ticket_immediately() {
    let backend = Arc::new(DayCountingBackend::new());
    let availability =
        StaticAvailability::new().with_table("edits", Availability::AlwaysAvailable);
    let pipeline = pipeline_with(backend, availability, AppConfig::default());

    let mut req = request(1, 3);
    req.async_after = meridian_core::query::AsyncAfter::Always;

    let outcome = pipeline.execute(req.clone()).await.unwrap();
    let payload = match outcome {
        ExecutionOutcome::Ticketed(payload) => payload,
        other => panic!("expected ticket, got {:?}", other),
    };

    let result = pipeline
        .coordinator()
        .await_result(&payload.ticket, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(result.is_some());
}
