//! The query pipeline facade.
//!
//! [`Pipeline`] wires the handler chain, the response cache, the backend
//! pool, and the job coordinator together, and owns the synchronous-wait
//! versus asynchronous-promotion decision: a request runs on the chain in
//! a spawned task, and if its sync window elapses before the task
//! resolves, the caller gets a ticket while the task keeps running.

use crate::backend::BackendPool;
use crate::cache::ResponseCache;
use crate::chain::{build_chain, RequestHandler};
use crate::jobs::channel::NotificationChannel;
use crate::jobs::runner::JobCoordinator;
use crate::jobs::store::{ApiJobStore, ResultStore};
use crate::jobs::JobPayload;
use crate::query::{AsyncAfter, BackendQuery, QueryRequest, QueryResponse, ResponseContext, ResponseSink};
use crate::table::{AvailabilitySource, TableRegistry};
use meridian_common::config::AppConfig;
use meridian_error::{ErrorCode, MeridianError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a request resolved from the caller's point of view.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The query finished within its synchronous window.
    Completed(QueryResponse),
    /// The query was promoted; poll the ticket for the result.
    Ticketed(JobPayload),
}

pub struct Pipeline {
    chain: Arc<dyn RequestHandler>,
    coordinator: Arc<JobCoordinator>,
    cache: Arc<ResponseCache>,
    default_async_after: Option<Duration>,
}

impl Pipeline {
    pub fn new(
        registry: TableRegistry,
        availability: Arc<dyn AvailabilitySource>,
        pool: Arc<BackendPool>,
        jobs: Arc<dyn ApiJobStore>,
        results: Arc<dyn ResultStore>,
        channel: Arc<dyn NotificationChannel>,
        config: &AppConfig,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let chain = build_chain(registry, availability, cache.clone(), pool, config);
        let coordinator = Arc::new(JobCoordinator::new(
            jobs,
            results,
            channel,
            config.gateway.api_url.clone(),
        ));
        Self {
            chain,
            coordinator,
            cache,
            default_async_after: config
                .gateway
                .default_async_after_ms
                .map(Duration::from_millis),
        }
    }

    pub fn coordinator(&self) -> Arc<JobCoordinator> {
        self.coordinator.clone()
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    /// Run a query to completion or promotion.
    pub async fn execute(&self, request: QueryRequest) -> meridian_error::Result<ExecutionOutcome> {
        self.execute_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but the caller can abandon the
    /// query while it is still synchronous. Cancellation after promotion
    /// has no effect; the job finishes and lands in the store.
    pub async fn execute_with_cancel(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> meridian_error::Result<ExecutionOutcome> {
        let query = BackendQuery::from_request(&request);
        let (sink, mut rx) = ResponseSink::channel();
        let task_cancel = CancellationToken::new();

        {
            let chain = self.chain.clone();
            let request = request.clone();
            let task_cancel = task_cancel.clone();
            tokio::spawn(async move {
                let mut ctx = ResponseContext::new();
                tokio::select! {
                    _ = task_cancel.cancelled() => {}
                    result = chain.handle(&mut ctx, &request, query, &sink) => {
                        if let Err(error) = result {
                            sink.fail(error).await;
                        }
                    }
                }
            });
        }

        let window = self.effective_window(&request);
        match window {
            AsyncAfter::Always => self.promote(&request, rx).await,
            AsyncAfter::Never => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        task_cancel.cancel();
                        Err(cancelled(&request))
                    }
                    outcome = &mut rx => finish(outcome),
                }
            }
            AsyncAfter::After(window) => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        task_cancel.cancel();
                        Err(cancelled(&request))
                    }
                    outcome = tokio::time::timeout(window, &mut rx) => match outcome {
                        Ok(resolved) => finish(resolved),
                        Err(_elapsed) => {
                            info!(
                                target: "jobs",
                                table = request.table,
                                window_ms = window.as_millis() as u64,
                                "sync window elapsed, promoting to job"
                            );
                            self.promote(&request, rx).await
                        }
                    },
                }
            }
        }
    }

    fn effective_window(&self, request: &QueryRequest) -> AsyncAfter {
        match request.async_after {
            AsyncAfter::Never => match self.default_async_after {
                Some(window) => AsyncAfter::After(window),
                None => AsyncAfter::Never,
            },
            other => other,
        }
    }

    async fn promote(
        &self,
        request: &QueryRequest,
        rx: oneshot::Receiver<Result<QueryResponse, MeridianError>>,
    ) -> meridian_error::Result<ExecutionOutcome> {
        let record = self
            .coordinator
            .create_job(describe_request(request), &request.user_id)
            .await?;
        // Hand the caller the record as stored, not the pre-transition
        // snapshot: the payload must report the job as running.
        let record = self.coordinator.mark_running(&record).await?;

        let coordinator = self.coordinator.clone();
        let watched = record.clone();
        tokio::spawn(async move {
            let outcome = match rx.await {
                Ok(Ok(response)) => coordinator.complete(&watched, response).await,
                Ok(Err(error)) => coordinator.fail(&watched, &error).await,
                Err(_) => {
                    let error = MeridianError::new(
                        ErrorCode::InternalPanic,
                        "Query task ended without resolving its sink",
                    );
                    coordinator.fail(&watched, &error).await
                }
            };
            if let Err(error) = outcome {
                warn!(target: "jobs", ticket = watched.ticket, error = %error, "job bookkeeping failed");
            }
        });

        let payload = JobPayload::from_record(&record, self.coordinator.api_url())?;
        Ok(ExecutionOutcome::Ticketed(payload))
    }
}

fn finish(
    outcome: Result<Result<QueryResponse, MeridianError>, oneshot::error::RecvError>,
) -> meridian_error::Result<ExecutionOutcome> {
    match outcome {
        Ok(Ok(response)) => Ok(ExecutionOutcome::Completed(response)),
        Ok(Err(error)) => Err(error),
        Err(_) => Err(MeridianError::new(
            ErrorCode::InternalPanic,
            "Query task ended without resolving its sink",
        )),
    }
}

fn cancelled(request: &QueryRequest) -> MeridianError {
    MeridianError::new(
        ErrorCode::QueryCancelled,
        format!("Query against '{}' was cancelled", request.table),
    )
}

/// Serializable description of the request, stored with the job record.
fn describe_request(request: &QueryRequest) -> serde_json::Value {
    json!({
        "table": request.table,
        "grain": request.grain,
        "intervals": request.intervals,
        "dimensions": request.dimensions,
        "metrics": request.metrics,
        "filters": request.filters,
        "dialect": request.dialect,
    })
}
