//! Terminal stage: backend dispatch and response assembly.

use crate::backend::{BackendError, BackendPool};
use crate::chain::RequestHandler;
use crate::mappers::apply_mappers;
use crate::query::{
    BackendQuery, QueryRequest, QueryResponse, ResponseContext, ResponseSink, ResultSet,
};
use async_trait::async_trait;
use futures::future::try_join_all;
use meridian_error::{ErrorCode, ErrorContext, MeridianError};
use std::sync::Arc;
use tracing::{debug, error};

/// Executes the backend query (fanning out over interval shards when the
/// splitting stage produced them), applies the registered mappers once
/// over the combined rows, and resolves the sink.
pub struct DispatchStage {
    pool: Arc<BackendPool>,
}

impl DispatchStage {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self { pool }
    }

    async fn execute(
        &self,
        ctx: &ResponseContext,
        query: &BackendQuery,
    ) -> Result<ResultSet, BackendError> {
        let client = self.pool.select(ctx.route, ctx.priority);

        match &ctx.shards {
            None => client.execute(query).await,
            Some(shards) => {
                let futures = shards
                    .iter()
                    .map(|shard| {
                        let shard_query = query.with_intervals(shard.clone());
                        let client = client.clone();
                        async move { client.execute(&shard_query).await }
                    })
                    .collect::<Vec<_>>();

                // try_join_all preserves shard order, so concatenation
                // keeps rows in time order.
                let parts = try_join_all(futures).await?;
                let mut combined = ResultSet::default();
                for part in parts {
                    combined.extend(part);
                }
                Ok(combined)
            }
        }
    }
}

fn convert(err: BackendError, data_source: &str) -> MeridianError {
    let endpoint = err.endpoint().to_string();
    let code = match &err {
        BackendError::Timeout { .. } => ErrorCode::BackendTimeout,
        BackendError::Execution { .. } => ErrorCode::BackendFailed,
        BackendError::Unavailable { .. } => ErrorCode::BackendUnavailable,
    };
    MeridianError::new(code, err.to_string()).with_context(ErrorContext::Backend {
        endpoint,
        data_source: data_source.to_string(),
    })
}

#[async_trait]
impl RequestHandler for DispatchStage {
    fn name(&self) -> &str {
        "dispatch"
    }

    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        _request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool> {
        let raw = match self.execute(ctx, &query).await {
            Ok(results) => results,
            Err(err) => {
                error!(
                    target: "chain",
                    table = query.data_source(),
                    error = %err,
                    "backend dispatch failed"
                );
                sink.fail(convert(err, query.data_source())).await;
                return Ok(false);
            }
        };

        debug!(
            target: "chain",
            table = query.data_source(),
            rows = raw.len(),
            sharded = ctx.shards.is_some(),
            "backend dispatch complete"
        );

        let results = apply_mappers(raw, ctx)?;
        let response = QueryResponse {
            results,
            meta: ctx.metadata(),
        };
        ctx.computed = Some(response.clone());
        sink.complete(response).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendClient;
    use crate::interval::{Grain, Interval, IntervalSet};
    use crate::query::Row;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ShardEchoBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl BackendClient for ShardEchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, query: &BackendQuery) -> Result<ResultSet, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut row = Row::new();
            row.insert(
                "start".to_string(),
                json!(query.intervals().start().map(|t| t.to_rfc3339())),
            );
            Ok(ResultSet::new(vec![row]))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl BackendClient for FailingBackend {
        fn name(&self) -> &str {
            "broken"
        }

        async fn execute(&self, _query: &BackendQuery) -> Result<ResultSet, BackendError> {
            Err(BackendError::Unavailable {
                endpoint: "broken:8082".to_string(),
            })
        }
    }

    fn query(days: u32) -> (QueryRequest, BackendQuery) {
        let intervals = IntervalSet::single(
            Interval::new(
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2020, 1, 1 + days, 0, 0, 0).unwrap(),
            )
            .unwrap(),
        );
        let request = QueryRequest::new("pageviews", Grain::Day, intervals);
        let query = BackendQuery::from_request(&request);
        (request, query)
    }

    #[tokio::test]
    async fn test_sharded_dispatch_fans_out_in_order() {
        let backend = Arc::new(ShardEchoBackend {
            calls: AtomicU32::new(0),
        });
        let stage = DispatchStage::new(Arc::new(BackendPool::new(backend.clone())));
        let (request, q) = query(4);

        let mut ctx = ResponseContext::new();
        ctx.shards = Some(
            q.intervals()
                .iter()
                .flat_map(|run| Grain::Day.buckets(run))
                .map(IntervalSet::single)
                .collect(),
        );
        let (sink, rx) = ResponseSink::channel();

        let ran = stage.handle(&mut ctx, &request, q, &sink).await.unwrap();
        assert!(ran);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.results.len(), 4);
        // Rows arrive in shard order.
        let starts: Vec<String> = response
            .results
            .rows
            .iter()
            .map(|r| r["start"].as_str().unwrap().to_string())
            .collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[tokio::test]
    async fn test_backend_failure_resolves_sink_with_error() {
        let stage = DispatchStage::new(Arc::new(BackendPool::new(Arc::new(FailingBackend))));
        let (request, q) = query(1);
        let mut ctx = ResponseContext::new();
        let (sink, rx) = ResponseSink::channel();

        let ran = stage.handle(&mut ctx, &request, q, &sink).await.unwrap();
        assert!(!ran);

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::BackendUnavailable);
        match err.context {
            Some(ErrorContext::Backend { endpoint, data_source }) => {
                assert_eq!(endpoint, "broken:8082");
                assert_eq!(data_source, "pageviews");
            }
            other => panic!("unexpected context: {:?}", other),
        }
    }
}
