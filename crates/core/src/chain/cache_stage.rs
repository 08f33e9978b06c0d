//! Cache lookup and write-back stage.

use crate::cache::{QueryFingerprint, ResponseCache};
use crate::chain::RequestHandler;
use crate::query::{BackendQuery, CacheStatus, QueryRequest, ResponseContext, ResponseSink};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Serves fingerprint hits directly and persists computed responses on
/// the way back up the chain. Only the parent query is cached; interval
/// shards produced by the splitting stage never reach this stage again.
pub struct CacheStage {
    cache: Arc<ResponseCache>,
    enabled: bool,
    next: Arc<dyn RequestHandler>,
}

impl CacheStage {
    pub fn new(cache: Arc<ResponseCache>, enabled: bool, next: Arc<dyn RequestHandler>) -> Self {
        Self {
            cache,
            enabled,
            next,
        }
    }
}

#[async_trait]
impl RequestHandler for CacheStage {
    fn name(&self) -> &str {
        "cache"
    }

    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool> {
        if !self.enabled {
            ctx.cache_status = CacheStatus::Bypass;
            return self.next.handle(ctx, request, query, sink).await;
        }

        let fingerprint = QueryFingerprint::of(&query);

        if let Some(mut cached) = self.cache.get(&fingerprint).await {
            ctx.cache_status = CacheStatus::Hit;
            // Availability may have moved since the entry was written;
            // partial-data annotations come from this request's context,
            // never from the write-time snapshot.
            cached.meta.cache_status = CacheStatus::Hit;
            cached.meta.missing_intervals = ctx.missing_intervals.clone();
            cached.meta.volatile_intervals = ctx.volatile_intervals.clone();
            cached.meta.partial_data = ctx.partial_data;
            debug!(target: "cache", table = query.data_source(), "serving cached response");
            sink.complete(cached).await;
            return Ok(false);
        }

        ctx.cache_status = CacheStatus::Miss;
        ctx.fingerprint = Some(fingerprint.clone());

        let ran = self.next.handle(ctx, request, query, sink).await?;

        if ran {
            if let Some(computed) = &ctx.computed {
                self.cache.put(&fingerprint, computed.clone()).await;
            }
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{Grain, Interval, IntervalSet};
    use crate::query::{QueryResponse, ResponseMetadata, ResultSet};
    use chrono::{TimeZone, Utc};
    use meridian_common::config::CacheSettings;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTerminal {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RequestHandler for CountingTerminal {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(
            &self,
            ctx: &mut ResponseContext,
            _request: &QueryRequest,
            _query: BackendQuery,
            sink: &ResponseSink,
        ) -> meridian_error::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = QueryResponse {
                results: ResultSet::default(),
                meta: ResponseMetadata {
                    missing_intervals: IntervalSet::empty(),
                    volatile_intervals: IntervalSet::empty(),
                    partial_data: false,
                    cache_status: ctx.cache_status,
                },
            };
            ctx.computed = Some(response.clone());
            sink.complete(response).await;
            Ok(true)
        }
    }

    fn sample_request() -> (QueryRequest, BackendQuery) {
        let intervals = IntervalSet::single(
            Interval::new(
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
            )
            .unwrap(),
        );
        let mut request = QueryRequest::new("pageviews", Grain::Day, intervals);
        request.metrics = vec!["views".to_string()];
        let query = BackendQuery::from_request(&request);
        (request, query)
    }

    #[tokio::test]
    async fn test_second_request_is_a_hit() {
        let cache = Arc::new(ResponseCache::new(&CacheSettings::default()));
        let terminal = Arc::new(CountingTerminal {
            calls: AtomicU32::new(0),
        });
        let stage = CacheStage::new(cache, true, terminal.clone());
        let (request, query) = sample_request();

        let mut ctx = ResponseContext::new();
        let (sink, rx) = ResponseSink::channel();
        let ran = stage
            .handle(&mut ctx, &request, query.clone(), &sink)
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(ctx.cache_status, CacheStatus::Miss);
        rx.await.unwrap().unwrap();

        let mut ctx2 = ResponseContext::new();
        let (sink2, rx2) = ResponseSink::channel();
        let ran2 = stage.handle(&mut ctx2, &request, query, &sink2).await.unwrap();
        assert!(!ran2);
        assert_eq!(ctx2.cache_status, CacheStatus::Hit);

        let response = rx2.await.unwrap().unwrap();
        assert_eq!(response.meta.cache_status, CacheStatus::Hit);
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hit_carries_current_partial_annotations() {
        let cache = Arc::new(ResponseCache::new(&CacheSettings::default()));
        let terminal = Arc::new(CountingTerminal {
            calls: AtomicU32::new(0),
        });
        let stage = CacheStage::new(cache, true, terminal.clone());
        let (request, query) = sample_request();

        // Populate the cache with a fully-covered response.
        let mut ctx = ResponseContext::new();
        let (sink, rx) = ResponseSink::channel();
        stage
            .handle(&mut ctx, &request, query.clone(), &sink)
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        // The second request arrives with fresh annotations: part of the
        // window has since been flagged missing upstream.
        let now_missing = IntervalSet::single(
            Interval::new(
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
            )
            .unwrap(),
        );
        let mut ctx2 = ResponseContext::new();
        ctx2.missing_intervals = now_missing.clone();
        ctx2.partial_data = true;
        let (sink2, rx2) = ResponseSink::channel();
        let ran2 = stage.handle(&mut ctx2, &request, query, &sink2).await.unwrap();
        assert!(!ran2);

        let response = rx2.await.unwrap().unwrap();
        assert_eq!(response.meta.cache_status, CacheStatus::Hit);
        assert!(response.meta.partial_data);
        assert_eq!(response.meta.missing_intervals, now_missing);
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_bypasses() {
        let cache = Arc::new(ResponseCache::new(&CacheSettings::default()));
        let terminal = Arc::new(CountingTerminal {
            calls: AtomicU32::new(0),
        });
        let stage = CacheStage::new(cache, false, terminal.clone());
        let (request, query) = sample_request();

        for _ in 0..2 {
            let mut ctx = ResponseContext::new();
            let (sink, rx) = ResponseSink::channel();
            stage
                .handle(&mut ctx, &request, query.clone(), &sink)
                .await
                .unwrap();
            assert_eq!(ctx.cache_status, CacheStatus::Bypass);
            rx.await.unwrap().unwrap();
        }
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 2);
    }
}
