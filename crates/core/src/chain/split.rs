//! Interval splitting for wide queries.

use crate::chain::RequestHandler;
use crate::interval::IntervalSet;
use crate::query::{BackendQuery, QueryRequest, ResponseContext, ResponseSink};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Splits queries spanning many grain buckets into interval shards that
/// the dispatch stage fans out concurrently. Shard order follows bucket
/// order so fan-in concatenation preserves time order.
pub struct SplitStage {
    max_buckets: u64,
    next: Arc<dyn RequestHandler>,
}

impl SplitStage {
    pub fn new(max_buckets: u64, next: Arc<dyn RequestHandler>) -> Self {
        Self { max_buckets, next }
    }
}

#[async_trait]
impl RequestHandler for SplitStage {
    fn name(&self) -> &str {
        "split"
    }

    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool> {
        if self.max_buckets == 0 {
            return self.next.handle(ctx, request, query, sink).await;
        }

        let buckets: Vec<_> = query
            .intervals()
            .iter()
            .flat_map(|run| query.grain().buckets(run))
            .collect();

        if buckets.len() as u64 <= self.max_buckets {
            return self.next.handle(ctx, request, query, sink).await;
        }

        let shards: Vec<IntervalSet> = buckets
            .chunks(self.max_buckets as usize)
            .map(|chunk| IntervalSet::of(chunk.iter().copied()))
            .collect();

        debug!(
            target: "chain",
            table = query.data_source(),
            buckets = buckets.len(),
            shards = shards.len(),
            "splitting query"
        );
        ctx.shards = Some(shards);

        self.next.handle(ctx, request, query, sink).await
    }
}
