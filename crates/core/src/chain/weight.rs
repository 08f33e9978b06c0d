//! Weight-based admission control.

use crate::chain::RequestHandler;
use crate::query::{BackendQuery, QueryRequest, ResponseContext, ResponseSink};
use crate::table::TableRegistry;
use async_trait::async_trait;
use meridian_error::{ErrorCode, ErrorContext, MeridianError};
use std::sync::Arc;
use tracing::debug;

/// Rejects queries whose estimated result size exceeds the configured
/// limit before they reach a backend. The estimate is the product of the
/// grouped dimensions' cardinalities times the bucket count, an upper
/// bound on the number of result rows.
pub struct WeightStage {
    max_weight: u64,
    registry: TableRegistry,
    next: Arc<dyn RequestHandler>,
}

impl WeightStage {
    pub fn new(max_weight: u64, registry: TableRegistry, next: Arc<dyn RequestHandler>) -> Self {
        Self {
            max_weight,
            registry,
            next,
        }
    }

    fn estimate(&self, request: &QueryRequest, query: &BackendQuery) -> u64 {
        let cardinality: u64 = match self.registry.get(&request.table) {
            Some(table) => request
                .dimensions
                .iter()
                .map(|d| table.dimension(d).map(|info| info.cardinality).unwrap_or(1))
                .fold(1u64, u64::saturating_mul),
            None => 1,
        };
        let buckets = query.grain().bucket_count(query.intervals()).max(1);
        cardinality.saturating_mul(buckets)
    }
}

#[async_trait]
impl RequestHandler for WeightStage {
    fn name(&self) -> &str {
        "weight"
    }

    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool> {
        let weight = self.estimate(request, &query);
        debug!(
            target: "chain",
            table = request.table,
            weight,
            limit = self.max_weight,
            "estimated query weight"
        );

        if weight > self.max_weight {
            return Err(MeridianError::new(
                ErrorCode::WeightExceeded,
                format!(
                    "Estimated result weight {} exceeds limit {}",
                    weight, self.max_weight
                ),
            )
            .with_context(ErrorContext::WeightExceeded {
                estimated_weight: weight,
                limit: self.max_weight,
                grouping_dimensions: request.dimensions.clone(),
            })
            .with_hint("Add a filter to reduce the grouping cardinality"));
        }

        ctx.estimated_weight = Some(weight);
        self.next.handle(ctx, request, query, sink).await
    }
}
