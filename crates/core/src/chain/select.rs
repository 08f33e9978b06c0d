//! Priority selection stage.

use crate::chain::RequestHandler;
use crate::query::{BackendQuery, Priority, QueryRequest, ResponseContext, ResponseSink};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Routes heavy queries to the low-priority backend pool so interactive
/// traffic is not starved. Relies on the weight stage having run.
pub struct SelectStage {
    heavy_weight: u64,
    next: Arc<dyn RequestHandler>,
}

impl SelectStage {
    pub fn new(heavy_weight: u64, next: Arc<dyn RequestHandler>) -> Self {
        Self { heavy_weight, next }
    }
}

#[async_trait]
impl RequestHandler for SelectStage {
    fn name(&self) -> &str {
        "select"
    }

    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool> {
        if let Some(weight) = ctx.estimated_weight {
            if weight > self.heavy_weight {
                ctx.priority = Priority::Low;
                debug!(
                    target: "chain",
                    table = request.table,
                    weight,
                    "routing to low-priority pool"
                );
            }
        }
        self.next.handle(ctx, request, query, sink).await
    }
}
