//! SQL routing stage.

use crate::chain::RequestHandler;
use crate::query::{BackendQuery, QueryDialect, QueryRequest, ResponseContext, ResponseSink, Route};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Marks SQL-dialect requests for the SQL backend pool. If no SQL pool is
/// configured, the dispatch stage falls back to the default pool.
pub struct SqlRouteStage {
    next: Arc<dyn RequestHandler>,
}

impl SqlRouteStage {
    pub fn new(next: Arc<dyn RequestHandler>) -> Self {
        Self { next }
    }
}

#[async_trait]
impl RequestHandler for SqlRouteStage {
    fn name(&self) -> &str {
        "sql_route"
    }

    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool> {
        if request.dialect == QueryDialect::Sql {
            ctx.route = Route::Sql;
            debug!(target: "chain", table = request.table, "routing to sql backend");
        }
        self.next.handle(ctx, request, query, sink).await
    }
}
