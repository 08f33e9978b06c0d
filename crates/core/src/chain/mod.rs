//! The request handler chain.
//!
//! Every query travels down a fixed sequence of stages, each of which may
//! annotate the [`ResponseContext`], resolve the request early through the
//! [`ResponseSink`], or reject it with an error. The stages are, in order:
//!
//! 1. partial data detection (availability, missing intervals, masking)
//! 2. cache lookup and write-back
//! 3. interval splitting for wide queries
//! 4. weight-based admission
//! 5. priority selection
//! 6. SQL routing
//! 7. sorting, top-N, and pagination validation
//! 8. backend dispatch and response assembly
//!
//! A stage returns `Ok(true)` when the request ran to dispatch, `Ok(false)`
//! when it was resolved early (cache hit, backend failure already reported
//! through the sink), and `Err` for validation and admission rejections,
//! which the pipeline driver routes to the sink.

mod cache_stage;
mod dispatch;
mod paging;
mod partial_data;
mod select;
mod split;
mod sql_route;
mod weight;

pub use cache_stage::CacheStage;
pub use dispatch::DispatchStage;
pub use paging::PagingStage;
pub use partial_data::PartialDataStage;
pub use select::SelectStage;
pub use split::SplitStage;
pub use sql_route::SqlRouteStage;
pub use weight::WeightStage;

use crate::backend::BackendPool;
use crate::cache::ResponseCache;
use crate::query::{BackendQuery, QueryRequest, ResponseContext, ResponseSink};
use crate::table::{AvailabilitySource, TableRegistry};
use async_trait::async_trait;
use meridian_common::config::AppConfig;
use std::sync::Arc;

/// One stage of the request chain.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Process the request, delegating to the next stage as appropriate.
    ///
    /// `Ok(true)` means dispatch completed; `Ok(false)` means the request
    /// was resolved through the sink before reaching the backend.
    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool>;
}

/// Assemble the full chain back to front.
pub fn build_chain(
    registry: TableRegistry,
    availability: Arc<dyn AvailabilitySource>,
    cache: Arc<ResponseCache>,
    pool: Arc<BackendPool>,
    config: &AppConfig,
) -> Arc<dyn RequestHandler> {
    let dispatch = Arc::new(DispatchStage::new(pool));
    let paging = Arc::new(PagingStage::new(dispatch));
    let sql_route = Arc::new(SqlRouteStage::new(paging));
    let select = Arc::new(SelectStage::new(config.admission.heavy_weight, sql_route));
    let weight = Arc::new(WeightStage::new(
        config.admission.max_weight,
        registry.clone(),
        select,
    ));
    let split = Arc::new(SplitStage::new(config.split.max_buckets_per_query, weight));
    let cache_stage = Arc::new(CacheStage::new(cache, config.cache.enabled, split));
    Arc::new(PartialDataStage::new(
        registry,
        availability,
        config.partial_data.mask_missing,
        cache_stage,
    ))
}
