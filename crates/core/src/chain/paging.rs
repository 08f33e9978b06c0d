//! Sorting, top-N, and pagination validation.

use crate::chain::RequestHandler;
use crate::mappers::{PaginationMapper, SortMapper, TopNMapper};
use crate::query::{BackendQuery, QueryRequest, ResponseContext, ResponseSink};
use async_trait::async_trait;
use meridian_error::{ErrorCode, ErrorContext, MeridianError};
use std::sync::Arc;

/// Validates the presentation parameters and registers the row mappers
/// the dispatch stage applies: sorting first, then top-N truncation, with
/// pagination always last.
pub struct PagingStage {
    next: Arc<dyn RequestHandler>,
}

impl PagingStage {
    pub fn new(next: Arc<dyn RequestHandler>) -> Self {
        Self { next }
    }

    fn validate(request: &QueryRequest) -> meridian_error::Result<()> {
        if let Some(p) = &request.pagination {
            if p.page == 0 || p.per_page == 0 {
                return Err(MeridianError::new(
                    ErrorCode::InvalidPagination,
                    "Pagination requires page >= 1 and per_page >= 1",
                )
                .with_context(ErrorContext::Paging {
                    page: Some(p.page),
                    per_page: Some(p.per_page),
                    top_n: request.top_n,
                }));
            }
        }

        if request.top_n.is_some() && request.sort.is_none() {
            return Err(MeridianError::new(
                ErrorCode::TopNWithoutSort,
                "top_n requires an explicit sort column",
            )
            .with_context(ErrorContext::Paging {
                page: request.pagination.map(|p| p.page),
                per_page: request.pagination.map(|p| p.per_page),
                top_n: request.top_n,
            })
            .with_hint("Add a sort specification so the truncation is deterministic"));
        }
        Ok(())
    }
}

#[async_trait]
impl RequestHandler for PagingStage {
    fn name(&self) -> &str {
        "paging"
    }

    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool> {
        Self::validate(request)?;

        if let Some(sort) = &request.sort {
            ctx.push_mapper(Arc::new(SortMapper::new(sort.clone())));
        }
        if let Some(limit) = request.top_n {
            ctx.push_mapper(Arc::new(TopNMapper::new(limit)));
        }
        if let Some(pagination) = request.pagination {
            ctx.push_mapper(Arc::new(PaginationMapper::new(pagination)));
        }

        self.next.handle(ctx, request, query, sink).await
    }
}
