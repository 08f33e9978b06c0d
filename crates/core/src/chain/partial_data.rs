//! Chain entry stage: request validation and partial-data detection.

use crate::chain::RequestHandler;
use crate::mappers::MissingIntervalMapper;
use crate::partial::{missing_intervals, volatile_overlap};
use crate::query::{BackendQuery, QueryRequest, ResponseContext, ResponseSink};
use crate::table::{AvailabilitySource, Constraint, LogicalTable, TableRegistry};
use async_trait::async_trait;
use meridian_error::{ErrorCode, ErrorContext, MeridianError};
use std::sync::Arc;
use tracing::debug;

/// Resolves the logical table, validates the columns the query touches,
/// and computes missing and volatile intervals before anything else runs.
pub struct PartialDataStage {
    registry: TableRegistry,
    availability: Arc<dyn AvailabilitySource>,
    mask_missing: bool,
    next: Arc<dyn RequestHandler>,
}

impl PartialDataStage {
    pub fn new(
        registry: TableRegistry,
        availability: Arc<dyn AvailabilitySource>,
        mask_missing: bool,
        next: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            registry,
            availability,
            mask_missing,
            next,
        }
    }

    fn resolve_table(&self, request: &QueryRequest) -> meridian_error::Result<Arc<LogicalTable>> {
        self.registry.get(&request.table).ok_or_else(|| {
            MeridianError::new(
                ErrorCode::TableNotFound,
                format!("Unknown table '{}'", request.table),
            )
            .with_context(ErrorContext::TableNotFound {
                table: request.table.clone(),
                available_tables: self.registry.names(),
            })
        })
    }

    fn validate_columns(
        &self,
        table: &LogicalTable,
        request: &QueryRequest,
    ) -> meridian_error::Result<()> {
        let metric_columns = table.columns();
        let dimension_names = table.dimension_names();

        for metric in &request.metrics {
            if !metric_columns.contains(metric) {
                return Err(unknown_column(metric, table, &metric_columns, &dimension_names));
            }
        }
        for dimension in &request.dimensions {
            if !dimension_names.iter().any(|d| d == dimension) {
                return Err(unknown_column(
                    dimension,
                    table,
                    &metric_columns,
                    &dimension_names,
                ));
            }
        }
        Ok(())
    }
}

fn unknown_column(
    column: &str,
    table: &LogicalTable,
    metrics: &std::collections::BTreeSet<String>,
    dimensions: &[String],
) -> MeridianError {
    let mut available: Vec<String> = metrics.iter().cloned().collect();
    available.extend(dimensions.iter().cloned());
    MeridianError::new(
        ErrorCode::UnknownColumn,
        format!("Unknown column '{}' on table '{}'", column, table.name()),
    )
    .with_context(ErrorContext::UnknownColumn {
        column: column.to_string(),
        table: table.name().to_string(),
        available_columns: available,
    })
}

#[async_trait]
impl RequestHandler for PartialDataStage {
    fn name(&self) -> &str {
        "partial_data"
    }

    async fn handle(
        &self,
        ctx: &mut ResponseContext,
        request: &QueryRequest,
        query: BackendQuery,
        sink: &ResponseSink,
    ) -> meridian_error::Result<bool> {
        if request.intervals.is_empty() {
            return Err(MeridianError::new(
                ErrorCode::InvalidInterval,
                "Query requests no time intervals",
            ));
        }
        let table = self.resolve_table(request)?;
        self.validate_columns(&table, request)?;

        let constraint = Constraint {
            columns: request.touched_columns().cloned().collect(),
            filtered_dimensions: request.filters.iter().map(|f| f.dimension.clone()).collect(),
        };

        let availability = table.availability(self.availability.as_ref(), &constraint);
        ctx.always_available = availability.is_always();
        ctx.missing_intervals = missing_intervals(&availability, &request.intervals, request.grain);
        ctx.partial_data = !ctx.missing_intervals.is_empty();

        let volatile = table.volatile_intervals(self.availability.as_ref(), &constraint);
        ctx.volatile_intervals = volatile_overlap(&volatile, &request.intervals, request.grain);

        debug!(
            target: "chain",
            table = request.table,
            partial = ctx.partial_data,
            missing_runs = ctx.missing_intervals.len(),
            "partial data resolved"
        );

        if self.mask_missing && ctx.partial_data {
            // Must run before sorting and pagination see the rows.
            ctx.insert_mapper(
                0,
                Arc::new(MissingIntervalMapper::new(
                    ctx.missing_intervals.clone(),
                    request.grain,
                )),
            );
        }

        self.next.handle(ctx, request, query, sink).await
    }
}
