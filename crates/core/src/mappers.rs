//! Post-dispatch result transformations.
//!
//! Handler stages register mappers on the [`ResponseContext`] while the
//! request travels down the chain; the dispatch stage runs them in
//! registration order over the raw backend rows. Ordering matters:
//! sorting must precede top-N truncation, and pagination always runs
//! last.

use crate::interval::{Grain, IntervalSet};
use crate::query::{Pagination, ResponseContext, ResultSet, Row, SortDirection, SortSpec};
use chrono::{DateTime, Utc};
use meridian_error::Result;
use std::cmp::Ordering;
use tracing::debug;

pub trait ResultMapper: Send + Sync {
    fn name(&self) -> &str;

    fn map(&self, results: ResultSet, ctx: &ResponseContext) -> Result<ResultSet>;
}

/// Run all registered mappers over `results` in order.
pub fn apply_mappers(mut results: ResultSet, ctx: &ResponseContext) -> Result<ResultSet> {
    for mapper in ctx.mappers() {
        let before = results.len();
        results = mapper.map(results, ctx)?;
        debug!(
            target: "chain",
            mapper = mapper.name(),
            rows_in = before,
            rows_out = results.len(),
            "applied mapper"
        );
    }
    Ok(results)
}

/// Orders rows by one column. Missing values sort after present ones.
pub struct SortMapper {
    spec: SortSpec,
}

impl SortMapper {
    pub fn new(spec: SortSpec) -> Self {
        Self { spec }
    }
}

fn compare_values(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

impl ResultMapper for SortMapper {
    fn name(&self) -> &str {
        "sort"
    }

    fn map(&self, mut results: ResultSet, _ctx: &ResponseContext) -> Result<ResultSet> {
        let column = self.spec.column.clone();
        let direction = self.spec.direction;
        results.rows.sort_by(|a, b| {
            let left = a.get(&column).unwrap_or(&serde_json::Value::Null);
            let right = b.get(&column).unwrap_or(&serde_json::Value::Null);
            let ord = compare_values(left, right);
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
        Ok(results)
    }
}

/// Truncates to the first N rows. Requires sorting to have run first.
pub struct TopNMapper {
    limit: u64,
}

impl TopNMapper {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl ResultMapper for TopNMapper {
    fn name(&self) -> &str {
        "top_n"
    }

    fn map(&self, mut results: ResultSet, _ctx: &ResponseContext) -> Result<ResultSet> {
        results.rows.truncate(self.limit as usize);
        Ok(results)
    }
}

/// Slices out one page. Pages are 1-based.
pub struct PaginationMapper {
    pagination: Pagination,
}

impl PaginationMapper {
    pub fn new(pagination: Pagination) -> Self {
        Self { pagination }
    }
}

impl ResultMapper for PaginationMapper {
    fn name(&self) -> &str {
        "pagination"
    }

    fn map(&self, results: ResultSet, _ctx: &ResponseContext) -> Result<ResultSet> {
        let per_page = self.pagination.per_page as usize;
        let start = (self.pagination.page as usize)
            .saturating_sub(1)
            .saturating_mul(per_page);
        let rows: Vec<Row> = results.rows.into_iter().skip(start).take(per_page).collect();
        Ok(ResultSet::new(rows))
    }
}

/// Drops rows whose bucket falls inside the missing intervals. Used only
/// when masking is enabled; otherwise missing buckets are merely annotated
/// in the response metadata.
pub struct MissingIntervalMapper {
    missing: IntervalSet,
    grain: Grain,
    timestamp_column: String,
}

impl MissingIntervalMapper {
    pub fn new(missing: IntervalSet, grain: Grain) -> Self {
        Self {
            missing,
            grain,
            timestamp_column: "timestamp".to_string(),
        }
    }

    fn row_instant(&self, row: &Row) -> Option<DateTime<Utc>> {
        row.get(&self.timestamp_column)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

impl ResultMapper for MissingIntervalMapper {
    fn name(&self) -> &str {
        "missing_interval"
    }

    fn map(&self, results: ResultSet, _ctx: &ResponseContext) -> Result<ResultSet> {
        if self.missing.is_empty() {
            return Ok(results);
        }
        let rows: Vec<Row> = results
            .rows
            .into_iter()
            .filter(|row| match self.row_instant(row) {
                // A row with an unparseable timestamp cannot be attributed
                // to a bucket; keep it.
                None => true,
                Some(t) => !self.missing.contains_instant(self.grain.floor(t)),
            })
            .collect();
        Ok(ResultSet::new(rows))
    }
}
