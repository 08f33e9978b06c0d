//! Request and response model for the query pipeline.
//!
//! [`QueryRequest`] is the client-facing shape; [`BackendQuery`] is the
//! reduced form handed to backend clients after the handler chain has
//! resolved routing, admission, and splitting. [`ResponseContext`] is the
//! mutable scratchpad the chain threads through its stages, and
//! [`ResponseSink`] is the single completion point a request resolves
//! through, exactly once.

use crate::cache::QueryFingerprint;
use crate::interval::{Grain, IntervalSet};
use crate::mappers::ResultMapper;
use meridian_error::MeridianError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

/// A single predicate on a dimension column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub dimension: String,
    pub op: FilterOp,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

/// When a request is allowed to fall back to a ticketed asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsyncAfter {
    /// Wait synchronously for as long as it takes.
    #[default]
    Never,
    /// Promote immediately without waiting.
    Always,
    /// Wait this long, then promote.
    After(Duration),
}

/// Which backend dialect serves the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDialect {
    #[default]
    Native,
    Sql,
}

/// A fully described client query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    pub grain: Grain,
    pub intervals: IntervalSet,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub filters: Vec<FilterPredicate>,
    pub sort: Option<SortSpec>,
    pub pagination: Option<Pagination>,
    pub top_n: Option<u64>,
    pub async_after: AsyncAfter,
    pub user_id: String,
    pub dialect: QueryDialect,
}

impl QueryRequest {
    pub fn new(table: impl Into<String>, grain: Grain, intervals: IntervalSet) -> Self {
        Self {
            table: table.into(),
            grain,
            intervals,
            dimensions: Vec::new(),
            metrics: Vec::new(),
            filters: Vec::new(),
            sort: None,
            pagination: None,
            top_n: None,
            async_after: AsyncAfter::Never,
            user_id: "anonymous".to_string(),
            dialect: QueryDialect::Native,
        }
    }

    /// Columns the query reads, for availability constraint building.
    pub fn touched_columns(&self) -> impl Iterator<Item = &String> {
        self.metrics.iter().chain(self.dimensions.iter())
    }
}

/// The reduced query shape handed to a backend client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendQuery {
    data_source: String,
    grain: Grain,
    intervals: IntervalSet,
    dimensions: Vec<String>,
    metrics: Vec<String>,
    filters: Vec<FilterPredicate>,
}

impl BackendQuery {
    pub fn from_request(request: &QueryRequest) -> Self {
        Self {
            data_source: request.table.clone(),
            grain: request.grain,
            intervals: request.intervals.clone(),
            dimensions: request.dimensions.clone(),
            metrics: request.metrics.clone(),
            filters: request.filters.clone(),
        }
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub fn grain(&self) -> Grain {
        self.grain
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.intervals
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn filters(&self) -> &[FilterPredicate] {
        &self.filters
    }

    /// Same query narrowed to a different interval set (used by the
    /// splitting stage to build shards).
    pub fn with_intervals(&self, intervals: IntervalSet) -> Self {
        Self {
            intervals,
            ..self.clone()
        }
    }
}

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// An ordered collection of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append all rows of `other`, preserving order.
    pub fn extend(&mut self, other: ResultSet) {
        self.rows.extend(other.rows);
    }
}

/// Where a response came from relative to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Caching disabled or request not cacheable.
    Bypass,
    Miss,
    Hit,
}

/// Client-visible annotations attached alongside the rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub missing_intervals: IntervalSet,
    pub volatile_intervals: IntervalSet,
    pub partial_data: bool,
    pub cache_status: CacheStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: ResultSet,
    pub meta: ResponseMetadata,
}

/// Which backend pool a query routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    #[default]
    Native,
    Sql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    Low,
}

/// Mutable per-request state the handler chain threads through its stages.
///
/// Stages write what they learn (missing intervals, weight, routing) and
/// the dispatch stage reads all of it. `computed` is filled by dispatch so
/// the cache stage can persist the assembled response on the way back up.
pub struct ResponseContext {
    pub missing_intervals: IntervalSet,
    pub volatile_intervals: IntervalSet,
    pub partial_data: bool,
    pub always_available: bool,
    pub cache_status: CacheStatus,
    pub estimated_weight: Option<u64>,
    pub route: Route,
    pub priority: Priority,
    pub fingerprint: Option<QueryFingerprint>,
    pub computed: Option<QueryResponse>,
    /// Interval shards for fan-out dispatch; `None` means unsplit.
    pub shards: Option<Vec<IntervalSet>>,
    mappers: Vec<Arc<dyn ResultMapper>>,
}

impl ResponseContext {
    pub fn new() -> Self {
        Self {
            missing_intervals: IntervalSet::empty(),
            volatile_intervals: IntervalSet::empty(),
            partial_data: false,
            always_available: false,
            cache_status: CacheStatus::Bypass,
            estimated_weight: None,
            route: Route::Native,
            priority: Priority::Normal,
            fingerprint: None,
            computed: None,
            shards: None,
            mappers: Vec::new(),
        }
    }

    /// Register a mapper to run after the one registered before it.
    pub fn push_mapper(&mut self, mapper: Arc<dyn ResultMapper>) {
        self.mappers.push(mapper);
    }

    /// Register a mapper at a position; index 0 runs first.
    pub fn insert_mapper(&mut self, index: usize, mapper: Arc<dyn ResultMapper>) {
        let index = index.min(self.mappers.len());
        self.mappers.insert(index, mapper);
    }

    pub fn mappers(&self) -> &[Arc<dyn ResultMapper>] {
        &self.mappers
    }

    pub fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata {
            missing_intervals: self.missing_intervals.clone(),
            volatile_intervals: self.volatile_intervals.clone(),
            partial_data: self.partial_data,
            cache_status: self.cache_status,
        }
    }
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-resolution completion point for one request.
///
/// The first call to [`complete`](Self::complete) or [`fail`](Self::fail)
/// wins; later calls are logged and dropped. The receiving half is a plain
/// oneshot so the pipeline can race it against promotion timers.
pub struct ResponseSink {
    tx: Mutex<Option<oneshot::Sender<Result<QueryResponse, MeridianError>>>>,
}

impl ResponseSink {
    pub fn channel() -> (
        Arc<Self>,
        oneshot::Receiver<Result<QueryResponse, MeridianError>>,
    ) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    pub async fn complete(&self, response: QueryResponse) {
        self.resolve(Ok(response)).await;
    }

    pub async fn fail(&self, error: MeridianError) {
        self.resolve(Err(error)).await;
    }

    async fn resolve(&self, outcome: Result<QueryResponse, MeridianError>) {
        let mut guard = self.tx.lock().await;
        match guard.take() {
            Some(tx) => {
                // Receiver may have been dropped after promotion timeout
                // handling; that is not an error here.
                let _ = tx.send(outcome);
            }
            None => {
                warn!(target: "chain", "response sink resolved more than once");
            }
        }
    }
}
