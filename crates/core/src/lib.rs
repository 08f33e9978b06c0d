//! # meridian-core
//!
//! The query execution pipeline of the Meridian analytics gateway:
//! interval algebra and availability resolution, partial-data detection,
//! a fingerprinted response cache, the staged request handler chain, and
//! ticketed asynchronous job coordination.
//!
//! The entry point is [`pipeline::Pipeline`], which accepts a
//! [`query::QueryRequest`] and resolves it either synchronously or as a
//! ticketed job the caller polls through the
//! [`jobs::runner::JobCoordinator`].

pub mod backend;
pub mod cache;
pub mod chain;
pub mod interval;
pub mod jobs;
pub mod mappers;
pub mod partial;
pub mod pipeline;
pub mod query;
pub mod table;

pub use backend::{BackendClient, BackendError, BackendPool};
pub use cache::{QueryFingerprint, ResponseCache};
pub use interval::{Grain, Interval, IntervalSet};
pub use pipeline::{ExecutionOutcome, Pipeline};
pub use query::{
    AsyncAfter, BackendQuery, CacheStatus, QueryRequest, QueryResponse, ResultSet,
};
pub use table::{Availability, AvailabilitySource, LogicalTable, TableRegistry};
