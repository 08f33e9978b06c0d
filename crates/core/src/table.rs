//! Logical table catalog and availability resolution.
//!
//! A logical table is either a single physical table or a composite of
//! several physical tables stitched together by a [`CompositionPolicy`].
//! Availability is resolved per query through an [`AvailabilitySource`],
//! which reports the interval sets each physical table can serve.

use crate::interval::{Grain, IntervalSet};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// The columns a query touches, used to scope availability lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraint {
    /// Metric and dimension columns the query reads.
    pub columns: BTreeSet<String>,
    /// Dimensions the query filters on.
    pub filtered_dimensions: BTreeSet<String>,
}

impl Constraint {
    pub fn for_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            filtered_dimensions: BTreeSet::new(),
        }
    }
}

/// What a source knows about a table's coverage.
///
/// `AlwaysAvailable` is a sentinel for tables whose coverage is not
/// tracked (e.g. dimension lookups); it absorbs unions and is the
/// identity under intersection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Known(IntervalSet),
    AlwaysAvailable,
}

impl Availability {
    pub fn empty() -> Self {
        Availability::Known(IntervalSet::empty())
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Availability::AlwaysAvailable)
    }

    pub fn union(&self, other: &Availability) -> Availability {
        match (self, other) {
            (Availability::AlwaysAvailable, _) | (_, Availability::AlwaysAvailable) => {
                Availability::AlwaysAvailable
            }
            (Availability::Known(a), Availability::Known(b)) => Availability::Known(a.union(b)),
        }
    }

    pub fn intersect(&self, other: &Availability) -> Availability {
        match (self, other) {
            (Availability::AlwaysAvailable, x) | (x, Availability::AlwaysAvailable) => x.clone(),
            (Availability::Known(a), Availability::Known(b)) => Availability::Known(a.intersect(b)),
        }
    }
}

/// Source of availability facts for physical tables.
///
/// Implementations typically front a metadata service or a segment
/// catalog. Lookups are synchronous; callers cache at a higher level.
pub trait AvailabilitySource: Send + Sync {
    /// Intervals the table can serve for the given constraint.
    fn intervals(&self, table: &str, constraint: &Constraint) -> Availability;

    /// Intervals whose data is present but still subject to revision
    /// (late-arriving events). Defaults to none.
    fn volatile_intervals(&self, table: &str, constraint: &Constraint) -> IntervalSet {
        let _ = (table, constraint);
        IntervalSet::empty()
    }
}

/// Static in-memory availability, keyed by physical table name.
#[derive(Debug, Default)]
pub struct StaticAvailability {
    tables: HashMap<String, Availability>,
    volatile: HashMap<String, IntervalSet>,
}

impl StaticAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>, availability: Availability) -> Self {
        self.tables.insert(table.into(), availability);
        self
    }

    pub fn with_volatile(mut self, table: impl Into<String>, intervals: IntervalSet) -> Self {
        self.volatile.insert(table.into(), intervals);
        self
    }
}

impl AvailabilitySource for StaticAvailability {
    fn intervals(&self, table: &str, _constraint: &Constraint) -> Availability {
        self.tables
            .get(table)
            .cloned()
            .unwrap_or_else(Availability::empty)
    }

    fn volatile_intervals(&self, table: &str, _constraint: &Constraint) -> IntervalSet {
        self.volatile.get(table).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionInfo {
    pub name: String,
    /// Estimated distinct-value count, used for weight estimation.
    pub cardinality: u64,
}

/// A concrete backend table.
#[derive(Debug, Clone)]
pub struct PhysicalTable {
    pub name: String,
    pub grain: Grain,
    /// Metric columns this table declares.
    pub columns: BTreeSet<String>,
    pub dimensions: Vec<DimensionInfo>,
}

impl PhysicalTable {
    pub fn new(name: impl Into<String>, grain: Grain) -> Self {
        Self {
            name: name.into(),
            grain,
            columns: BTreeSet::new(),
            dimensions: Vec::new(),
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_dimension(mut self, name: impl Into<String>, cardinality: u64) -> Self {
        self.dimensions.push(DimensionInfo {
            name: name.into(),
            cardinality,
        });
        self
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionInfo> {
        self.dimensions.iter().find(|d| d.name == name)
    }
}

/// How a composite's constituents combine into one availability answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionPolicy {
    /// Constituents are interchangeable replicas or shards: available
    /// wherever any constituent is.
    Union,
    /// Constituents each own a subset of metric columns: a query is
    /// available only where every column it reads is available, with
    /// per-column availability unioned across declaring constituents.
    MetricUnion,
}

#[derive(Debug, Clone)]
pub struct CompositeTable {
    pub name: String,
    pub grain: Grain,
    pub policy: CompositionPolicy,
    pub constituents: Vec<PhysicalTable>,
}

impl CompositeTable {
    fn availability(&self, source: &dyn AvailabilitySource, constraint: &Constraint) -> Availability {
        match self.policy {
            CompositionPolicy::Union => self
                .constituents
                .iter()
                .map(|t| source.intervals(&t.name, constraint))
                .fold(Availability::empty(), |acc, a| acc.union(&a)),
            CompositionPolicy::MetricUnion => {
                let mut narrowed: Option<Availability> = None;
                for column in &constraint.columns {
                    let declaring: Vec<&PhysicalTable> = self
                        .constituents
                        .iter()
                        .filter(|t| t.columns.contains(column))
                        .collect();
                    // Dimensions appear on every constituent; only metric
                    // columns narrow availability.
                    if declaring.is_empty() {
                        continue;
                    }
                    let column_availability = declaring
                        .iter()
                        .map(|t| source.intervals(&t.name, constraint))
                        .fold(Availability::empty(), |acc, a| acc.union(&a));
                    narrowed = Some(match narrowed {
                        None => column_availability,
                        Some(acc) => acc.intersect(&column_availability),
                    });
                }
                // A query touching no declared metric column is still
                // bounded by what the constituents cover in total.
                narrowed.unwrap_or_else(|| {
                    self.constituents
                        .iter()
                        .map(|t| source.intervals(&t.name, constraint))
                        .fold(Availability::empty(), |acc, a| acc.union(&a))
                })
            }
        }
    }

    fn volatile(&self, source: &dyn AvailabilitySource, constraint: &Constraint) -> IntervalSet {
        self.constituents
            .iter()
            .map(|t| source.volatile_intervals(&t.name, constraint))
            .fold(IntervalSet::empty(), |acc, s| acc.union(&s))
    }
}

/// A table a client can address by name.
#[derive(Debug, Clone)]
pub enum LogicalTable {
    Physical(PhysicalTable),
    Composite(CompositeTable),
}

impl LogicalTable {
    pub fn name(&self) -> &str {
        match self {
            LogicalTable::Physical(t) => &t.name,
            LogicalTable::Composite(t) => &t.name,
        }
    }

    pub fn grain(&self) -> Grain {
        match self {
            LogicalTable::Physical(t) => t.grain,
            LogicalTable::Composite(t) => t.grain,
        }
    }

    /// All metric columns addressable through this table.
    pub fn columns(&self) -> BTreeSet<String> {
        match self {
            LogicalTable::Physical(t) => t.columns.clone(),
            LogicalTable::Composite(t) => t
                .constituents
                .iter()
                .flat_map(|c| c.columns.iter().cloned())
                .collect(),
        }
    }

    pub fn dimension(&self, name: &str) -> Option<DimensionInfo> {
        match self {
            LogicalTable::Physical(t) => t.dimension(name).cloned(),
            LogicalTable::Composite(t) => t
                .constituents
                .iter()
                .find_map(|c| c.dimension(name).cloned()),
        }
    }

    pub fn dimension_names(&self) -> Vec<String> {
        match self {
            LogicalTable::Physical(t) => t.dimensions.iter().map(|d| d.name.clone()).collect(),
            LogicalTable::Composite(t) => {
                let mut names = BTreeSet::new();
                for c in &t.constituents {
                    names.extend(c.dimensions.iter().map(|d| d.name.clone()));
                }
                names.into_iter().collect()
            }
        }
    }

    /// Resolve availability for a query's constraint.
    pub fn availability(
        &self,
        source: &dyn AvailabilitySource,
        constraint: &Constraint,
    ) -> Availability {
        let result = match self {
            LogicalTable::Physical(t) => source.intervals(&t.name, constraint),
            LogicalTable::Composite(t) => t.availability(source, constraint),
        };
        debug!(
            target: "catalog",
            table = self.name(),
            always = result.is_always(),
            "resolved availability"
        );
        result
    }

    pub fn volatile_intervals(
        &self,
        source: &dyn AvailabilitySource,
        constraint: &Constraint,
    ) -> IntervalSet {
        match self {
            LogicalTable::Physical(t) => source.volatile_intervals(&t.name, constraint),
            LogicalTable::Composite(t) => t.volatile(source, constraint),
        }
    }
}

/// Name-keyed catalog of the logical tables a gateway serves.
#[derive(Default, Clone)]
pub struct TableRegistry {
    tables: HashMap<String, Arc<LogicalTable>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: LogicalTable) {
        self.tables.insert(table.name().to_string(), Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Option<Arc<LogicalTable>> {
        self.tables.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}
