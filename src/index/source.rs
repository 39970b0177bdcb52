//! The occurrence index contract and its data shapes.

use async_trait::async_trait;

use crate::error::IndexError;
use crate::query::bbox::Envelope;
use crate::query::resolution::ResolutionLevel;

// =============================================================================
// OccurrenceQuery
// =============================================================================

/// An attribute+spatial query against the occurrence index.
///
/// Cloning is cheap relative to an index round trip; the engine freely
/// derives scoped variants via [`with_filter`](Self::with_filter) and
/// [`with_bounds`](Self::with_bounds).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OccurrenceQuery {
    /// Query text, e.g. `genus:Acacia`
    pub q: String,

    /// Additional filter clauses, all conjunctive
    pub filters: Vec<String>,

    /// Spatial restriction in the index's native reference, if any
    pub bounds: Option<Envelope>,
}

impl OccurrenceQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            filters: Vec::new(),
            bounds: None,
        }
    }

    /// Derived query with one more filter clause.
    pub fn with_filter(&self, filter: impl Into<String>) -> Self {
        let mut derived = self.clone();
        derived.filters.push(filter.into());
        derived
    }

    /// Derived query restricted to the given envelope.
    pub fn with_bounds(&self, bounds: Envelope) -> Self {
        let mut derived = self.clone();
        derived.bounds = Some(bounds);
        derived
    }

    /// Canonical string form.
    ///
    /// Filters are sorted so logically identical queries normalize (and
    /// therefore hash) identically regardless of filter order.
    pub fn normalized(&self) -> String {
        let mut filters = self.filters.clone();
        filters.sort();
        let bounds = self
            .bounds
            .map(|b| b.canonical())
            .unwrap_or_else(|| "*".to_string());
        format!("q={}&fq={}&bounds={}", self.q.trim(), filters.join("&fq="), bounds)
    }
}

// =============================================================================
// Aggregation Shapes
// =============================================================================

/// One de-duplicated coordinate cluster: a rounded coordinate in the native
/// reference and the number of records rounding to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointCount {
    /// Longitude in the native reference
    pub x: f64,
    /// Latitude in the native reference
    pub y: f64,
    /// Records at this rounded coordinate
    pub count: u64,
}

impl PointCount {
    pub fn new(x: f64, y: f64, count: u64) -> Self {
        Self { x, y, count }
    }
}

/// One distinct facet value and its record count.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

impl FacetCount {
    pub fn new(value: impl Into<String>, count: u64) -> Self {
        Self {
            value: value.into(),
            count,
        }
    }
}

// =============================================================================
// OccurrenceIndex Trait
// =============================================================================

/// The aggregation contract the engine requires from a search backend.
///
/// All calls are blocking from the request's point of view; any timeout is
/// the implementation's responsibility. Implementations must be cheap to
/// share behind an `Arc`.
#[async_trait]
pub trait OccurrenceIndex: Send + Sync {
    /// Total number of records matching the query.
    async fn total_count(&self, query: &OccurrenceQuery) -> Result<u64, IndexError>;

    /// Distinct rounded coordinates with per-coordinate record counts,
    /// faceted at the given rounding precision.
    async fn coordinate_counts(
        &self,
        query: &OccurrenceQuery,
        resolution: ResolutionLevel,
    ) -> Result<Vec<PointCount>, IndexError>;

    /// Two-level pivot: for each distinct value of `field`, the rounded
    /// coordinates and counts of its records.
    async fn pivot_coordinate_counts(
        &self,
        query: &OccurrenceQuery,
        field: &str,
        resolution: ResolutionLevel,
    ) -> Result<Vec<(String, Vec<PointCount>)>, IndexError>;

    /// Number of distinct rounded coordinates at the given precision
    /// (count-distinct statistic; cheaper than fetching them).
    async fn distinct_coordinate_count(
        &self,
        query: &OccurrenceQuery,
        resolution: ResolutionLevel,
    ) -> Result<u64, IndexError>;

    /// Up to `limit` distinct values of `field` with record counts, most
    /// frequent first.
    async fn facet_values(
        &self,
        query: &OccurrenceQuery,
        field: &str,
        limit: usize,
    ) -> Result<Vec<FacetCount>, IndexError>;
}
