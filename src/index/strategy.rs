//! Query strategy selection.
//!
//! A colour breakdown can be fetched two ways: one combined two-level pivot
//! (facet value x coordinate), or one coordinate aggregation per colour
//! bucket. The pivot is cheaper for small result sets but its cost grows
//! with the total match count, and numeric-range buckets cannot be expressed
//! as a pivot at all. The cutoff is configurable
//! ([`pivot_cutoff`](crate::config::EngineConfig::pivot_cutoff)).

/// How the per-bucket breakdown is fetched from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStrategy {
    /// One combined facet-by-coordinate pivot query
    CombinedPivot,

    /// One coordinate aggregation per legend bucket
    PerBucketFacet,
}

/// Pick the breakdown strategy for a query.
///
/// Numeric-ranged buckets always use per-bucket aggregation; otherwise the
/// pivot is used below the cutoff.
pub fn select_strategy(total_count: u64, pivot_cutoff: u64, numeric_ranged: bool) -> QueryStrategy {
    if numeric_ranged || total_count >= pivot_cutoff {
        QueryStrategy::PerBucketFacet
    } else {
        QueryStrategy::CombinedPivot
    }
}
