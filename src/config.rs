//! Engine configuration.
//!
//! All tunables for the tile engine live here: cache sizing, the
//! query-strategy pivot cutoff, the viewport re-scoping threshold and the
//! rendering defaults. The struct deserializes from the host application's
//! configuration file; every field has a sensible default so a bare
//! `EngineConfig::default()` produces a working engine.

use serde::{Deserialize, Serialize};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of cached point-data entries.
pub const DEFAULT_CACHE_ENTRIES: usize = 256;

/// Default number of memoized count entries.
pub const DEFAULT_MEMO_ENTRIES: usize = 1024;

/// Default distinct-point threshold above which queries are re-scoped to the
/// viewport instead of being cached for the full layer.
pub const DEFAULT_MAX_CACHED_POINTS: u64 = 75_000;

/// Default total-count cutoff for the combined pivot query strategy.
pub const DEFAULT_PIVOT_CUTOFF: u64 = 2_000;

/// Default maximum number of facet values fetched for a legend.
pub const DEFAULT_FACET_VALUE_LIMIT: usize = 30;

/// Default cap on drawn uncertainty radii, in metres.
pub const DEFAULT_MAX_UNCERTAINTY_METRES: f64 = 30_000.0;

/// Default number of grid divisions per tile side for density rendering.
pub const DEFAULT_GRID_DIVISIONS: u32 = 16;

/// Field the index rounds and facets on for uncertainty circles.
pub const DEFAULT_UNCERTAINTY_FIELD: &str = "coordinate_uncertainty";

// =============================================================================
// EngineConfig
// =============================================================================

/// Tunables for the tile rendering and caching engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of point-data entries held in the LRU cache.
    pub cache_entries: usize,

    /// Maximum number of memoized document/point counts.
    pub memo_entries: usize,

    /// Distinct-point count above which a query is re-executed scoped to the
    /// current viewport and marked not reusable across pans.
    pub max_cached_points: u64,

    /// Total-count cutoff for strategy selection: below this (and not
    /// numeric-ranged) a single combined facet-by-coordinate pivot is used;
    /// at or above, one aggregation per colour bucket.
    pub pivot_cutoff: u64,

    /// Maximum number of facet values fetched when building a legend.
    pub facet_value_limit: usize,

    /// Cap on drawn uncertainty radii, in metres. Records at or above the cap
    /// are drawn at the cap; records without a value are skipped.
    pub max_uncertainty_metres: f64,

    /// Index field holding per-record coordinate uncertainty, in metres.
    pub uncertainty_field: String,

    /// Grid divisions per tile side for density rendering, unless overridden
    /// per request.
    pub grid_divisions: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_entries: DEFAULT_CACHE_ENTRIES,
            memo_entries: DEFAULT_MEMO_ENTRIES,
            max_cached_points: DEFAULT_MAX_CACHED_POINTS,
            pivot_cutoff: DEFAULT_PIVOT_CUTOFF,
            facet_value_limit: DEFAULT_FACET_VALUE_LIMIT,
            max_uncertainty_metres: DEFAULT_MAX_UNCERTAINTY_METRES,
            uncertainty_field: DEFAULT_UNCERTAINTY_FIELD.to_string(),
            grid_divisions: DEFAULT_GRID_DIVISIONS,
        }
    }
}
