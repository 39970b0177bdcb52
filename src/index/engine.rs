//! The point-source query engine.
//!
//! Given a layer query, a viewport and a legend, this engine decides what to
//! ask the index and assembles the per-bucket point data a tile is rendered
//! from. The cost heuristic:
//!
//! 1. A cheap total-match count first; zero is a result, not an error.
//! 2. A distinct-coordinate count at the chosen resolution. Layers too
//!    dense to cache whole are re-counted and fetched scoped to the current
//!    viewport, and the result is marked not reusable across pans.
//! 3. The colour breakdown, via the strategy from
//!    [`select_strategy`](super::strategy::select_strategy): one combined
//!    pivot, or one aggregation per legend bucket - reusing an already
//!    cached uncoloured result for the remainder bucket when available.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::IndexError;
use crate::legend::Legend;
use crate::query::bbox::Envelope;
use crate::query::env::ColourMode;
use crate::query::resolution::ResolutionLevel;
use crate::tile::cache::{hash_query, CachedTile, CountKind, CountMemo, TileBucket, TileScope};

use super::source::{OccurrenceIndex, OccurrenceQuery, PointCount};
use super::strategy::{select_strategy, QueryStrategy};

/// Whole-world envelope in the native geographic reference; the bounds
/// recorded on full-layer results.
fn world_bounds() -> Envelope {
    Envelope::new(-180.0, -90.0, 180.0, 90.0)
}

/// Outcome of a point-source fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum PointSourceResult {
    /// The query matches nothing; the caller renders the blank tile
    Empty,

    /// Per-bucket point data ready for caching and rendering
    Data(CachedTile),
}

/// Assembles per-bucket point data from the occurrence index.
pub struct PointSourceEngine<'a, I: OccurrenceIndex> {
    index: &'a I,
    memo: &'a CountMemo,
    config: &'a EngineConfig,
}

impl<'a, I: OccurrenceIndex> PointSourceEngine<'a, I> {
    pub fn new(index: &'a I, memo: &'a CountMemo, config: &'a EngineConfig) -> Self {
        Self {
            index,
            memo,
            config,
        }
    }

    /// Fetch the point data for one cache entry.
    ///
    /// `layer_query` must be the full-layer query (no viewport bounds);
    /// `uncoloured` is the cached "-1" result for the same layer and
    /// resolution, when the caller has one.
    pub async fn fetch(
        &self,
        layer_query: &OccurrenceQuery,
        viewport: &Envelope,
        resolution: ResolutionLevel,
        colour_mode: &ColourMode,
        legend: &Legend,
        uncoloured: Option<Arc<CachedTile>>,
    ) -> Result<PointSourceResult, IndexError> {
        let mut total = self.memoized_total(layer_query).await?;
        if total == 0 {
            return Ok(PointSourceResult::Empty);
        }

        let distinct = self.memoized_distinct(layer_query, resolution).await?;

        // Too many distinct points to cache for the whole layer: re-execute
        // both counts scoped to the viewport and mark the result accordingly.
        let (query, scope, bounds) = if distinct > self.config.max_cached_points {
            debug!(
                distinct,
                threshold = self.config.max_cached_points,
                "layer too dense to cache; re-scoping to viewport"
            );
            let scoped = layer_query.with_bounds(*viewport);
            total = self.memoized_total(&scoped).await?;
            if total == 0 {
                return Ok(PointSourceResult::Empty);
            }
            self.memoized_distinct(&scoped, resolution).await?;
            (scoped, TileScope::Viewport, *viewport)
        } else {
            (layer_query.clone(), TileScope::FullLayer, world_bounds())
        };

        let buckets = match colour_mode {
            ColourMode::Uncoloured | ColourMode::Grid => {
                let points = self.index.coordinate_counts(&query, resolution).await?;
                vec![bucket_for(&legend.items[0], points)]
            }
            ColourMode::Facet { field, .. } => {
                let strategy = select_strategy(
                    total,
                    self.config.pivot_cutoff,
                    colour_mode.is_numeric_ranged(),
                );
                match strategy {
                    QueryStrategy::CombinedPivot => {
                        self.fetch_pivot(&query, field, resolution, legend).await?
                    }
                    QueryStrategy::PerBucketFacet => {
                        self.fetch_per_bucket(&query, viewport, resolution, legend, uncoloured)
                            .await?
                    }
                }
            }
        };

        Ok(PointSourceResult::Data(CachedTile {
            bounds,
            resolution,
            scope,
            buckets,
        }))
    }

    /// One combined two-level aggregation: facet value x coordinate.
    async fn fetch_pivot(
        &self,
        query: &OccurrenceQuery,
        field: &str,
        resolution: ResolutionLevel,
        legend: &Legend,
    ) -> Result<Vec<TileBucket>, IndexError> {
        let pivot = self
            .index
            .pivot_coordinate_counts(query, field, resolution)
            .await?;

        let mut buckets: Vec<TileBucket> = legend
            .items
            .iter()
            .map(|item| bucket_for(item, Vec::new()))
            .collect();

        let explicit: HashMap<&str, usize> = legend
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_remainder)
            .map(|(i, item)| (item.label.as_str(), i))
            .collect();
        let remainder = legend.items.iter().position(|item| item.is_remainder);

        for (value, points) in pivot {
            match explicit.get(value.as_str()).copied().or(remainder) {
                Some(i) => buckets[i].points.extend(points),
                None => {
                    debug!(value = %value, "facet value not in legend; dropping");
                }
            }
        }

        Ok(buckets)
    }

    /// One coordinate aggregation per legend bucket.
    ///
    /// The remainder bucket reuses the already-computed uncoloured result
    /// when one is available for this layer and resolution, bounding cost.
    async fn fetch_per_bucket(
        &self,
        query: &OccurrenceQuery,
        viewport: &Envelope,
        resolution: ResolutionLevel,
        legend: &Legend,
        uncoloured: Option<Arc<CachedTile>>,
    ) -> Result<Vec<TileBucket>, IndexError> {
        let mut buckets = Vec::with_capacity(legend.items.len());

        for item in &legend.items {
            let reused = if item.is_remainder {
                uncoloured
                    .as_deref()
                    .filter(|tile| {
                        tile.resolution == resolution && tile.is_reusable_for(viewport)
                    })
                    .and_then(|tile| tile.uncoloured_points())
                    .map(<[PointCount]>::to_vec)
            } else {
                None
            };

            let points = match reused {
                Some(points) => {
                    debug!(label = %item.label, "reusing uncoloured result for remainder bucket");
                    points
                }
                None => {
                    self.index
                        .coordinate_counts(&query.with_filter(&item.filter), resolution)
                        .await?
                }
            };

            buckets.push(bucket_for(item, points));
        }

        Ok(buckets)
    }

    async fn memoized_total(&self, query: &OccurrenceQuery) -> Result<u64, IndexError> {
        let hash = hash_query(query);
        if let Some(count) = self.memo.get(&hash, CountKind::Total, None) {
            return Ok(count);
        }
        let count = self.index.total_count(query).await?;
        self.memo.put(&hash, CountKind::Total, None, count);
        Ok(count)
    }

    async fn memoized_distinct(
        &self,
        query: &OccurrenceQuery,
        resolution: ResolutionLevel,
    ) -> Result<u64, IndexError> {
        let hash = hash_query(query);
        if let Some(count) = self
            .memo
            .get(&hash, CountKind::DistinctPoints, Some(resolution))
        {
            return Ok(count);
        }
        let count = self
            .index
            .distinct_coordinate_count(query, resolution)
            .await?;
        self.memo
            .put(&hash, CountKind::DistinctPoints, Some(resolution), count);
        Ok(count)
    }
}

fn bucket_for(item: &crate::legend::LegendItem, points: Vec<PointCount>) -> TileBucket {
    TileBucket {
        label: item.label.clone(),
        colour: item.colour,
        is_remainder: item.is_remainder,
        points,
    }
}

// =============================================================================
// Tests
// =============================================================================
