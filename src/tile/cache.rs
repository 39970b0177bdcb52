//! Point-data cache.
//!
//! Rendering a tile is cheap; the aggregation queries behind it are not.
//! This cache stores the per-bucket coordinate+count data computed for a
//! (query, colour-mode bucket, resolution) key so that repeated and adjacent
//! map views skip the index entirely.
//!
//! # Cache Key
//!
//! The key is a pure function of the normalized layer query (query text +
//! sorted filters + spatial params), the colour-mode bucket and the
//! resolution. The viewport is deliberately **not** part of the key:
//! full-layer data is reusable across pans, and viewport-scoped data is
//! validated against its stored bounds at lookup time instead.
//!
//! # At-Most-Once Population
//!
//! Lookup-or-create is atomic. On a miss, the caller becomes the leader for
//! that key and populates under a per-key claim; concurrent identical
//! requests wait on the same claim and observe the one fully-populated
//! result. Readers never see partial data.
//!
//! # Resolution Fallback
//!
//! Before populating, the cache is probed at every finer, still
//! full-layer-scoped resolution: finer-rounded point data is a superset of
//! what a coarser view draws. Coarser data is never substituted for a finer
//! request.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Notify, RwLock};

use crate::config::EngineConfig;
use crate::error::CacheError;
use crate::index::source::{OccurrenceQuery, PointCount};
use crate::query::bbox::Envelope;
use crate::query::env::ColourMode;
use crate::query::resolution::ResolutionLevel;

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for point data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Digest of the normalized layer query
    pub query_hash: String,

    /// Colour-mode bucket id; "-1" is shared by uncoloured and grid modes
    pub colour_bucket: String,

    /// Coordinate-rounding resolution the data was computed at
    pub resolution: ResolutionLevel,
}

impl CacheKey {
    /// Build the key for a layer query.
    ///
    /// `query` must be the full-layer query (no viewport bounds); scoping is
    /// recorded on the cached value, not in the key.
    pub fn build(
        query: &OccurrenceQuery,
        colour_mode: &ColourMode,
        resolution: ResolutionLevel,
    ) -> Self {
        Self {
            query_hash: hash_query(query),
            colour_bucket: colour_mode.cache_bucket(),
            resolution,
        }
    }

    /// Same key at a different resolution (fallback probing).
    pub fn at_resolution(&self, resolution: ResolutionLevel) -> Self {
        Self {
            query_hash: self.query_hash.clone(),
            colour_bucket: self.colour_bucket.clone(),
            resolution,
        }
    }
}

/// Digest the normalized query form.
pub fn hash_query(query: &OccurrenceQuery) -> String {
    hex::encode(Sha256::digest(query.normalized().as_bytes()))
}

// =============================================================================
// Cached Value
// =============================================================================

/// Whether cached data covers the whole logical query or one viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileScope {
    /// Valid for the whole layer; reusable across viewport changes
    FullLayer,
    /// Valid only for the bounding box it was queried with
    Viewport,
}

/// One colour bucket of cached point data.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBucket {
    /// Legend label this bucket was built for
    pub label: String,

    /// RGB colour assigned by the legend
    pub colour: u32,

    /// Catch-all bucket for facet values beyond the palette
    pub is_remainder: bool,

    /// Rounded coordinates and their record counts, in the native reference
    pub points: Vec<PointCount>,
}

/// Immutable point data for one cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTile {
    /// Envelope the data was queried with (informational for full-layer
    /// entries, binding for viewport-scoped ones)
    pub bounds: Envelope,

    /// Resolution the coordinates were rounded at
    pub resolution: ResolutionLevel,

    /// Scope of validity
    pub scope: TileScope,

    /// Colour buckets in legend order
    pub buckets: Vec<TileBucket>,
}

impl CachedTile {
    /// Whether this entry may serve a request for `viewport`.
    pub fn is_reusable_for(&self, viewport: &Envelope) -> bool {
        match self.scope {
            TileScope::FullLayer => true,
            TileScope::Viewport => self.bounds.contains(viewport),
        }
    }

    /// Total number of cached coordinate clusters across buckets.
    pub fn point_count(&self) -> usize {
        self.buckets.iter().map(|b| b.points.len()).sum()
    }

    /// The uncoloured bucket's points, when this is a "-1" entry.
    pub fn uncoloured_points(&self) -> Option<&[PointCount]> {
        match self.buckets.as_slice() {
            [single] => Some(&single.points),
            _ => None,
        }
    }
}

// =============================================================================
// Count Memo
// =============================================================================

/// Kind of memoized count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountKind {
    /// Total matching documents
    Total,
    /// Distinct rounded coordinates at a resolution
    DistinctPoints,
}

/// Memo for cheap document/point counts.
///
/// Entries are small and short-lived relative to tile population, so one
/// coarse lock is enough; there is no per-key claim here.
pub struct CountMemo {
    inner: StdMutex<LruCache<(String, CountKind, Option<ResolutionLevel>), u64>>,
}

impl CountMemo {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: StdMutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1"),
            )),
        }
    }

    pub fn get(
        &self,
        query_hash: &str,
        kind: CountKind,
        resolution: Option<ResolutionLevel>,
    ) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .get(&(query_hash.to_string(), kind, resolution))
            .copied()
    }

    pub fn put(
        &self,
        query_hash: &str,
        kind: CountKind,
        resolution: Option<ResolutionLevel>,
        count: u64,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.put((query_hash.to_string(), kind, resolution), count);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clear();
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Point Data Cache
// =============================================================================

/// State for an in-flight population.
#[derive(Default)]
struct InFlight {
    /// Notification for waiters
    notify: Notify,
    /// Result of the population (set before waiters are notified)
    result: Mutex<Option<Result<Arc<CachedTile>, CacheError>>>,
}

/// Concurrency-safe LRU store of computed point data.
///
/// Shared across all requests via `Arc`; see the module docs for the key,
/// claim and fallback semantics.
pub struct PointDataCache {
    /// Cached entries
    entries: RwLock<LruCache<CacheKey, Arc<CachedTile>>>,

    /// In-flight populations, one claim per key
    in_flight: Mutex<HashMap<CacheKey, Arc<InFlight>>>,

    /// Auxiliary document/point-count memo
    memo: CountMemo,

    /// Version token generation, rotated by administrative clear
    generation: AtomicU64,
}

impl PointDataCache {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_capacity(config.cache_entries, config.memo_entries)
    }

    pub fn with_capacity(entries: usize, memo_entries: usize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(
                NonZeroUsize::new(entries.max(1)).expect("capacity >= 1"),
            )),
            in_flight: Mutex::new(HashMap::new()),
            memo: CountMemo::new(memo_entries),
            generation: AtomicU64::new(0),
        }
    }

    /// The auxiliary count memo.
    pub fn memo(&self) -> &CountMemo {
        &self.memo
    }

    /// Look up reusable data for a key and viewport.
    ///
    /// Checks the exact key first, then every finer full-layer-scoped
    /// resolution, nearest first. Viewport-scoped entries are only returned
    /// when their stored bounds contain the requested viewport.
    pub async fn lookup(&self, key: &CacheKey, viewport: &Envelope) -> Option<Arc<CachedTile>> {
        let mut entries = self.entries.write().await;

        if let Some(tile) = entries.get(key) {
            if tile.is_reusable_for(viewport) {
                return Some(tile.clone());
            }
        }

        for finer in key.resolution.finer_levels() {
            if let Some(tile) = entries.get(&key.at_resolution(finer)) {
                if tile.scope == TileScope::FullLayer {
                    return Some(tile.clone());
                }
            }
        }

        None
    }

    /// Atomic lookup-or-create.
    ///
    /// On a miss the calling task becomes the leader for `key` and runs
    /// `populate`; concurrent callers for the same key wait on the claim and
    /// receive the leader's result. The populated entry is written to the
    /// cache only when `write` is set (the cache-write opt-out still reads).
    ///
    /// Returns the tile and whether it was served from cache.
    pub async fn get_or_populate<F, Fut>(
        &self,
        key: &CacheKey,
        viewport: &Envelope,
        write: bool,
        populate: F,
    ) -> Result<(Arc<CachedTile>, bool), CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<CachedTile, CacheError>>,
    {
        let mut populate = Some(populate);

        loop {
            if let Some(tile) = self.lookup(key, viewport).await {
                return Ok((tile, true));
            }

            let state = {
                let mut in_flight = self.in_flight.lock().await;

                if let Some(state) = in_flight.get(key) {
                    // Another task holds the claim for this key
                    state.clone()
                } else {
                    // We hold the claim
                    let state = Arc::new(InFlight::default());
                    in_flight.insert(key.clone(), state.clone());
                    drop(in_flight);

                    let populate = populate.take().expect("leader consumes populate once");
                    let result = populate().await.map(Arc::new);

                    // Store the result before releasing the claim so every
                    // waiter observes it
                    {
                        let mut slot = state.result.lock().await;
                        *slot = Some(result.clone());
                    }

                    if write {
                        if let Ok(ref tile) = result {
                            let mut entries = self.entries.write().await;
                            entries.put(key.clone(), tile.clone());
                        }
                    }

                    {
                        let mut in_flight = self.in_flight.lock().await;
                        in_flight.remove(key);
                    }
                    state.notify.notify_waiters();

                    return result.map(|tile| (tile, false));
                }
            };

            // Follower: wait until the leader's result lands in the slot
            loop {
                // Register for the wake-up before checking the slot, so a
                // leader finishing in between cannot be missed
                let mut notified = pin!(state.notify.notified());
                notified.as_mut().enable();

                {
                    let slot = state.result.lock().await;
                    match slot.as_ref() {
                        Some(Ok(tile)) if tile.is_reusable_for(viewport) => {
                            return Ok((tile.clone(), true));
                        }
                        // Leader produced viewport-scoped data that does not
                        // cover this request; claim the key ourselves
                        Some(Ok(_)) => break,
                        Some(Err(e)) => return Err(e.clone()),
                        None => {}
                    }
                }

                notified.await;
            }
        }
    }

    /// Administrative clear: empties entries and memo, rotates the version
    /// token.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.memo.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Shared version token for downstream HTTP caches (ETag-shaped;
    /// changes on every administrative clear).
    pub fn version(&self) -> String {
        format!("\"occ-tiles-{}\"", self.generation.load(Ordering::SeqCst))
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn key_for(q: &str, mode: &ColourMode, resolution: ResolutionLevel) -> CacheKey {
        CacheKey::build(&OccurrenceQuery::new(q), mode, resolution)
    }

    fn tile(scope: TileScope, resolution: ResolutionLevel, bounds: Envelope) -> CachedTile {
        CachedTile {
            bounds,
            resolution,
            scope,
            buckets: vec![TileBucket {
                label: String::new(),
                colour: 0xFF0000,
                is_remainder: false,
                points: vec![PointCount::new(151.0, -33.0, 10)],
            }],
        }
    }

    fn world() -> Envelope {
        Envelope::new(-180.0, -90.0, 180.0, 90.0)
    }

    #[test]
    fn test_key_is_pure_function_of_inputs() {
        let a = key_for("genus:Acacia", &ColourMode::Uncoloured, ResolutionLevel::Tenth);
        let b = key_for("genus:Acacia", &ColourMode::Uncoloured, ResolutionLevel::Tenth);
        assert_eq!(a, b);

        let other_query = key_for("genus:Banksia", &ColourMode::Uncoloured, ResolutionLevel::Tenth);
        assert_ne!(a, other_query);

        let other_resolution =
            key_for("genus:Acacia", &ColourMode::Uncoloured, ResolutionLevel::Raw);
        assert_ne!(a, other_resolution);
    }

    #[test]
    fn test_key_ignores_filter_order() {
        let q1 = OccurrenceQuery::new("*:*").with_filter("a:1").with_filter("b:2");
        let q2 = OccurrenceQuery::new("*:*").with_filter("b:2").with_filter("a:1");
        assert_eq!(
            CacheKey::build(&q1, &ColourMode::Grid, ResolutionLevel::Degree),
            CacheKey::build(&q2, &ColourMode::Grid, ResolutionLevel::Degree)
        );
    }

    #[test]
    fn test_uncoloured_and_grid_share_bucket() {
        let a = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Tenth);
        let b = key_for("*:*", &ColourMode::Grid, ResolutionLevel::Tenth);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_populate_and_hit() {
        let cache = PointDataCache::with_capacity(16, 16);
        let key = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Tenth);

        let (first, hit) = cache
            .get_or_populate(&key, &world(), true, || async {
                Ok(tile(TileScope::FullLayer, ResolutionLevel::Tenth, world()))
            })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(first.point_count(), 1);

        let (second, hit) = cache
            .get_or_populate(&key, &world(), true, || async {
                panic!("must not repopulate")
            })
            .await
            .unwrap();
        assert!(hit);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_write_opt_out_skips_insertion() {
        let cache = PointDataCache::with_capacity(16, 16);
        let key = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Tenth);

        let (_, hit) = cache
            .get_or_populate(&key, &world(), false, || async {
                Ok(tile(TileScope::FullLayer, ResolutionLevel::Tenth, world()))
            })
            .await
            .unwrap();
        assert!(!hit);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_finer_full_layer_entry_serves_coarser_request() {
        let cache = PointDataCache::with_capacity(16, 16);
        let fine = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Hundredth);

        cache
            .get_or_populate(&fine, &world(), true, || async {
                Ok(tile(TileScope::FullLayer, ResolutionLevel::Hundredth, world()))
            })
            .await
            .unwrap();

        // Coarser request: fallback must reuse the finer entry
        let coarse = fine.at_resolution(ResolutionLevel::Tenth);
        let (_, hit) = cache
            .get_or_populate(&coarse, &world(), true, || async {
                panic!("fallback must avoid a fresh query")
            })
            .await
            .unwrap();
        assert!(hit);
    }

    #[tokio::test]
    async fn test_coarser_entry_never_serves_finer_request() {
        let cache = PointDataCache::with_capacity(16, 16);
        let coarse = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Tenth);

        cache
            .get_or_populate(&coarse, &world(), true, || async {
                Ok(tile(TileScope::FullLayer, ResolutionLevel::Tenth, world()))
            })
            .await
            .unwrap();

        let fine = coarse.at_resolution(ResolutionLevel::Hundredth);
        let ran = AtomicUsize::new(0);
        let (_, hit) = cache
            .get_or_populate(&fine, &world(), true, || async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(tile(TileScope::FullLayer, ResolutionLevel::Hundredth, world()))
            })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_viewport_scoped_entry_not_reused_across_pans() {
        let cache = PointDataCache::with_capacity(16, 16);
        let key = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Raw);
        let sydney = Envelope::new(150.0, -35.0, 152.0, -33.0);

        cache
            .get_or_populate(&key, &sydney, true, || async {
                Ok(tile(TileScope::Viewport, ResolutionLevel::Raw, sydney))
            })
            .await
            .unwrap();

        // Same viewport: reusable
        let (_, hit) = cache
            .get_or_populate(&key, &sydney, true, || async { panic!("covered") })
            .await
            .unwrap();
        assert!(hit);

        // Panned viewport: must repopulate
        let perth = Envelope::new(115.0, -33.0, 117.0, -31.0);
        let (fresh, hit) = cache
            .get_or_populate(&key, &perth, true, || async {
                Ok(tile(TileScope::Viewport, ResolutionLevel::Raw, perth))
            })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(fresh.bounds, perth);
    }

    #[tokio::test]
    async fn test_viewport_scoped_fallback_not_used_across_resolutions() {
        let cache = PointDataCache::with_capacity(16, 16);
        let sydney = Envelope::new(150.0, -35.0, 152.0, -33.0);
        let fine = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Raw);

        cache
            .get_or_populate(&fine, &sydney, true, || async {
                Ok(tile(TileScope::Viewport, ResolutionLevel::Raw, sydney))
            })
            .await
            .unwrap();

        // Coarser request over the same viewport: the finer entry is
        // viewport-scoped, so fallback must not use it
        let coarse = fine.at_resolution(ResolutionLevel::TenThousandth);
        let (_, hit) = cache
            .get_or_populate(&coarse, &sydney, true, || async {
                Ok(tile(
                    TileScope::FullLayer,
                    ResolutionLevel::TenThousandth,
                    world(),
                ))
            })
            .await
            .unwrap();
        assert!(!hit);
    }

    #[tokio::test]
    async fn test_concurrent_population_is_at_most_once() {
        use tokio::time::{sleep, Duration};

        let cache = Arc::new(PointDataCache::with_capacity(16, 16));
        let key = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Tenth);
        let populations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            let populations = populations.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_populate(&key, &world(), true, move || async move {
                        populations.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(30)).await;
                        Ok(tile(TileScope::FullLayer, ResolutionLevel::Tenth, world()))
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap().0);
        }

        assert_eq!(populations.load(Ordering::SeqCst), 1);
        for tile in &results[1..] {
            assert_eq!(tile, &results[0]);
        }
    }

    #[tokio::test]
    async fn test_population_error_propagates_to_waiters() {
        use crate::error::IndexError;

        let cache = PointDataCache::with_capacity(16, 16);
        let key = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Tenth);

        let result = cache
            .get_or_populate(&key, &world(), true, || async {
                Err(CacheError::Build(IndexError::Upstream("down".to_string())))
            })
            .await;
        assert!(result.is_err());

        // A failed population leaves nothing behind; the next call retries
        let (_, hit) = cache
            .get_or_populate(&key, &world(), true, || async {
                Ok(tile(TileScope::FullLayer, ResolutionLevel::Tenth, world()))
            })
            .await
            .unwrap();
        assert!(!hit);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = PointDataCache::with_capacity(2, 16);
        for q in ["a", "b", "c"] {
            let key = key_for(q, &ColourMode::Uncoloured, ResolutionLevel::Tenth);
            cache
                .get_or_populate(&key, &world(), true, || async {
                    Ok(tile(TileScope::FullLayer, ResolutionLevel::Tenth, world()))
                })
                .await
                .unwrap();
        }
        assert_eq!(cache.len().await, 2);

        // "a" was evicted; a fresh request repopulates
        let key = key_for("a", &ColourMode::Uncoloured, ResolutionLevel::Tenth);
        let (_, hit) = cache
            .get_or_populate(&key, &world(), true, || async {
                Ok(tile(TileScope::FullLayer, ResolutionLevel::Tenth, world()))
            })
            .await
            .unwrap();
        assert!(!hit);
    }

    #[tokio::test]
    async fn test_clear_rotates_version_and_empties() {
        let cache = PointDataCache::with_capacity(16, 16);
        let key = key_for("*:*", &ColourMode::Uncoloured, ResolutionLevel::Tenth);

        cache
            .get_or_populate(&key, &world(), true, || async {
                Ok(tile(TileScope::FullLayer, ResolutionLevel::Tenth, world()))
            })
            .await
            .unwrap();
        cache.memo().put("h", CountKind::Total, None, 42);

        let before = cache.version();
        cache.clear().await;

        assert!(cache.is_empty().await);
        assert!(cache.memo().is_empty());
        assert_ne!(before, cache.version());
    }

    #[test]
    fn test_memo_round_trip() {
        let memo = CountMemo::new(4);
        assert_eq!(memo.get("h", CountKind::Total, None), None);
        memo.put("h", CountKind::Total, None, 7);
        memo.put(
            "h",
            CountKind::DistinctPoints,
            Some(ResolutionLevel::Tenth),
            3,
        );
        assert_eq!(memo.get("h", CountKind::Total, None), Some(7));
        assert_eq!(
            memo.get("h", CountKind::DistinctPoints, Some(ResolutionLevel::Tenth)),
            Some(3)
        );
        assert_eq!(
            memo.get("h", CountKind::DistinctPoints, Some(ResolutionLevel::Raw)),
            None
        );
    }
}
