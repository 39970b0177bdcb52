//! Tile service: the engine's front door.
//!
//! `TileService` orchestrates the full pipeline for one request:
//!
//! 1. Parse the request surface into a typed [`TileRequest`]
//! 2. Project the buffered bbox into the index's native reference
//! 3. Select the coordinate-rounding resolution
//! 4. Atomically look up or populate the point-data cache
//! 5. Rasterise points / density grid plus optional overlays
//! 6. Encode the buffer as PNG
//!
//! A query matching nothing yields the pre-built blank tile. Failures in the
//! optional overlays degrade to "skip this overlay"; everything else maps to
//! the typed error taxonomy for the consuming HTTP layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{CacheError, IndexError, RequestError, TileError};
use crate::index::engine::{PointSourceEngine, PointSourceResult};
use crate::index::source::{OccurrenceIndex, OccurrenceQuery};
use crate::legend::Legend;
use crate::query::bbox::Envelope;
use crate::query::env::{parse_colour, CacheMode, ColourMode, EnvStyle};
use crate::query::resolution::ResolutionLevel;
use crate::query::store::QueryStore;
use crate::query::transform::{query_envelope, CrsTransformer, NATIVE_SRID};
use crate::render::canvas::{PixelMapper, RasterCanvas};
use crate::render::overlay::{
    draw_highlight_rings, draw_uncertainty_circles, UncertaintyGroup,
};
use crate::render::points::{draw_density_layers, draw_point_buckets};

use super::cache::{CacheKey, CachedTile, PointDataCache, TileScope};
use super::encoder::PngTileEncoder;

/// Ring colour for the highlight overlay.
pub const HIGHLIGHT_COLOUR: u32 = 0xFF0000;

/// Default outline colour when the request enables outlining without one.
pub const DEFAULT_OUTLINE_COLOUR: u32 = 0x000000;

/// Approximate metres per degree of latitude, for uncertainty radii.
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Largest accepted tile edge, in pixels.
const MAX_TILE_DIMENSION: u32 = 4096;

// =============================================================================
// Request Surface
// =============================================================================

/// Raw request parameters as the HTTP layer hands them over.
#[derive(Debug, Clone, Default)]
pub struct TileParams {
    /// Query text; defaults to match-all
    pub q: Option<String>,

    /// Opaque reference to a stored query, resolved via the parameter store
    pub qid: Option<String>,

    /// Filter clauses
    pub filters: Vec<String>,

    /// `minx,miny,maxx,maxy` in the target reference
    pub bbox: String,

    /// Target spatial reference, e.g. `EPSG:3857`; empty means the native
    /// reference
    pub srs: String,

    /// Tile pixel width
    pub width: u32,

    /// Tile pixel height
    pub height: u32,

    /// Style descriptor (`color:...;size:...;...`)
    pub env: String,

    /// Outline drawn points
    pub outline: bool,

    /// Outline colour as `RRGGBB`
    pub outline_colour: Option<String>,

    /// Cache mode: `on`, `off` or default
    pub cache: Option<String>,
}

/// A fully parsed and validated tile request.
#[derive(Debug, Clone)]
pub struct TileRequest {
    /// The layer query (never carries viewport bounds)
    pub query: OccurrenceQuery,

    /// Requested bbox in the target reference
    pub bbox: Envelope,

    /// Target spatial reference id
    pub srid: u32,

    pub width: u32,
    pub height: u32,

    pub style: EnvStyle,

    /// Outline colour when outlining is enabled
    pub outline: Option<u32>,

    pub cache_mode: CacheMode,
}

impl TileRequest {
    /// Parse the raw request surface.
    ///
    /// Stored-query references (`qid`) are resolved separately by
    /// [`TileService::resolve`], which has access to the parameter store.
    pub fn parse(params: &TileParams) -> Result<Self, RequestError> {
        let bbox = Envelope::parse(&params.bbox)?;

        if params.width == 0
            || params.height == 0
            || params.width > MAX_TILE_DIMENSION
            || params.height > MAX_TILE_DIMENSION
        {
            return Err(RequestError::InvalidDimensions {
                width: params.width,
                height: params.height,
            });
        }

        let srid = parse_srid(&params.srs)?;
        let style = EnvStyle::parse(&params.env)?;

        let outline = if params.outline {
            Some(match &params.outline_colour {
                Some(colour) => parse_colour(colour)?,
                None => DEFAULT_OUTLINE_COLOUR,
            })
        } else {
            None
        };

        let mut query =
            OccurrenceQuery::new(params.q.clone().unwrap_or_else(|| "*:*".to_string()));
        query.filters = params.filters.clone();

        Ok(Self {
            query,
            bbox,
            srid,
            width: params.width,
            height: params.height,
            style,
            outline,
            cache_mode: CacheMode::parse(params.cache.as_deref().unwrap_or("")),
        })
    }
}

/// Parse `EPSG:<code>` (or a bare code) into an srid.
fn parse_srid(input: &str) -> Result<u32, RequestError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(NATIVE_SRID);
    }
    let code = trimmed
        .strip_prefix("EPSG:")
        .or_else(|| trimmed.strip_prefix("epsg:"))
        .unwrap_or(trimmed);
    code.parse().map_err(|_| RequestError::MalformedSrs {
        input: input.to_string(),
    })
}

// =============================================================================
// Response
// =============================================================================

/// A rendered tile.
#[derive(Debug, Clone)]
pub struct RenderedTile {
    /// PNG bytes
    pub data: Bytes,

    /// Whether the point data came from the cache
    pub cache_hit: bool,

    /// Whether this is the pre-built blank tile (zero matches)
    pub blank: bool,

    /// Cache version token for downstream ETag construction
    pub version: String,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Orchestrates tile production over an occurrence index.
///
/// Shared across requests via `Arc`; all mutable state lives in the
/// injectable [`PointDataCache`].
pub struct TileService<I: OccurrenceIndex> {
    index: Arc<I>,
    cache: Arc<PointDataCache>,
    encoder: PngTileEncoder,
    config: EngineConfig,
    query_store: Option<Arc<dyn QueryStore>>,

    /// Pre-built blank tiles by dimension
    blanks: StdMutex<HashMap<(u32, u32), Bytes>>,
}

impl<I: OccurrenceIndex> TileService<I> {
    pub fn new(index: I) -> Self {
        Self::with_config(index, EngineConfig::default())
    }

    pub fn with_config(index: I, config: EngineConfig) -> Self {
        let cache = Arc::new(PointDataCache::new(&config));
        Self {
            index: Arc::new(index),
            cache,
            encoder: PngTileEncoder::new(),
            config,
            query_store: None,
            blanks: StdMutex::new(HashMap::new()),
        }
    }

    /// Attach the parameter-store collaborator for `qid` resolution.
    pub fn with_query_store(mut self, store: Arc<dyn QueryStore>) -> Self {
        self.query_store = Some(store);
        self
    }

    /// The injectable point-data cache.
    pub fn cache(&self) -> &Arc<PointDataCache> {
        &self.cache
    }

    /// Administrative cache clear: empties point data and count memo and
    /// rotates the version token. Authentication is the caller's concern.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Current cache version token (ETag-shaped).
    pub fn cache_version(&self) -> String {
        self.cache.version()
    }

    /// Resolve raw parameters into a request, expanding stored-query
    /// references via the parameter store.
    pub async fn resolve(&self, params: &TileParams) -> Result<TileRequest, TileError> {
        let mut request = TileRequest::parse(params)?;

        if let Some(qid) = &params.qid {
            let store = self
                .query_store
                .as_ref()
                .ok_or_else(|| RequestError::UnknownQueryReference { id: qid.clone() })?;
            let stored = store
                .get(qid)
                .await?
                .ok_or_else(|| RequestError::UnknownQueryReference { id: qid.clone() })?;

            request.query.q = stored.q;
            request.query.filters.extend(stored.filters);
            if let Some(wkt) = stored.wkt {
                // spatial params participate in the cache key via the filters
                request.query.filters.push(format!("spatial:\"{wkt}\""));
            }
        }

        Ok(request)
    }

    /// Parse, resolve and render in one call.
    pub async fn render(&self, params: &TileParams) -> Result<RenderedTile, TileError> {
        let request = self.resolve(params).await?;
        self.render_tile(&request).await
    }

    /// Render a parsed request.
    pub async fn render_tile(&self, request: &TileRequest) -> Result<RenderedTile, TileError> {
        let to_native = CrsTransformer::to_native(request.srid)?;

        // Buffered four-corner envelope in the native reference
        let native_view = query_envelope(
            &request.bbox,
            request.width,
            request.height,
            request.style.style.size,
            request.style.highlight.is_some(),
            &to_native,
        )?;

        let resolution = ResolutionLevel::select(&native_view, request.width, request.height);
        let colour_mode = &request.style.colour_mode;
        let key = CacheKey::build(&request.query, colour_mode, resolution);

        debug!(
            resolution = resolution.label(),
            bucket = %key.colour_bucket,
            "rendering tile"
        );

        let (tile, cache_hit) = self
            .cache
            .get_or_populate(
                &key,
                &native_view,
                request.cache_mode.writes(),
                || self.populate(request, &native_view, resolution),
            )
            .await?;

        // Zero matches render nothing; substitute the pre-built blank tile
        if tile.point_count() == 0 {
            return Ok(RenderedTile {
                data: self.blank_tile(request.width, request.height)?,
                cache_hit,
                blank: true,
                version: self.cache.version(),
            });
        }

        let mut canvas = RasterCanvas::new(request.width, request.height);
        let mapper = PixelMapper::new(request.bbox, request.width, request.height);

        if request.style.uncertainty {
            self.draw_uncertainty(
                &mut canvas,
                &mapper,
                &to_native,
                request,
                &native_view,
                resolution,
            )
            .await;
        }

        match colour_mode {
            ColourMode::Grid => {
                let divisions = request
                    .style
                    .grid_divisions
                    .unwrap_or(self.config.grid_divisions);
                draw_density_layers(
                    &mut canvas,
                    &mapper,
                    &to_native,
                    &native_view,
                    &tile.buckets,
                    divisions,
                );
            }
            _ => {
                draw_point_buckets(
                    &mut canvas,
                    &mapper,
                    &to_native,
                    &native_view,
                    &tile.buckets,
                    &request.style.style,
                    request.outline,
                );
            }
        }

        if let Some(sel) = &request.style.highlight {
            self.draw_highlight(
                &mut canvas,
                &mapper,
                &to_native,
                request,
                sel,
                &native_view,
                resolution,
            )
            .await;
        }

        let data = match self.encoder.encode(canvas.image()) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "abandoning tile response");
                return Err(e);
            }
        };

        Ok(RenderedTile {
            data,
            cache_hit,
            blank: false,
            version: self.cache.version(),
        })
    }

    /// Legend for a query and colour mode, as served to map clients.
    pub async fn legend(
        &self,
        query: &OccurrenceQuery,
        colour_mode: &ColourMode,
        colour: u32,
    ) -> Result<Legend, TileError> {
        Ok(self.build_legend(query, colour_mode, colour).await?)
    }

    /// Populate one cache entry (runs under the cache's per-key claim).
    async fn populate(
        &self,
        request: &TileRequest,
        native_view: &Envelope,
        resolution: ResolutionLevel,
    ) -> Result<CachedTile, CacheError> {
        let colour_mode = &request.style.colour_mode;

        let legend = self
            .build_legend(&request.query, colour_mode, request.style.style.colour)
            .await
            .map_err(CacheError::Build)?;

        // An already-cached uncoloured entry can stand in for the remainder
        // bucket during per-bucket fetches
        let uncoloured = match colour_mode {
            ColourMode::Facet { .. } => {
                let key = CacheKey::build(&request.query, &ColourMode::Uncoloured, resolution);
                self.cache.lookup(&key, native_view).await
            }
            _ => None,
        };

        let engine = PointSourceEngine::new(self.index.as_ref(), self.cache.memo(), &self.config);
        match engine
            .fetch(
                &request.query,
                native_view,
                resolution,
                colour_mode,
                &legend,
                uncoloured,
            )
            .await
        {
            Ok(PointSourceResult::Data(tile)) => Ok(tile),
            Ok(PointSourceResult::Empty) => Ok(CachedTile {
                bounds: Envelope::new(-180.0, -90.0, 180.0, 90.0),
                resolution,
                scope: TileScope::FullLayer,
                buckets: Vec::new(),
            }),
            Err(e) => Err(CacheError::Build(e)),
        }
    }

    async fn build_legend(
        &self,
        query: &OccurrenceQuery,
        colour_mode: &ColourMode,
        colour: u32,
    ) -> Result<Legend, IndexError> {
        match colour_mode {
            ColourMode::Uncoloured | ColourMode::Grid => Ok(Legend::uncoloured(colour)),
            ColourMode::Facet {
                field,
                cutpoints: Some(cuts),
            } => Ok(Legend::ranged(field, cuts)),
            ColourMode::Facet {
                field,
                cutpoints: None,
            } => {
                let values = self
                    .index
                    .facet_values(query, field, self.config.facet_value_limit)
                    .await?;
                Ok(Legend::categorical(field, &values))
            }
        }
    }

    /// Draw the uncertainty overlay; upstream failure skips the overlay.
    #[allow(clippy::too_many_arguments)]
    async fn draw_uncertainty(
        &self,
        canvas: &mut RasterCanvas,
        mapper: &PixelMapper,
        to_native: &CrsTransformer,
        request: &TileRequest,
        native_view: &Envelope,
        resolution: ResolutionLevel,
    ) {
        // One shared envelope sized to the maximum possible circle, so
        // circles straddling the tile edge are not clipped away
        let cap_degrees = self.config.max_uncertainty_metres / METRES_PER_DEGREE;
        let circle_view = native_view.expanded(cap_degrees, cap_degrees);

        let metres_per_pixel =
            native_view.width() * METRES_PER_DEGREE / request.width.max(1) as f64;

        match self
            .uncertainty_groups(&request.query, &circle_view, resolution)
            .await
        {
            Ok(groups) => {
                draw_uncertainty_circles(
                    canvas,
                    mapper,
                    to_native,
                    &circle_view,
                    &groups,
                    metres_per_pixel,
                );
            }
            Err(e) => warn!(error = %e, "uncertainty overlay failed; skipping"),
        }
    }

    /// Group in-view records by their distinct uncertainty radii.
    ///
    /// Unspecified or unparseable radii are skipped; radii at or above the
    /// cap are drawn at the cap.
    async fn uncertainty_groups(
        &self,
        query: &OccurrenceQuery,
        circle_view: &Envelope,
        resolution: ResolutionLevel,
    ) -> Result<Vec<UncertaintyGroup>, IndexError> {
        let field = &self.config.uncertainty_field;
        let scoped = query.with_bounds(*circle_view);

        let values = self
            .index
            .facet_values(&scoped, field, self.config.facet_value_limit)
            .await?;

        let mut groups = Vec::new();
        for facet in values {
            let Ok(radius) = facet.value.trim().parse::<f64>() else {
                continue;
            };
            if radius <= 0.0 {
                continue;
            }

            let filter = format!("{}:\"{}\"", field, facet.value);
            let points = self
                .index
                .coordinate_counts(&scoped.with_filter(filter), resolution)
                .await?;

            groups.push(UncertaintyGroup {
                radius_metres: radius.min(self.config.max_uncertainty_metres),
                points,
            });
        }

        Ok(groups)
    }

    /// Draw the highlight overlay; upstream failure skips the overlay.
    #[allow(clippy::too_many_arguments)]
    async fn draw_highlight(
        &self,
        canvas: &mut RasterCanvas,
        mapper: &PixelMapper,
        to_native: &CrsTransformer,
        request: &TileRequest,
        sel: &str,
        native_view: &Envelope,
        resolution: ResolutionLevel,
    ) {
        // The sub-filter intersected with the viewport
        let scoped = request
            .query
            .with_filter(sel.to_string())
            .with_bounds(*native_view);

        match self.index.coordinate_counts(&scoped, resolution).await {
            Ok(points) => {
                draw_highlight_rings(
                    canvas,
                    mapper,
                    to_native,
                    native_view,
                    &points,
                    request.style.style.size,
                    HIGHLIGHT_COLOUR,
                );
            }
            Err(e) => warn!(error = %e, "highlight overlay failed; skipping"),
        }
    }

    /// The pre-built blank tile for a dimension, built once.
    fn blank_tile(&self, width: u32, height: u32) -> Result<Bytes, TileError> {
        {
            let blanks = self.blanks.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(data) = blanks.get(&(width, height)) {
                return Ok(data.clone());
            }
        }
        let data = self.encoder.blank(width, height)?;
        let mut blanks = self.blanks.lock().unwrap_or_else(|e| e.into_inner());
        blanks.insert((width, height), data.clone());
        Ok(data)
    }
}

// =============================================================================
// Tests
// =============================================================================
