//! # occ-tiles
//!
//! A tile rendering and caching engine for biodiversity occurrence maps.
//!
//! The engine turns an attribute+spatial query against an occurrence index
//! into a rendered raster map tile - points, density grids, colour-coded
//! facets, uncertainty circles and highlight rings - backed by a
//! multi-resolution, concurrency-safe point cache that avoids re-issuing
//! expensive aggregation queries for repeated and adjacent map views.
//!
//! ## Features
//!
//! - **Coordinate transforms**: tiles in any EPSG reference, queried against
//!   the index's native geographic reference via four-corner envelopes
//! - **Cost-based query planning**: combined pivot vs per-bucket
//!   aggregation, viewport re-scoping for layers too dense to cache
//! - **At-most-once cache population**: concurrent identical requests share
//!   one computation and one result
//! - **Resolution fallback**: finer-rounded cached data serves coarser views
//!   without new index queries
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`query`] - request parsing, CRS transforms, resolution selection
//! - [`index`] - the occurrence-index collaborator and query engine
//! - [`legend`] - deterministic facet-value colour assignment
//! - [`render`] - rasterisation of points, grids and overlays
//! - [`tile`] - point-data cache, PNG encoder and the orchestrating service
//! - [`config`] - engine tunables
//! - [`error`] - the typed error taxonomy
//!
//! ## Example
//!
//! ```rust,ignore
//! use occ_tiles::{TileParams, TileService};
//!
//! // `index` implements occ_tiles::OccurrenceIndex for your search backend
//! let service = TileService::new(index);
//!
//! let params = TileParams {
//!     q: Some("genus:Acacia".to_string()),
//!     bbox: "16000000,-4500000,16200000,-4300000".to_string(),
//!     srs: "EPSG:3857".to_string(),
//!     width: 256,
//!     height: 256,
//!     env: "color:e41a1c;size:4;opacity:0.8".to_string(),
//!     ..TileParams::default()
//! };
//!
//! let tile = service.render(&params).await?;
//! // tile.data is a PNG byte stream; tile.version feeds the ETag
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod legend;
pub mod query;
pub mod render;
pub mod tile;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{CacheError, IndexError, ProjectionError, RequestError, TileError};
pub use index::{
    select_strategy, FacetCount, OccurrenceIndex, OccurrenceQuery, PointCount, PointSourceEngine,
    PointSourceResult, QueryStrategy,
};
pub use legend::{Legend, LegendItem, LEGEND_PALETTE};
pub use query::{
    CacheMode, ColourMode, CrsTransformer, EnvStyle, Envelope, PointStyle, QueryStore,
    ResolutionLevel, StoredQuery,
};
pub use render::{GridMatrix, PixelMapper, RasterCanvas};
pub use tile::{
    CacheKey, CachedTile, CountMemo, PngTileEncoder, PointDataCache, RenderedTile, TileBucket,
    TileParams, TileRequest, TileScope, TileService,
};
