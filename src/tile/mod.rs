//! Tile production layer.
//!
//! This module glues the engine together for consumers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP layer (external)      │
//! └────────────────────┬────────────────────┘
//!                      │ TileParams
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileService                │
//! │  ┌───────────────┐  ┌────────────────┐  │
//! │  │ PointDataCache│  │ PngTileEncoder │  │
//! │  │ (per-key claim│  │ (RGBA → PNG)   │  │
//! │  │  + LRU + memo)│  │                │  │
//! │  └───────────────┘  └────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ OccurrenceIndex
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        search backend (external)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileService`]: orchestrates parse → project → cache → draw → encode
//! - [`PointDataCache`]: concurrency-safe point-data store with resolution
//!   fallback and a shared version token
//! - [`PngTileEncoder`]: RGBA buffer to PNG bytes
//! - [`TileParams`] / [`TileRequest`]: the request surface, raw and typed
//! - [`RenderedTile`]: response payload plus cache metadata

pub mod cache;
pub mod encoder;
pub mod service;

pub use cache::{
    hash_query, CacheKey, CachedTile, CountKind, CountMemo, PointDataCache, TileBucket, TileScope,
};
pub use encoder::PngTileEncoder;
pub use service::{
    RenderedTile, TileParams, TileRequest, TileService, DEFAULT_OUTLINE_COLOUR, HIGHLIGHT_COLOUR,
};
