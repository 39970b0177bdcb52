//! Request formatting and coordinate handling.
//!
//! This module owns everything between the raw request surface and the
//! index-facing query geometry:
//!
//! - [`bbox`] - bounding box parsing and the [`Envelope`] type
//! - [`env`] - the `key:value;...` style descriptor, parsed into [`EnvStyle`]
//! - [`transform`] - EPSG-code coordinate transforms and the buffered
//!   four-corner query envelope
//! - [`resolution`] - degrees-per-pixel to coordinate-rounding precision
//! - [`store`] - the parameter-store collaborator for opaque query references

pub mod bbox;
pub mod env;
pub mod resolution;
pub mod store;
pub mod transform;

pub use bbox::Envelope;
pub use env::{CacheMode, ColourMode, EnvStyle, PointStyle, DEFAULT_POINT_COLOUR};
pub use resolution::ResolutionLevel;
pub use store::{QueryStore, StoredQuery};
pub use transform::{
    query_envelope, CrsTransformer, HIGHLIGHT_RING_ALLOWANCE_PX, PROJECTION_SKEW_BUFFER_PX,
};
