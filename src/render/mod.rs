//! Rasterisation.
//!
//! Everything that touches pixels lives here. The renderer consumes cached
//! point data (native-reference coordinates), inverse-transforms it into the
//! tile's pixel space and draws with alpha blending:
//!
//! - [`canvas`] - the RGBA drawing surface and pixel mapping
//! - [`points`] - point layers and density grids
//! - [`overlay`] - uncertainty circles and highlight rings
//!
//! Drawing never fails a tile: a point that cannot be projected is logged
//! and skipped.

pub mod canvas;
pub mod overlay;
pub mod points;

pub use canvas::{rgba, PixelMapper, RasterCanvas};
pub use points::{
    draw_density_layers, draw_point_buckets, GridMatrix, GRID_COUNT_CAP,
};
pub use overlay::{
    draw_highlight_rings, draw_uncertainty_circles, UncertaintyGroup, UNCERTAINTY_COLOUR,
};
