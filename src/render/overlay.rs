//! Optional overlays: uncertainty circles and highlight rings.
//!
//! Overlays are best-effort. The service fetches their data separately and
//! treats an upstream failure as "skip this overlay", so the functions here
//! only ever draw.

use tracing::debug;

use crate::index::source::PointCount;
use crate::query::bbox::Envelope;
use crate::query::transform::CrsTransformer;

use super::canvas::{rgba, PixelMapper, RasterCanvas};

/// Colour for uncertainty circles.
pub const UNCERTAINTY_COLOUR: u32 = 0x4169E1;

/// Fill opacity inside an uncertainty circle.
const UNCERTAINTY_FILL_OPACITY: f32 = 0.15;

/// One group of coordinates sharing an uncertainty radius.
#[derive(Debug, Clone, PartialEq)]
pub struct UncertaintyGroup {
    /// Uncertainty radius in metres (already capped by the caller)
    pub radius_metres: f64,
    pub points: Vec<PointCount>,
}

/// Draw uncertainty circles for every radius group.
///
/// `metres_per_pixel` converts record radii into pixel radii for this view.
/// All groups share the caller's single max-circle-buffered envelope, so
/// circles straddling the tile edge are not clipped away.
pub fn draw_uncertainty_circles(
    canvas: &mut RasterCanvas,
    mapper: &PixelMapper,
    to_native: &CrsTransformer,
    native_view: &Envelope,
    groups: &[UncertaintyGroup],
    metres_per_pixel: f64,
) {
    if metres_per_pixel <= 0.0 {
        return;
    }

    let fill = rgba(UNCERTAINTY_COLOUR, UNCERTAINTY_FILL_OPACITY);
    let ring = rgba(UNCERTAINTY_COLOUR, 1.0);

    for group in groups {
        let radius = (group.radius_metres / metres_per_pixel).round().max(1.0) as i32;
        for point in &group.points {
            if !native_view.contains_point(point.x, point.y) {
                continue;
            }
            let (px, py) = match to_native.inverse(point.x, point.y) {
                Ok((tx, ty)) => mapper.to_pixel_i32(tx, ty),
                Err(e) => {
                    debug!(x = point.x, y = point.y, error = %e, "skipping unprojectable point");
                    continue;
                }
            };
            if !canvas.in_drawable_range(px, py, radius) {
                continue;
            }
            canvas.fill_circle(px, py, radius, fill);
            canvas.stroke_circle(px, py, radius, ring);
        }
    }
}

/// Draw highlight rings around the given points, overlaid last.
///
/// Rings are unfilled so the highlighted points keep their bucket colour.
pub fn draw_highlight_rings(
    canvas: &mut RasterCanvas,
    mapper: &PixelMapper,
    to_native: &CrsTransformer,
    native_view: &Envelope,
    points: &[PointCount],
    point_radius_px: u32,
    colour: u32,
) {
    let ring_colour = rgba(colour, 1.0);
    let radius = point_radius_px as i32 + 2;

    for point in points {
        if !native_view.contains_point(point.x, point.y) {
            continue;
        }
        let (px, py) = match to_native.inverse(point.x, point.y) {
            Ok((tx, ty)) => mapper.to_pixel_i32(tx, ty),
            Err(e) => {
                debug!(x = point.x, y = point.y, error = %e, "skipping unprojectable point");
                continue;
            }
        };
        if !canvas.in_drawable_range(px, py, radius) {
            continue;
        }
        canvas.stroke_circle(px, py, radius, ring_colour);
    }
}
