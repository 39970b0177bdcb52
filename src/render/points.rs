//! Point layers and density grids.

use tracing::debug;

use crate::index::source::PointCount;
use crate::query::bbox::Envelope;
use crate::query::env::PointStyle;
use crate::query::transform::CrsTransformer;
use crate::tile::cache::TileBucket;

use super::canvas::{rgba, PixelMapper, RasterCanvas};

/// Saturation cap for the density ramp: cells at or above this count render
/// at full intensity.
pub const GRID_COUNT_CAP: u64 = 500;

/// Minimum alpha for an occupied density cell, so single records stay
/// visible at any zoom.
const GRID_MIN_ALPHA: f32 = 0.15;

// =============================================================================
// Point Layers
// =============================================================================

/// Draw cached point buckets onto the canvas.
///
/// Buckets draw in legend order with the remainder bucket last. Points are
/// filtered to the buffered native view, inverse-transformed to the target
/// reference and drawn as filled circles; a per-point transform failure is
/// logged and skipped, never fatal.
pub fn draw_point_buckets(
    canvas: &mut RasterCanvas,
    mapper: &PixelMapper,
    to_native: &CrsTransformer,
    native_view: &Envelope,
    buckets: &[TileBucket],
    style: &PointStyle,
    outline: Option<u32>,
) {
    let radius = style.size.max(1) as i32;
    let outline_colour = outline.map(|c| rgba(c, 1.0));

    let (explicit, remainder): (Vec<&TileBucket>, Vec<&TileBucket>) =
        buckets.iter().partition(|b| !b.is_remainder);

    for bucket in explicit.into_iter().chain(remainder) {
        let fill = rgba(bucket.colour, style.opacity);
        for point in in_view(&bucket.points, native_view) {
            let Some((px, py)) = project_to_pixel(to_native, mapper, point) else {
                continue;
            };
            if !canvas.in_drawable_range(px, py, radius) {
                continue;
            }
            canvas.fill_circle(px, py, radius, fill);
            if let Some(colour) = outline_colour {
                canvas.stroke_circle(px, py, radius, colour);
            }
        }
    }
}

/// Points inside the buffered native view.
fn in_view<'a>(
    points: &'a [PointCount],
    native_view: &'a Envelope,
) -> impl Iterator<Item = &'a PointCount> {
    points
        .iter()
        .filter(move |p| native_view.contains_point(p.x, p.y))
}

/// Inverse-transform one native coordinate into pixel space.
///
/// Returns `None` (after a debug log) when the point cannot be projected.
fn project_to_pixel(
    to_native: &CrsTransformer,
    mapper: &PixelMapper,
    point: &PointCount,
) -> Option<(i32, i32)> {
    match to_native.inverse(point.x, point.y) {
        Ok((tx, ty)) => Some(mapper.to_pixel_i32(tx, ty)),
        Err(e) => {
            debug!(x = point.x, y = point.y, error = %e, "skipping unprojectable point");
            None
        }
    }
}

// =============================================================================
// Density Grids
// =============================================================================

/// An n x n grid of binned record counts over the tile.
#[derive(Debug, Clone, PartialEq)]
pub struct GridMatrix {
    divisions: u32,
    cells: Vec<u64>,
}

impl GridMatrix {
    pub fn new(divisions: u32) -> Self {
        let divisions = divisions.max(1);
        Self {
            divisions,
            cells: vec![0; (divisions * divisions) as usize],
        }
    }

    pub fn divisions(&self) -> u32 {
        self.divisions
    }

    /// Add a record count at a pixel position; positions outside the tile
    /// are ignored.
    pub fn bin(&mut self, px: f64, py: f64, width: u32, height: u32, count: u64) {
        if px < 0.0 || py < 0.0 || px >= width as f64 || py >= height as f64 {
            return;
        }
        let col = (px / width as f64 * self.divisions as f64) as u32;
        let row = (py / height as f64 * self.divisions as f64) as u32;
        let col = col.min(self.divisions - 1);
        let row = row.min(self.divisions - 1);
        self.cells[(row * self.divisions + col) as usize] += count;
    }

    pub fn cell(&self, row: u32, col: u32) -> u64 {
        self.cells[(row * self.divisions + col) as usize]
    }

    /// Bin every in-view point of a bucket.
    pub fn bin_points(
        &mut self,
        mapper: &PixelMapper,
        to_native: &CrsTransformer,
        native_view: &Envelope,
        points: &[PointCount],
    ) {
        for point in in_view(points, native_view) {
            match to_native.inverse(point.x, point.y) {
                Ok((tx, ty)) => {
                    let (px, py) = mapper.to_pixel(tx, ty);
                    self.bin(px, py, mapper.width(), mapper.height(), point.count);
                }
                Err(e) => {
                    debug!(x = point.x, y = point.y, error = %e, "skipping unprojectable point");
                }
            }
        }
    }

    /// Shade occupied cells onto the canvas after all points are binned.
    ///
    /// Cell intensity follows a saturating ramp in `colour`, capped at
    /// [`GRID_COUNT_CAP`].
    pub fn draw(&self, canvas: &mut RasterCanvas, colour: u32) {
        let cell_w = (canvas.width() as f64 / self.divisions as f64).ceil() as u32;
        let cell_h = (canvas.height() as f64 / self.divisions as f64).ceil() as u32;

        for row in 0..self.divisions {
            for col in 0..self.divisions {
                let count = self.cell(row, col);
                if count == 0 {
                    continue;
                }
                let x = (col as f64 * canvas.width() as f64 / self.divisions as f64) as i32;
                let y = (row as f64 * canvas.height() as f64 / self.divisions as f64) as i32;
                canvas.fill_rect(x, y, cell_w, cell_h, grid_cell_colour(colour, count));
            }
        }
    }
}

/// Saturating count -> colour ramp for one density cell.
fn grid_cell_colour(colour: u32, count: u64) -> image::Rgba<u8> {
    let t = (count.min(GRID_COUNT_CAP) as f32) / GRID_COUNT_CAP as f32;
    rgba(colour, GRID_MIN_ALPHA + (1.0 - GRID_MIN_ALPHA) * t)
}

/// Draw pre-aggregated density layers for every bucket.
///
/// Remainder buckets draw before their explicit-value counterparts so
/// overflow density does not occlude named categories.
pub fn draw_density_layers(
    canvas: &mut RasterCanvas,
    mapper: &PixelMapper,
    to_native: &CrsTransformer,
    native_view: &Envelope,
    buckets: &[TileBucket],
    divisions: u32,
) {
    let (remainder, explicit): (Vec<&TileBucket>, Vec<&TileBucket>) =
        buckets.iter().partition(|b| b.is_remainder);

    for bucket in remainder.into_iter().chain(explicit) {
        let mut matrix = GridMatrix::new(divisions);
        matrix.bin_points(mapper, to_native, native_view, &bucket.points);
        matrix.draw(canvas, bucket.colour);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> CrsTransformer {
        CrsTransformer::new(4326, 4326).unwrap()
    }

    fn bucket(colour: u32, is_remainder: bool, points: Vec<PointCount>) -> TileBucket {
        TileBucket {
            label: String::new(),
            colour,
            is_remainder,
            points,
        }
    }

    #[test]
    fn test_single_point_draws_disk() {
        // bbox 0,0,100,100 on a 100x100 tile; one red point at (50,50), size 4
        let env = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let mut canvas = RasterCanvas::new(100, 100);
        let mapper = PixelMapper::new(env, 100, 100);
        let buckets = vec![bucket(0xFF0000, false, vec![PointCount::new(50.0, 50.0, 1)])];

        draw_point_buckets(
            &mut canvas,
            &mapper,
            &identity(),
            &env.expanded(10.0, 10.0),
            &buckets,
            &PointStyle {
                colour: 0xFF0000,
                size: 4,
                opacity: 1.0,
            },
            None,
        );

        // red pixels in a ~4px disk around (50,50)
        assert_eq!(canvas.pixel(50, 50).0, [255, 0, 0, 255]);
        assert_eq!(canvas.pixel(53, 50).0, [255, 0, 0, 255]);
        assert_eq!(canvas.pixel(50, 47).0, [255, 0, 0, 255]);
        // transparent elsewhere
        assert_eq!(canvas.pixel(50, 40).0[3], 0);
        assert_eq!(canvas.pixel(10, 10).0[3], 0);
        assert_eq!(canvas.pixel(99, 99).0[3], 0);
    }

    #[test]
    fn test_out_of_view_points_skipped() {
        let env = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let mut canvas = RasterCanvas::new(100, 100);
        let mapper = PixelMapper::new(env, 100, 100);
        let buckets = vec![bucket(
            0xFF0000,
            false,
            vec![PointCount::new(500.0, 500.0, 1)],
        )];

        draw_point_buckets(
            &mut canvas,
            &mapper,
            &identity(),
            &env.expanded(10.0, 10.0),
            &buckets,
            &PointStyle::default(),
            None,
        );

        for y in [0u32, 50, 99] {
            for x in [0u32, 50, 99] {
                assert_eq!(canvas.pixel(x, y).0[3], 0);
            }
        }
    }

    #[test]
    fn test_remainder_bucket_draws_last() {
        let env = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let mut canvas = RasterCanvas::new(100, 100);
        let mapper = PixelMapper::new(env, 100, 100);

        // remainder listed first but must draw last, ending up on top
        let buckets = vec![
            bucket(0x0000FF, true, vec![PointCount::new(50.0, 50.0, 1)]),
            bucket(0xFF0000, false, vec![PointCount::new(50.0, 50.0, 1)]),
        ];

        draw_point_buckets(
            &mut canvas,
            &mapper,
            &identity(),
            &env.expanded(10.0, 10.0),
            &buckets,
            &PointStyle {
                colour: 0,
                size: 3,
                opacity: 1.0,
            },
            None,
        );

        assert_eq!(canvas.pixel(50, 50).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_outline_drawn() {
        let env = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let mut canvas = RasterCanvas::new(100, 100);
        let mapper = PixelMapper::new(env, 100, 100);
        let buckets = vec![bucket(0xFF0000, false, vec![PointCount::new(50.0, 50.0, 1)])];

        draw_point_buckets(
            &mut canvas,
            &mapper,
            &identity(),
            &env.expanded(10.0, 10.0),
            &buckets,
            &PointStyle {
                colour: 0xFF0000,
                size: 4,
                opacity: 1.0,
            },
            Some(0x000000),
        );

        // ring pixel at the circle's edge is black
        assert_eq!(canvas.pixel(54, 50).0, [0, 0, 0, 255]);
        // interior stays red
        assert_eq!(canvas.pixel(50, 50).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_grid_binning() {
        let mut matrix = GridMatrix::new(4);
        // 100x100 tile, 4 divisions -> 25px cells
        matrix.bin(10.0, 10.0, 100, 100, 3);
        matrix.bin(12.0, 12.0, 100, 100, 2);
        matrix.bin(99.0, 99.0, 100, 100, 1);
        matrix.bin(-5.0, 10.0, 100, 100, 100); // outside, ignored

        assert_eq!(matrix.cell(0, 0), 5);
        assert_eq!(matrix.cell(3, 3), 1);
        assert_eq!(matrix.cell(1, 1), 0);
    }

    #[test]
    fn test_grid_ramp_saturates() {
        let faint = grid_cell_colour(0xFF0000, 1);
        let capped = grid_cell_colour(0xFF0000, GRID_COUNT_CAP);
        let beyond = grid_cell_colour(0xFF0000, GRID_COUNT_CAP * 10);
        assert!(faint.0[3] < capped.0[3]);
        assert_eq!(capped.0[3], 255);
        assert_eq!(capped, beyond);
    }

    #[test]
    fn test_grid_draw_shades_occupied_cells() {
        let env = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let mut canvas = RasterCanvas::new(100, 100);
        let mapper = PixelMapper::new(env, 100, 100);

        let mut matrix = GridMatrix::new(4);
        matrix.bin_points(
            &mapper,
            &identity(),
            &env,
            &[PointCount::new(10.0, 90.0, GRID_COUNT_CAP)],
        );
        matrix.draw(&mut canvas, 0xFF0000);

        // cell (0,0) covers pixels 0..25 x 0..25
        assert_eq!(canvas.pixel(5, 5).0, [255, 0, 0, 255]);
        assert_eq!(canvas.pixel(80, 80).0[3], 0);
    }

    #[test]
    fn test_density_layers_remainder_under_explicit() {
        let env = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let mut canvas = RasterCanvas::new(100, 100);
        let mapper = PixelMapper::new(env, 100, 100);

        // both buckets saturate the same cell; explicit (listed first) must
        // still draw over the remainder
        let buckets = vec![
            bucket(
                0xFF0000,
                false,
                vec![PointCount::new(10.0, 90.0, GRID_COUNT_CAP)],
            ),
            bucket(
                0x0000FF,
                true,
                vec![PointCount::new(10.0, 90.0, GRID_COUNT_CAP)],
            ),
        ];

        draw_density_layers(&mut canvas, &mapper, &identity(), &env, &buckets, 4);

        let px = canvas.pixel(5, 5).0;
        assert_eq!(px[0], 255, "explicit red layer must be on top: {px:?}");
    }
}
