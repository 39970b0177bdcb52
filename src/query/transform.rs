//! Coordinate reference transforms and the buffered query envelope.
//!
//! The index stores coordinates in its native geographic reference
//! (EPSG:4326). Tile requests arrive in an arbitrary target reference,
//! typically Web Mercator. This module projects between the two using
//! `proj4rs` with definitions resolved from the EPSG database, and computes
//! the buffered native-CRS envelope a tile query must cover.
//!
//! Arbitrary projections can rotate an axis-aligned box, so the query
//! envelope is taken over **all four** transformed corners; transforming
//! opposite corners alone would clip points near the tile edge.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{ProjectionError, RequestError};

use super::bbox::Envelope;

/// EPSG code of the index's native geographic reference.
pub const NATIVE_SRID: u32 = 4326;

/// Extra buffer for the highlight ring stroke around a dot, in pixels.
pub const HIGHLIGHT_RING_ALLOWANCE_PX: u32 = 3;

/// Fixed skew-correction buffer for projections whose axes do not stay
/// aligned under transformation, in pixels.
pub const PROJECTION_SKEW_BUFFER_PX: u32 = 5;

/// Legacy Web Mercator alias still sent by older map clients.
const LEGACY_WEB_MERCATOR: u32 = 900_913;

// =============================================================================
// CrsTransformer
// =============================================================================

/// A bidirectional transform between a tile's target reference and the
/// index's native reference.
///
/// `forward` goes target → native (query construction); `inverse` goes
/// native → target (rasterisation).
pub struct CrsTransformer {
    source: Option<Proj>,
    target: Option<Proj>,
    source_srid: u32,
    target_srid: u32,
}

impl CrsTransformer {
    /// Build a transformer between two EPSG codes.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownSrid`] when either code is not in the
    /// EPSG database.
    pub fn new(source_srid: u32, target_srid: u32) -> Result<Self, RequestError> {
        let source_srid = canonical_srid(source_srid);
        let target_srid = canonical_srid(target_srid);

        // Identical references need no projection machinery and keep
        // coordinates bit-exact.
        if source_srid == target_srid {
            return Ok(Self {
                source: None,
                target: None,
                source_srid,
                target_srid,
            });
        }

        Ok(Self {
            source: Some(proj_for_srid(source_srid)?),
            target: Some(proj_for_srid(target_srid)?),
            source_srid,
            target_srid,
        })
    }

    /// Transformer from a tile's target reference to the native reference.
    pub fn to_native(target_srid: u32) -> Result<Self, RequestError> {
        Self::new(target_srid, NATIVE_SRID)
    }

    pub fn source_srid(&self) -> u32 {
        self.source_srid
    }

    pub fn target_srid(&self) -> u32 {
        self.target_srid
    }

    /// Forward-transform one point (source → target reference).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Point`]; callers decide whether that is
    /// fatal (whole envelope) or skippable (single drawn point).
    pub fn forward(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let (Some(source), Some(target)) = (&self.source, &self.target) else {
            return Ok((x, y));
        };
        project(source, target, x, y)
    }

    /// Inverse-transform one point (target → source reference).
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let (Some(source), Some(target)) = (&self.source, &self.target) else {
            return Ok((x, y));
        };
        project(target, source, x, y)
    }

    /// Forward-transform an envelope through all four corners and return the
    /// axis-aligned envelope of the results.
    ///
    /// # Errors
    ///
    /// A failure on any corner is a whole-envelope
    /// [`ProjectionError::Envelope`].
    pub fn forward_envelope(&self, env: &Envelope) -> Result<Envelope, ProjectionError> {
        let corners = [
            (env.min_x, env.min_y),
            (env.min_x, env.max_y),
            (env.max_x, env.min_y),
            (env.max_x, env.max_y),
        ];

        let mut transformed = Vec::with_capacity(4);
        for (x, y) in corners {
            let point = self.forward(x, y).map_err(|e| ProjectionError::Envelope {
                from: self.source_srid,
                to: self.target_srid,
                reason: e.to_string(),
            })?;
            transformed.push(point);
        }

        // from_points is infallible here: four corners were just pushed
        Ok(Envelope::from_points(transformed).expect("four corners"))
    }
}

/// Project a single point between two prepared projections.
///
/// `proj4rs` works in radians for geographic references; degree conversion
/// happens at this boundary and nowhere else.
fn project(from: &Proj, to: &Proj, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
    let mut point = (x, y, 0.0);
    if from.is_latlong() {
        point.0 = point.0.to_radians();
        point.1 = point.1.to_radians();
    }

    transform(from, to, &mut point).map_err(|e| ProjectionError::Point {
        x,
        y,
        reason: e.to_string(),
    })?;

    if to.is_latlong() {
        point.0 = point.0.to_degrees();
        point.1 = point.1.to_degrees();
    }

    if !point.0.is_finite() || !point.1.is_finite() {
        return Err(ProjectionError::Point {
            x,
            y,
            reason: "projected coordinate is not finite".to_string(),
        });
    }

    Ok((point.0, point.1))
}

/// Resolve an EPSG code to a prepared projection.
fn proj_for_srid(srid: u32) -> Result<Proj, RequestError> {
    let code = u16::try_from(srid).map_err(|_| RequestError::UnknownSrid { srid })?;
    let def = crs_definitions::from_code(code).ok_or(RequestError::UnknownSrid { srid })?;
    Proj::from_proj_string(def.proj4).map_err(|_| RequestError::UnknownSrid { srid })
}

fn canonical_srid(srid: u32) -> u32 {
    if srid == LEGACY_WEB_MERCATOR {
        3857
    } else {
        srid
    }
}

// =============================================================================
// Query Envelope
// =============================================================================

/// Compute the buffered native-CRS envelope for a tile query.
///
/// The target bbox is first grown by a half-pixel correction (so rounded
/// sample centres align with grid cells) plus a dot-radius buffer covering
/// the drawn point, the highlight ring and a fixed skew correction; the
/// grown box is then forward-transformed corner-by-corner.
pub fn query_envelope(
    tile_env: &Envelope,
    width: u32,
    height: u32,
    dot_radius_px: u32,
    has_highlight: bool,
    to_native: &CrsTransformer,
) -> Result<Envelope, ProjectionError> {
    let units_x = tile_env.width() / width as f64;
    let units_y = tile_env.height() / height as f64;

    let ring = if has_highlight {
        HIGHLIGHT_RING_ALLOWANCE_PX
    } else {
        0
    };
    let buffer_px = (dot_radius_px + ring + PROJECTION_SKEW_BUFFER_PX) as f64;

    let margin_x = buffer_px * units_x + units_x / 2.0;
    let margin_y = buffer_px * units_y + units_y / 2.0;

    to_native.forward_envelope(&tile_env.expanded(margin_x, margin_y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = CrsTransformer::new(4326, 4326).unwrap();
        assert_eq!(t.forward(151.2, -33.9).unwrap(), (151.2, -33.9));
        assert_eq!(t.inverse(151.2, -33.9).unwrap(), (151.2, -33.9));
    }

    #[test]
    fn test_unknown_srid() {
        assert!(matches!(
            CrsTransformer::new(999_999, 4326),
            Err(RequestError::UnknownSrid { srid: 999_999 })
        ));
    }

    #[test]
    fn test_legacy_web_mercator_alias() {
        let t = CrsTransformer::new(900_913, 900_913).unwrap();
        assert_eq!(t.source_srid(), 3857);
        assert_eq!(t.target_srid(), 3857);
    }

    #[test]
    fn test_mercator_round_trip() {
        let t = CrsTransformer::new(3857, 4326).unwrap();
        // Sydney in Web Mercator
        let (lon, lat) = t.forward(16_834_446.0, -4_009_568.0).unwrap();
        assert!((lon - 151.23).abs() < 0.2, "lon was {lon}");
        assert!((lat + 33.87).abs() < 0.2, "lat was {lat}");

        let (x, y) = t.inverse(lon, lat).unwrap();
        assert!((x - 16_834_446.0).abs() < 1.0);
        assert!((y + 4_009_568.0).abs() < 1.0);
    }

    #[test]
    fn test_envelope_uses_all_four_corners() {
        let t = CrsTransformer::new(3857, 4326).unwrap();
        let env = Envelope::new(-10_000_000.0, -5_000_000.0, 10_000_000.0, 5_000_000.0);
        let native = t.forward_envelope(&env).unwrap();
        assert!(native.min_x < native.max_x);
        assert!(native.min_y < native.max_y);
        // Web Mercator x=+/-10,000km is roughly +/-89.8 degrees longitude
        assert!((native.min_x + 89.8).abs() < 0.5, "min_x was {}", native.min_x);
        assert!((native.max_x - 89.8).abs() < 0.5);
    }

    #[test]
    fn test_query_envelope_contains_unbuffered_projection() {
        let t = CrsTransformer::to_native(3857).unwrap();
        let tile = Envelope::new(16_000_000.0, -4_500_000.0, 16_200_000.0, -4_300_000.0);

        let buffered = query_envelope(&tile, 256, 256, 4, true, &t).unwrap();
        let unbuffered = t.forward_envelope(&tile).unwrap();

        assert!(
            buffered.contains(&unbuffered),
            "buffered {buffered:?} must contain unbuffered {unbuffered:?}"
        );
    }

    #[test]
    fn test_query_envelope_identity_margins() {
        let t = CrsTransformer::to_native(4326).unwrap();
        let tile = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let buffered = query_envelope(&tile, 100, 100, 4, false, &t).unwrap();

        // one unit per pixel: margin = (4 + 5) + 0.5 units
        assert!((buffered.min_x + 9.5).abs() < 1e-9);
        assert!((buffered.max_y - 109.5).abs() < 1e-9);
    }
}
