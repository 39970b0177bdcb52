//! Coordinate-rounding resolution selection.
//!
//! Zoomed-out views cover many degrees per pixel; querying raw coordinates
//! there would return millions of near-coincident points. The index instead
//! facets on coordinates rounded to a fixed number of decimals, and this
//! module picks the rounding level for a view: coarse for zoomed-out, finer
//! as the viewer zooms in, raw once a pixel covers less than 0.0001 degrees.

use serde::{Deserialize, Serialize};

use super::bbox::Envelope;

/// Coordinate-rounding precision, ordered coarse to fine.
///
/// The derived `Ord` follows declaration order, so `Degree < Raw` and
/// "coarser than" is simply `<`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ResolutionLevel {
    /// Whole degrees
    Degree,
    /// 0.1 degree
    Tenth,
    /// 0.01 degree
    Hundredth,
    /// 0.001 degree
    Thousandth,
    /// 0.0001 degree
    TenThousandth,
    /// No rounding
    Raw,
}

/// All levels, coarse to fine.
pub const ALL_LEVELS: [ResolutionLevel; 6] = [
    ResolutionLevel::Degree,
    ResolutionLevel::Tenth,
    ResolutionLevel::Hundredth,
    ResolutionLevel::Thousandth,
    ResolutionLevel::TenThousandth,
    ResolutionLevel::Raw,
];

impl ResolutionLevel {
    /// Select the level for a view.
    ///
    /// Degrees-per-pixel is the smaller of the per-axis ratios, so the denser
    /// axis governs. Thresholds are >= 1, >= 0.1, >= 0.01, >= 0.001,
    /// >= 0.0001, else raw.
    pub fn select(envelope: &Envelope, width: u32, height: u32) -> Self {
        let dpp = (envelope.width() / width.max(1) as f64)
            .min(envelope.height() / height.max(1) as f64);
        Self::for_degrees_per_pixel(dpp)
    }

    /// Threshold mapping from degrees-per-pixel.
    pub fn for_degrees_per_pixel(dpp: f64) -> Self {
        if dpp >= 1.0 {
            ResolutionLevel::Degree
        } else if dpp >= 0.1 {
            ResolutionLevel::Tenth
        } else if dpp >= 0.01 {
            ResolutionLevel::Hundredth
        } else if dpp >= 0.001 {
            ResolutionLevel::Thousandth
        } else if dpp >= 0.0001 {
            ResolutionLevel::TenThousandth
        } else {
            ResolutionLevel::Raw
        }
    }

    /// Number of decimals coordinates are rounded to, `None` for raw.
    pub fn decimals(&self) -> Option<u32> {
        match self {
            ResolutionLevel::Degree => Some(0),
            ResolutionLevel::Tenth => Some(1),
            ResolutionLevel::Hundredth => Some(2),
            ResolutionLevel::Thousandth => Some(3),
            ResolutionLevel::TenThousandth => Some(4),
            ResolutionLevel::Raw => None,
        }
    }

    /// Stable label used in cache keys and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionLevel::Degree => "1",
            ResolutionLevel::Tenth => "0.1",
            ResolutionLevel::Hundredth => "0.01",
            ResolutionLevel::Thousandth => "0.001",
            ResolutionLevel::TenThousandth => "0.0001",
            ResolutionLevel::Raw => "raw",
        }
    }

    /// Round a coordinate to this level's precision.
    pub fn quantize(&self, value: f64) -> f64 {
        match self.decimals() {
            Some(d) => {
                let scale = 10f64.powi(d as i32);
                (value * scale).round() / scale
            }
            None => value,
        }
    }

    /// Levels strictly finer than this one, finest-adjacent first.
    ///
    /// Finer-rounded point data is a superset of a coarser view's needs, so
    /// these are the cache-fallback candidates for a request at this level.
    pub fn finer_levels(&self) -> impl Iterator<Item = ResolutionLevel> + '_ {
        let this = *self;
        ALL_LEVELS.into_iter().filter(move |l| *l > this)
    }
}
