//! Bounding box parsing and envelope arithmetic.

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// An axis-aligned envelope in some coordinate reference system.
///
/// Coordinate order follows the `minx,miny,maxx,maxy` convention of the
/// request surface. An envelope carries no knowledge of its CRS; callers
/// track that separately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope from corner coordinates, normalizing the order so
    /// min is always min.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Parse a `minx,miny,maxx,maxy` string.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MalformedBbox`] unless the string contains
    /// exactly four parseable, finite numbers.
    pub fn parse(input: &str) -> Result<Self, RequestError> {
        let malformed = || RequestError::MalformedBbox {
            input: input.to_string(),
        };

        let parts: Vec<f64> = input
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| malformed())?;

        if parts.len() != 4 || parts.iter().any(|v| !v.is_finite()) {
            return Err(malformed());
        }

        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }

    /// Smallest envelope containing all of the given points.
    ///
    /// Returns `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x, y) = iter.next()?;
        let mut env = Envelope {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        };
        for (x, y) in iter {
            env.min_x = env.min_x.min(x);
            env.min_y = env.min_y.min(y);
            env.max_x = env.max_x.max(x);
            env.max_y = env.max_y.max(y);
        }
        Some(env)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Envelope expanded by the given margins on every side.
    pub fn expanded(&self, margin_x: f64, margin_y: f64) -> Self {
        Self {
            min_x: self.min_x - margin_x,
            min_y: self.min_y - margin_y,
            max_x: self.max_x + margin_x,
            max_y: self.max_y + margin_y,
        }
    }

    /// Whether this envelope fully contains `other`.
    pub fn contains(&self, other: &Envelope) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Whether the point lies inside (or on the edge of) this envelope.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Canonical string form used in cache-key normalization.
    pub fn canonical(&self) -> String {
        format!(
            "{:.8},{:.8},{:.8},{:.8}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}
