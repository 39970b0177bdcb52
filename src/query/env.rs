//! The style/env descriptor.
//!
//! Map clients configure rendering through a compact `key:value;...` string,
//! e.g. `color:ff0000;size:4;opacity:0.8;colormode:basis_of_record`. The
//! descriptor is parsed once at the boundary into a typed [`EnvStyle`];
//! downstream code never sees the raw string.
//!
//! Recognized keys are {color, size, opacity, uncertainty, sel, colormode,
//! gridres, gridlabels}. Unknown keys are ignored rather than mis-parsed.

use crate::error::RequestError;

/// Default point colour (green) when the descriptor carries none.
pub const DEFAULT_POINT_COLOUR: u32 = 0x00FF85;

/// Default point radius in pixels.
pub const DEFAULT_POINT_SIZE: u32 = 4;

/// Default point opacity.
pub const DEFAULT_OPACITY: f32 = 1.0;

// =============================================================================
// Point Style
// =============================================================================

/// Visual style for drawn points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointStyle {
    /// RGB colour, `0xRRGGBB`
    pub colour: u32,

    /// Dot radius in pixels
    pub size: u32,

    /// Opacity in `[0, 1]`
    pub opacity: f32,
}

impl Default for PointStyle {
    fn default() -> Self {
        Self {
            colour: DEFAULT_POINT_COLOUR,
            size: DEFAULT_POINT_SIZE,
            opacity: DEFAULT_OPACITY,
        }
    }
}

// =============================================================================
// Colour Mode
// =============================================================================

/// How points are bucketed into colours.
#[derive(Debug, Clone, PartialEq)]
pub enum ColourMode {
    /// `colormode:-1` - a single bucket in the request colour
    Uncoloured,

    /// `colormode:grid` - density grid rendering over uncoloured point data
    Grid,

    /// `colormode:<field>[,cutpoints]` - bucket by facet value, either
    /// categorical or numeric-ranged
    Facet {
        field: String,
        /// Ascending numeric cut points for ranged bucketing
        cutpoints: Option<Vec<f64>>,
    },
}

impl ColourMode {
    /// Identifier of the cache bucket this mode reads and writes.
    ///
    /// `Uncoloured` and `Grid` share a bucket: grid rendering reuses the
    /// uncoloured point data.
    pub fn cache_bucket(&self) -> String {
        match self {
            ColourMode::Uncoloured | ColourMode::Grid => "-1".to_string(),
            ColourMode::Facet { field, cutpoints } => match cutpoints {
                Some(cuts) => {
                    let cuts: Vec<String> = cuts.iter().map(|c| c.to_string()).collect();
                    format!("{},{}", field, cuts.join(","))
                }
                None => field.clone(),
            },
        }
    }

    /// Whether this mode buckets by numeric ranges.
    pub fn is_numeric_ranged(&self) -> bool {
        matches!(
            self,
            ColourMode::Facet {
                cutpoints: Some(_),
                ..
            }
        )
    }
}

// =============================================================================
// Cache Mode
// =============================================================================

/// Per-request cache participation.
///
/// The opt-out affects writing only: every request may still read existing
/// entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Explicitly write newly computed point data to the cache
    On,
    /// Read existing entries but never write new ones
    Off,
    /// Engine default (writes enabled)
    #[default]
    Default,
}

impl CacheMode {
    /// Parse the request surface value; anything unrecognized is `Default`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" => CacheMode::On,
            "off" => CacheMode::Off,
            _ => CacheMode::Default,
        }
    }

    pub fn writes(&self) -> bool {
        !matches!(self, CacheMode::Off)
    }
}

// =============================================================================
// EnvStyle
// =============================================================================

/// The fully parsed style descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvStyle {
    pub style: PointStyle,
    pub colour_mode: ColourMode,

    /// Draw coordinate-uncertainty circles under the points
    pub uncertainty: bool,

    /// Sub-filter for the highlight ring overlay (`sel:<filter>`)
    pub highlight: Option<String>,

    /// Grid divisions per tile side, when overridden by `gridres`
    pub grid_divisions: Option<u32>,

    /// Label grid cells with their counts
    pub grid_labels: bool,
}

impl Default for EnvStyle {
    fn default() -> Self {
        Self {
            style: PointStyle::default(),
            colour_mode: ColourMode::Uncoloured,
            uncertainty: false,
            highlight: None,
            grid_divisions: None,
            grid_labels: false,
        }
    }
}

impl EnvStyle {
    /// Parse a `key:value;...` descriptor.
    ///
    /// Unknown keys are ignored. A malformed value for a recognized key is
    /// [`RequestError::MalformedStyle`].
    pub fn parse(input: &str) -> Result<Self, RequestError> {
        let mut parsed = EnvStyle::default();

        for entry in input.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            // `sel` values may themselves contain ':', so split once only
            let (key, value) = match entry.split_once(':') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (entry, ""),
            };

            match key {
                "color" => parsed.style.colour = parse_colour(value)?,
                "size" => {
                    parsed.style.size = value.parse().map_err(|_| malformed("size", value))?
                }
                "opacity" => {
                    let opacity: f32 = value.parse().map_err(|_| malformed("opacity", value))?;
                    if !(0.0..=1.0).contains(&opacity) {
                        return Err(malformed("opacity", value));
                    }
                    parsed.style.opacity = opacity;
                }
                "uncertainty" => {
                    parsed.uncertainty = value.is_empty() || value == "1" || value == "true"
                }
                "sel" => {
                    if !value.is_empty() {
                        parsed.highlight = Some(value.to_string());
                    }
                }
                "colormode" => parsed.colour_mode = parse_colour_mode(value)?,
                "gridres" => {
                    let divisions: u32 = value.parse().map_err(|_| malformed("gridres", value))?;
                    if divisions == 0 {
                        return Err(malformed("gridres", value));
                    }
                    parsed.grid_divisions = Some(divisions);
                }
                "gridlabels" => {
                    parsed.grid_labels = value.is_empty() || value == "1" || value == "true"
                }
                _ => {} // unknown keys are ignored
            }
        }

        Ok(parsed)
    }
}

/// Parse an `RRGGBB` hex colour, with or without a leading `#` or `0x`.
pub fn parse_colour(value: &str) -> Result<u32, RequestError> {
    let hex = value
        .trim_start_matches('#')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if hex.len() != 6 {
        return Err(malformed("color", value));
    }
    u32::from_str_radix(hex, 16).map_err(|_| malformed("color", value))
}

fn parse_colour_mode(value: &str) -> Result<ColourMode, RequestError> {
    match value {
        "" | "-1" => Ok(ColourMode::Uncoloured),
        "grid" => Ok(ColourMode::Grid),
        _ => {
            let mut parts = value.split(',');
            let field = parts.next().unwrap_or_default().trim().to_string();
            if field.is_empty() {
                return Err(malformed("colormode", value));
            }

            let tail: Vec<&str> = parts.collect();
            if tail.is_empty() {
                return Ok(ColourMode::Facet {
                    field,
                    cutpoints: None,
                });
            }

            let cutpoints: Vec<f64> = tail
                .iter()
                .map(|p| p.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| malformed("colormode", value))?;
            if cutpoints.windows(2).any(|w| w[0] >= w[1]) {
                return Err(malformed("colormode", value));
            }

            Ok(ColourMode::Facet {
                field,
                cutpoints: Some(cutpoints),
            })
        }
    }
}

fn malformed(key: &str, value: &str) -> RequestError {
    RequestError::MalformedStyle {
        reason: format!("invalid value {value:?} for key {key:?}"),
    }
}
