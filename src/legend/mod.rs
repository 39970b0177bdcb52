//! Legend construction and colour assignment.
//!
//! A legend maps facet values to colours and to the filter fragments that
//! reproduce each bucket against the index. Assignment is deterministic:
//! identical (field, cut points, value set) inputs always produce identical
//! legends, so cached point data and freshly rendered tiles can never
//! disagree about a bucket's colour.

use serde::{Deserialize, Serialize};

use crate::index::source::FacetCount;
use crate::query::env::DEFAULT_POINT_COLOUR;

/// Fixed categorical palette; bucket `i` takes colour `i` until the palette
/// is exhausted.
pub const LEGEND_PALETTE: [u32; 10] = [
    0xE41A1C, 0x377EB8, 0x4DAF4A, 0x984EA3, 0xFF7F00, 0xFFFF33, 0xA65628, 0xF781BF, 0x999999,
    0x66C2A5,
];

/// Colour ramp endpoints for numeric-ranged buckets.
pub const RAMP_START: u32 = 0xFFFF00;
pub const RAMP_END: u32 = 0xFF0000;

/// Label of the catch-all bucket for values beyond the palette.
pub const REMAINDER_LABEL: &str = "Other";

// =============================================================================
// LegendItem
// =============================================================================

/// One legend bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendItem {
    /// Display label; empty for the not-specified bucket
    pub label: String,

    /// Assigned RGB colour
    pub colour: u32,

    /// Occurrence count for this bucket, when known
    pub count: u64,

    /// Filter fragment reproducing this bucket against the index
    pub filter: String,

    /// Whether this is the catch-all bucket for values beyond the palette
    pub is_remainder: bool,
}

/// A complete legend, buckets in drawing order (remainder last).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    pub items: Vec<LegendItem>,
}

impl Legend {
    /// Single-bucket legend for uncoloured ("-1") and grid rendering.
    pub fn uncoloured(colour: u32) -> Self {
        Self {
            items: vec![LegendItem {
                label: String::new(),
                colour,
                count: 0,
                filter: String::new(),
                is_remainder: false,
            }],
        }
    }

    /// Categorical legend from the distinct values of a facet field.
    ///
    /// Values are sorted for determinism and assigned palette colours by
    /// index. Once the palette is exhausted the remaining values collapse
    /// into one remainder bucket carrying the final palette colour, the
    /// summed count and an all-exclusions filter fragment.
    pub fn categorical(field: &str, values: &[FacetCount]) -> Self {
        let mut sorted: Vec<&FacetCount> = values.iter().collect();
        sorted.sort_by(|a, b| a.value.cmp(&b.value));

        let mut items = Vec::with_capacity(sorted.len().min(LEGEND_PALETTE.len() + 1));
        let mut remainder: Option<LegendItem> = None;

        for (i, facet) in sorted.iter().enumerate() {
            if i < LEGEND_PALETTE.len() {
                items.push(LegendItem {
                    label: facet.value.clone(),
                    colour: bucket_colour(&facet.value, LEGEND_PALETTE[i]),
                    count: facet.count,
                    filter: format!("{}:\"{}\"", field, facet.value),
                    is_remainder: false,
                });
            } else {
                let entry = remainder.get_or_insert_with(|| LegendItem {
                    label: REMAINDER_LABEL.to_string(),
                    colour: LEGEND_PALETTE[LEGEND_PALETTE.len() - 1],
                    count: 0,
                    filter: items
                        .iter()
                        .map(|item| format!("-{}", item.filter))
                        .collect::<Vec<_>>()
                        .join(" AND "),
                    is_remainder: true,
                });
                entry.count += facet.count;
            }
        }

        if let Some(entry) = remainder {
            items.push(entry);
        }

        Self { items }
    }

    /// Numeric-ranged legend from caller-supplied ascending cut points.
    ///
    /// Consecutive pairs become ranged buckets coloured by a linear ramp,
    /// followed by a not-specified bucket in the fixed default colour.
    pub fn ranged(field: &str, cutpoints: &[f64]) -> Self {
        let bucket_count = cutpoints.len().saturating_sub(1);
        let mut items = Vec::with_capacity(bucket_count + 1);

        for (i, pair) in cutpoints.windows(2).enumerate() {
            let label = format!("{} - {}", pair[0], pair[1]);
            items.push(LegendItem {
                colour: bucket_colour(&label, ramp_colour(i, bucket_count)),
                label,
                count: 0,
                filter: format!("{}:[{} TO {}]", field, pair[0], pair[1]),
                is_remainder: false,
            });
        }

        // Records with no value for the field; empty label takes the fixed
        // default colour, never a ramp colour.
        items.push(LegendItem {
            label: String::new(),
            colour: DEFAULT_POINT_COLOUR,
            count: 0,
            filter: format!("-{}:[* TO *]", field),
            is_remainder: false,
        });

        Self { items }
    }

    /// Explicit (non-remainder) items.
    pub fn explicit_items(&self) -> impl Iterator<Item = &LegendItem> {
        self.items.iter().filter(|item| !item.is_remainder)
    }

    pub fn remainder(&self) -> Option<&LegendItem> {
        self.items.iter().find(|item| item.is_remainder)
    }
}

/// Colour for a bucket label: empty or negative-named buckets always take
/// the fixed default colour.
fn bucket_colour(label: &str, assigned: u32) -> u32 {
    if label.is_empty() || label.starts_with('-') {
        DEFAULT_POINT_COLOUR
    } else {
        assigned
    }
}

/// Linear ramp colour for bucket `i` of `n`.
pub fn ramp_colour(i: usize, n: usize) -> u32 {
    if n <= 1 {
        return RAMP_START;
    }
    let t = i as f64 / (n - 1) as f64;
    let channel = |shift: u32| {
        let start = ((RAMP_START >> shift) & 0xFF) as f64;
        let end = ((RAMP_END >> shift) & 0xFF) as f64;
        ((start + (end - start) * t).round() as u32) & 0xFF
    };
    (channel(16) << 16) | (channel(8) << 8) | channel(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(labels: &[&str]) -> Vec<FacetCount> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| FacetCount::new(*label, (i + 1) as u64))
            .collect()
    }

    #[test]
    fn test_uncoloured_single_bucket() {
        let legend = Legend::uncoloured(0x123456);
        assert_eq!(legend.items.len(), 1);
        assert_eq!(legend.items[0].colour, 0x123456);
        assert!(!legend.items[0].is_remainder);
    }

    #[test]
    fn test_categorical_sorted_assignment() {
        let legend = Legend::categorical("genus", &values(&["Banksia", "Acacia"]));
        assert_eq!(legend.items[0].label, "Acacia");
        assert_eq!(legend.items[0].colour, LEGEND_PALETTE[0]);
        assert_eq!(legend.items[1].label, "Banksia");
        assert_eq!(legend.items[1].colour, LEGEND_PALETTE[1]);
        assert_eq!(legend.items[0].filter, "genus:\"Acacia\"");
    }

    #[test]
    fn test_categorical_deterministic_regardless_of_input_order() {
        let a = Legend::categorical("genus", &values(&["C", "A", "B"]));
        let mut reordered = values(&["C", "A", "B"]);
        reordered.reverse();
        let b = Legend::categorical("genus", &reordered);
        let labels_a: Vec<_> = a.items.iter().map(|i| (&i.label, i.colour)).collect();
        let labels_b: Vec<_> = b.items.iter().map(|i| (&i.label, i.colour)).collect();
        assert_eq!(labels_a, labels_b);
    }

    #[test]
    fn test_palette_overflow_collapses_to_remainder() {
        let labels: Vec<String> = (0..11).map(|i| format!("value{i:02}")).collect();
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let legend = Legend::categorical("field", &values(&label_refs));

        // 10 explicit entries + 1 remainder
        assert_eq!(legend.items.len(), 11);
        assert_eq!(legend.explicit_items().count(), 10);

        let remainder = legend.remainder().expect("remainder bucket");
        assert_eq!(remainder.label, REMAINDER_LABEL);
        assert_eq!(remainder.colour, LEGEND_PALETTE[9]);
        assert!(remainder.filter.starts_with("-field:\"value00\""));
        assert!(remainder.filter.contains(" AND "));
        assert!(std::ptr::eq(
            remainder,
            legend.items.last().expect("remainder is last")
        ));
    }

    #[test]
    fn test_remainder_sums_counts() {
        let labels: Vec<String> = (0..13).map(|i| format!("v{i:02}")).collect();
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let legend = Legend::categorical("field", &values(&label_refs));
        // values v10, v11, v12 carry counts 11 + 12 + 13
        assert_eq!(legend.remainder().unwrap().count, 36);
    }

    #[test]
    fn test_ranged_buckets_and_ramp() {
        let legend = Legend::ranged("year", &[1900.0, 1950.0, 2000.0]);
        assert_eq!(legend.items.len(), 3);
        assert_eq!(legend.items[0].label, "1900 - 1950");
        assert_eq!(legend.items[0].filter, "year:[1900 TO 1950]");
        assert_eq!(legend.items[0].colour, RAMP_START);
        assert_eq!(legend.items[1].colour, RAMP_END);

        // not-specified bucket: empty label, default colour, exclusion filter
        let unspecified = &legend.items[2];
        assert_eq!(unspecified.label, "");
        assert_eq!(unspecified.colour, DEFAULT_POINT_COLOUR);
        assert_eq!(unspecified.filter, "-year:[* TO *]");
    }

    #[test]
    fn test_ramp_endpoints_and_midpoint() {
        assert_eq!(ramp_colour(0, 3), RAMP_START);
        assert_eq!(ramp_colour(2, 3), RAMP_END);
        // midpoint keeps red at FF and halves green
        assert_eq!(ramp_colour(1, 3), 0xFF8000);
    }

    #[test]
    fn test_serialization_uses_camel_case_flag() {
        let legend = Legend::categorical("genus", &values(&["Acacia"]));
        let json = serde_json::to_string(&legend.items[0]).unwrap();
        assert!(json.contains("\"isRemainder\":false"));
    }
}
