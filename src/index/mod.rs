//! Occurrence index collaborator and the point-source query engine.
//!
//! The engine never talks to a concrete search backend; it speaks the
//! [`OccurrenceIndex`] trait, which exposes the four aggregation shapes the
//! cost heuristic chooses between:
//!
//! - total match count
//! - single-field faceted distinct-coordinate+count at a rounding precision
//! - two-level pivot (facet value x coordinate)
//! - numeric count-distinct statistic
//!
//! [`engine::PointSourceEngine`] owns the heuristic: cheap counts first,
//! viewport re-scoping when the layer is too dense to cache, then the
//! per-bucket breakdown via the strategy picked by
//! [`strategy::select_strategy`].

pub mod engine;
pub mod source;
pub mod strategy;

pub use engine::{PointSourceEngine, PointSourceResult};
pub use source::{FacetCount, OccurrenceIndex, OccurrenceQuery, PointCount};
pub use strategy::{select_strategy, QueryStrategy};
