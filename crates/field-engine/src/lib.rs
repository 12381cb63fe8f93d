//! # Two-dimensional data fields
//!
//! Dense `f64` scalar fields representing scanning-probe-microscopy
//! images, with spatial metadata, a scalar-summary cache and a uniform
//! three-mode masking discipline threaded through every operation.
//!
//! ## Capabilities
//!
//! - **Arithmetic**: fill, add, multiply, clamp, normalise, per-pixel
//!   functions, field combination (add, hypot, sculpt)
//! - **Statistics**: min/max, mean, median, rms, mean square, moments,
//!   half-line counts, entropy estimation
//! - **Area integrals**: surface area, volume and material volume by the
//!   quarter-pixel processor
//! - **Outlier marking** into mask fields
//! - **Levelling**: plane and polynomial fits, facet inclination,
//!   row-shift alignment
//!
//! Whole-field summaries are cached with per-item validity; uniform
//! operations update the cache by proven rules and everything else drops
//! it. See [`cache::CachedStats`].

pub mod area;
pub mod arithmetic;
pub mod cache;
pub mod error;
pub mod field;
pub mod level;
pub mod mark;
pub mod stats;

pub use area::VolumeMethod;
pub use arithmetic::{add_field, sculpt, NormalizeFlags, SculptMethod};
pub use cache::CachedStats;
pub use error::{FieldError, FieldResult};
pub use field::{CompatFlags, Field};
pub use level::{accumulate_shifts, RowShiftMethod};
pub use mark::DeviationType;
pub use stats::AreaStatistics;
