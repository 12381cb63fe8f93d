//! # Bit-packed mask fields
//!
//! Two-dimensional bitmaps marking pixels of interest (grains) in scanning
//! probe microscopy images, packed 32 columns to a word with row padding.
//!
//! ## Capabilities
//!
//! - **Primitive ops**: fill, invert, elliptical fill, clipped copy with
//!   arbitrary bit offsets, population counts
//! - **Logical combine**: all sixteen two-input Boolean operators, with an
//!   optional bitwise write mask and misaligned part variants
//! - **Morphology**: 4-neighbour shrink and grow, optionally preventing
//!   grains from merging while growing
//! - **Grains**: two-pass connected-component labelling, sizes, bounding
//!   boxes, removal and extraction
//! - **Distance transform**: exact squared Euclidean distances by a
//!   multi-wave queue algorithm
//!
//! Grain and distance data are cached inside the field and invalidated
//! together by any mutation.

pub mod bits;
pub mod distance;
pub mod error;
pub mod grains;
pub mod logical;
pub mod mask;
pub mod morph;

pub use error::{MaskError, MaskResult};
pub use grains::GrainData;
pub use logical::LogicalOp;
pub use mask::MaskField;
