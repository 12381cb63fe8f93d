//! Shared leaf types for the SPM field engine workspace.
//!
//! This crate holds the small value types every other crate builds on:
//! - [`FieldPart`] rectangular subregions with shared validation
//! - [`Masking`] three-mode participation policy and mask-origin resolution
//! - [`Unit`] physical unit descriptors with power arithmetic
//! - [`CommonError`] the workspace-wide argument/compatibility error type

pub mod error;
pub mod masking;
pub mod part;
pub mod unit;

pub use error::{CommonError, CommonResult};
pub use masking::{resolve_mask_origin, Masking};
pub use part::FieldPart;
pub use unit::Unit;
