//! # Grain metrology
//!
//! Evaluation of per-grain scalar quantities over a field and a mask
//! marking the grains.
//!
//! ## Capabilities
//!
//! - **Built-in catalogue**: ~45 named quantities (geometry, statistics,
//!   curvature, inscribed and circumscribed discs, volumes), see
//!   [`GrainValueId`]
//! - **Shared computation**: quantities declare the intermediates they
//!   need as a bitfield and the evaluator computes the union once
//! - **Convex hull**: boundary-walk hull with bounding sizes, hull area
//!   and minimum circumcircle
//! - **Inscribed discs**: distance-transform candidates refined against
//!   the exact grain boundary polygon
//! - **User-defined values**: algebraic formulas over the built-in
//!   identifiers, compiled through the [`ExprCompiler`] contract
//!
//! Per-grain arrays always have `ngrains + 1` entries; index 0 belongs to
//! the empty space between grains.

pub mod builtin;
pub mod catalog;
pub mod curvature;
pub mod error;
pub mod hull;
pub mod inscribed;
pub mod user;

pub use builtin::{evaluate_builtins, GrainValues};
pub use catalog::{GrainValueId, GrainValueDef, SameUnits, CATALOG, NVALUES};
pub use error::{GrainError, GrainResult};
pub use inscribed::install_grain_positions;
pub use user::{
    evaluate_user_values, CompiledExpr, ExprCompiler, FormulaCompiler, UserGrainValueSpec,
    UserGrainValues,
};
