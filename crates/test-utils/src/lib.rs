//! Shared test utilities for the SPM engine workspace.
//!
//! This crate provides common testing infrastructure:
//! - Deterministic scalar-field generators (gradients, bumps, noise)
//! - Bit-pattern generators for mask buffers
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod generators;

pub use generators::*;
