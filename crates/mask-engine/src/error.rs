//! Error types for mask field operations.

use spm_common::CommonError;
use thiserror::Error;

/// Result type alias using MaskError.
pub type MaskResult<T> = Result<T, MaskError>;

/// Errors raised by mask field operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    /// Argument or compatibility failure from the shared validation layer.
    #[error(transparent)]
    Common(#[from] CommonError),
}
