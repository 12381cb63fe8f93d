//! Error types for field operations.

use spm_common::CommonError;
use thiserror::Error;

/// Result type alias using FieldError.
pub type FieldResult<T> = Result<T, FieldError>;

/// Errors raised by field operations.
///
/// Numerical degeneracies (empty areas, zero-rms data, rank-deficient fits)
/// are not errors; they produce the sentinel values documented on the
/// individual operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    /// Argument or compatibility failure from the shared validation layer.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl From<mask_engine::MaskError> for FieldError {
    fn from(err: mask_engine::MaskError) -> Self {
        match err {
            mask_engine::MaskError::Common(e) => FieldError::Common(e),
        }
    }
}
