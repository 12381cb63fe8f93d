//! Error types for grain metrology.

use spm_common::CommonError;
use thiserror::Error;

/// Result type alias using GrainError.
pub type GrainResult<T> = Result<T, GrainError>;

/// Errors raised by grain value evaluation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrainError {
    /// Argument or compatibility failure from the shared validation layer.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// A user formula failed to compile against the identifier table.
    #[error("formula of '{name}' does not compile: {reason}")]
    InvalidFormula { name: String, reason: String },

    /// A formula references an unknown grain-value identifier.
    #[error("unknown grain value identifier: {0}")]
    UnknownIdent(String),
}

impl From<mask_engine::MaskError> for GrainError {
    fn from(err: mask_engine::MaskError) -> Self {
        match err {
            mask_engine::MaskError::Common(e) => GrainError::Common(e),
        }
    }
}

impl From<field_engine::FieldError> for GrainError {
    fn from(err: field_engine::FieldError) -> Self {
        match err {
            field_engine::FieldError::Common(e) => GrainError::Common(e),
        }
    }
}

impl From<laplace_solver::LaplaceError> for GrainError {
    fn from(err: laplace_solver::LaplaceError) -> Self {
        match err {
            laplace_solver::LaplaceError::Common(e) => GrainError::Common(e),
        }
    }
}
