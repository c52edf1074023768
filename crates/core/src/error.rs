//! Error types for the flowline core.

use thiserror::Error;

/// Errors produced by field, image, and file operations.
///
/// Numeric degeneracies inside the optimizer (zero-length streamlines, empty
/// bundles, coincident points) are guarded internally and never surface here.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Width or height was zero, or their product overflowed.
    #[error("invalid dimensions: width and height must be non-zero")]
    InvalidDimensions,

    /// A data buffer or second image did not match the expected size.
    #[error("dimension mismatch: ({lhs_w}, {lhs_h}) vs ({rhs_w}, {rhs_h})")]
    DimensionMismatch {
        lhs_w: usize,
        lhs_h: usize,
        rhs_w: usize,
        rhs_h: usize,
    },

    /// An operation needed a vector field and none was loaded.
    #[error("no vector field loaded")]
    EmptyField,

    /// A parameter value was outside its usable range.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A synthetic field source name was not recognized.
    #[error("unknown field source: {0}")]
    UnknownSource(String),

    /// Opening, reading, or writing a file failed.
    #[error("i/o error: {0}")]
    Io(String),

    /// A file was readable but its contents were malformed.
    #[error("bad format: {0}")]
    Format(String),
}

impl FlowError {
    /// Shorthand for an [`FlowError::InvalidParameter`].
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        FlowError::InvalidParameter {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(e: std::io::Error) -> Self {
        FlowError::Io(e.to_string())
    }
}
