//! Centralized error handling for RuLaVar
//!
//! Every precondition violated by an operation is reported through
//! [`RuLaVarError`]. Errors are raised before any output is written, so a
//! failed call leaves its inputs untouched.

use thiserror::Error;

/// Main error type for RuLaVar operations
#[derive(Debug, Error)]
pub enum RuLaVarError {
    /// Incompatible physical units for an operator
    #[error("Unit error: {0}")]
    UnitError(String),

    /// Shape, extent or dimension order mismatch
    #[error("Dimension error: {0}")]
    DimensionError(String),

    /// Dimension label not present in a set of dimensions
    #[error("Dimension '{dim}' not found in {dims}")]
    DimensionNotFound { dim: String, dims: String },

    /// Unsupported dtype combination for an operator
    #[error("Type error: {0}")]
    TypeError(String),

    /// Variances present where they are forbidden, or missing where required
    #[error("Variances error: {0}")]
    VariancesError(String),

    /// Missing key in a coord or mask lookup
    #[error("Key '{key}' not found")]
    NotFound { key: String },

    /// Unsorted or malformed bin edges
    #[error("Bin-edge error: {0}")]
    BinEdgeError(String),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    /// Array shape error from ndarray interop
    #[error("Array error: {0}")]
    ArrayError(#[from] ndarray::ShapeError),

    /// Code path that exists but is not supported yet
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Generic error for ad-hoc messages
    #[error("{0}")]
    Generic(String),
}

impl From<rayon::ThreadPoolBuildError> for RuLaVarError {
    fn from(error: rayon::ThreadPoolBuildError) -> Self {
        RuLaVarError::ThreadPoolError(error.to_string())
    }
}

impl From<String> for RuLaVarError {
    fn from(error: String) -> Self {
        RuLaVarError::Generic(error)
    }
}

impl From<&str> for RuLaVarError {
    fn from(error: &str) -> Self {
        RuLaVarError::Generic(error.to_string())
    }
}

/// Result type alias for RuLaVar operations
pub type Result<T> = std::result::Result<T, RuLaVarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuLaVarError::DimensionNotFound {
            dim: "tof".to_string(),
            dims: "{x: 2}".to_string(),
        };
        assert_eq!(format!("{err}"), "Dimension 'tof' not found in {x: 2}");

        let err = RuLaVarError::from("boom");
        assert_eq!(format!("{err}"), "boom");

        let err = RuLaVarError::NotFound { key: "mask".to_string() };
        assert!(format!("{err}").contains("'mask'"));
    }
}
