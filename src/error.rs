//! Error types for Adaptar operations.
//!
//! Provides rich error context for library consumers.

use std::fmt;

/// Main error type for Adaptar operations.
///
/// Covers configuration failures (caught at construction, before any
/// numerics run), numerical failures inside a fit, shape mismatches that
/// cannot be reconciled by squeezing a trailing singleton dimension, and
/// use-before-fit errors.
///
/// # Examples
///
/// ```
/// use adaptar::error::AdaptarError;
///
/// let err = AdaptarError::missing_block("C", "cme_w_xc");
/// assert!(err.to_string().contains("missing variable block"));
/// ```
#[derive(Debug)]
pub enum AdaptarError {
    /// A requested variable block is absent from the supplied covariates.
    MissingBlock {
        /// Block name (X, W, C, Z, Y)
        block: String,
        /// Estimator stage that requested it
        stage: String,
    },

    /// Invalid estimator configuration (unset kernel spec, unsupported task).
    InvalidConfig {
        /// Description of the misconfiguration
        message: String,
    },

    /// Invalid hyperparameter value provided.
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Regularized Gram matrix is singular or not positive definite.
    SingularMatrix {
        /// Diagonal pivot that failed (close to or below zero)
        pivot: f64,
    },

    /// A fitted coefficient came out NaN or infinite.
    NonFinite {
        /// Where the non-finite value appeared
        context: String,
    },

    /// Predicted and true arrays have irreconcilable shapes.
    ShapeMismatch {
        /// Expected shape description
        expected: String,
        /// Actual shape found
        actual: String,
    },

    /// Predict or evaluate called before fit.
    NotFitted {
        /// Estimator name
        estimator: String,
    },

    /// Generic error with string message.
    Other(String),
}

impl fmt::Display for AdaptarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptarError::MissingBlock { block, stage } => {
                write!(f, "missing variable block {block} for stage {stage}")
            }
            AdaptarError::InvalidConfig { message } => {
                write!(f, "invalid configuration: {message}")
            }
            AdaptarError::InvalidHyperparameter {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "invalid hyperparameter: {param} = {value}, expected {constraint}"
                )
            }
            AdaptarError::SingularMatrix { pivot } => {
                write!(
                    f,
                    "singular regularized Gram matrix: pivot = {pivot}, cannot factorize"
                )
            }
            AdaptarError::NonFinite { context } => {
                write!(f, "non-finite value in {context}")
            }
            AdaptarError::ShapeMismatch { expected, actual } => {
                write!(f, "shape mismatch: expected {expected}, got {actual}")
            }
            AdaptarError::NotFitted { estimator } => {
                write!(f, "{estimator} is not fitted; call fit() first")
            }
            AdaptarError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for AdaptarError {}

impl From<&str> for AdaptarError {
    fn from(msg: &str) -> Self {
        AdaptarError::Other(msg.to_string())
    }
}

impl From<String> for AdaptarError {
    fn from(msg: String) -> Self {
        AdaptarError::Other(msg)
    }
}

impl AdaptarError {
    /// Create a missing-block error for an estimator stage.
    #[must_use]
    pub fn missing_block(block: &str, stage: &str) -> Self {
        Self::MissingBlock {
            block: block.to_string(),
            stage: stage.to_string(),
        }
    }

    /// Create a shape mismatch error from two shape descriptions.
    #[must_use]
    pub fn shape_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a not-fitted error for a named estimator.
    #[must_use]
    pub fn not_fitted(estimator: &str) -> Self {
        Self::NotFitted {
            estimator: estimator.to_string(),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, AdaptarError>;
