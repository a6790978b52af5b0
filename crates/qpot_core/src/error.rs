use thiserror::Error;

pub type Result<T> = std::result::Result<T, QpotError>;

/// Failures reported by the quasi-potential solver stack.
///
/// All variants are local and synchronous: retrying with the same input
/// reproduces the same failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpotError {
    /// A point lies outside the grid, an expression references an unbound
    /// symbol, or the drift evaluates to a non-finite value.
    #[error("domain error: {0}")]
    Domain(String),

    /// An update produced a non-finite or negative action.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// A stitching anchor is not shared by the surfaces it should align.
    #[error("alignment error: {0}")]
    Alignment(String),

    /// Surfaces or grids with incompatible shapes were combined.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}

impl QpotError {
    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    pub(crate) fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical(message.into())
    }

    pub(crate) fn alignment(message: impl Into<String>) -> Self {
        Self::Alignment(message.into())
    }

    pub(crate) fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }
}
