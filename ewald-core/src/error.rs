//! Error types for ewald-core.

use thiserror::Error;

/// Result type alias for ewald operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for ewald operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Operands or inputs of incompatible rank/shape.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Input array has the wrong number of dimensions.
    #[error("rank mismatch: expected {expected}-d array, found {found}-d")]
    RankMismatch { expected: usize, found: usize },

    /// Element index outside the full array shape.
    #[error("index {index:?} out of bounds for shape {shape:?}")]
    IndexOutOfBounds { index: Vec<isize>, shape: Vec<usize> },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A requested metadata channel is absent.
    #[error("scan metadata has no channel named {0:?}")]
    MissingChannel(String),

    /// Wavelength is missing, unparsable or non-positive.
    #[error("invalid wavelength: {0}")]
    InvalidWavelength(String),

    /// Detector name not present in the registry.
    #[error("unknown detector: {0}")]
    UnknownDetector(String),

    /// The integration engine rejected its inputs.
    #[error("integration engine failure: {0}")]
    Engine(String),
}

impl Error {
    /// Shorthand for a shape mismatch between two shapes.
    #[must_use]
    pub fn shape_mismatch(expected: &[usize], found: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}
