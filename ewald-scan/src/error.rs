//! Scan-level error types.

use thiserror::Error;

/// Result type for arch and sphere operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Scan-level error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error (configuration, shapes, integration engine).
    #[error("core error: {0}")]
    Core(#[from] ewald_core::Error),

    /// Store error while saving or loading.
    #[error("store error: {0}")]
    Io(#[from] ewald_io::Error),

    /// A scan-info row does not have the table's channel set.
    #[error("mismatched scan columns: expected {expected:?}, found {found:?}")]
    MismatchedColumns {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Requested arch or sphere is absent.
    #[error("not found: {0}")]
    NotFound(String),
}
