//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested group or dataset is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored data does not have the expected type or layout.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// JSON-encoded argument text could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] ewald_core::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}
