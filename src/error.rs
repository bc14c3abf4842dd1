//! Error types
use thiserror::Error;

/// Result type alias using [`DgError`]
pub type Result<T> = std::result::Result<T, DgError>;

/// Errors that can occur while setting up or running the solver
#[derive(Error, Debug)]
pub enum DgError {
    /// Wall enrichment requested, but no partition owns a wall boundary
    #[error("no wall boundary found on any partition")]
    NoWallBoundary,

    /// Wall distance propagation did not reach every vertex
    #[error("wall distance: {0}")]
    WallDistance(String),

    /// Inconsistent parameters
    #[error("invalid parameters: {0}")]
    Config(String),

    /// Mesh construction failed
    #[error("mesh error: {0}")]
    Mesh(String),

    /// Dense linear algebra failed (singular local matrix, ...)
    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    /// Array of unexpected shape (e.g. read from file)
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Error while reading or writing hdf5 files
    #[cfg(feature = "hdf5")]
    #[error("hdf5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
