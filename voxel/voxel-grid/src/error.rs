//! Error types for grid construction.

use thiserror::Error;

/// Result type for grid operations.
pub type GridResult<T> = Result<T, GridError>;

/// Errors that can occur when building grid-level objects.
#[derive(Debug, Error)]
pub enum GridError {
    /// Voxel size must be positive and finite.
    #[error("invalid voxel size: {0}")]
    InvalidVoxelSize(f64),
}
