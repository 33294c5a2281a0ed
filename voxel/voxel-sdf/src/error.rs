//! Error types for mesh-to-volume conversion.

use thiserror::Error;

/// Result type for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Errors that can occur during mesh-to-volume conversion.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Mesh has no polygons.
    #[error("mesh has no polygons")]
    EmptyMesh,

    /// A polygon references a point index outside the point list.
    #[error("polygon {prim} references point {index} but the mesh has {point_count} points")]
    PointIndexOutOfRange {
        /// Index of the offending polygon.
        prim: usize,
        /// The out-of-range point index.
        index: u32,
        /// Number of points in the mesh.
        point_count: usize,
    },
}
