//! Mesh to narrow-band signed distance field conversion.
//!
//! Converts triangle/quad meshes into sparse voxel grids of signed (or
//! unsigned) Euclidean distances, active only within configurable
//! interior and exterior band widths around the surface. The conversion
//! tolerates self-intersections, degenerate faces and non-manifold
//! input, and never consults surface normals.
//!
//! # Layer 0
//!
//! This is a Layer 0 crate with zero engine dependencies.
//!
//! # Pipeline
//!
//! 1. Rasterize primitives into a thin shell of squared-distance
//!    samples, closest-primitive indices and an intersection mask.
//! 2. Resolve inside/outside state by per-slice contour tracing plus a
//!    mask-bounded sign propagation.
//! 3. Correct and clean shell voxels left behind by self-intersecting
//!    geometry.
//! 4. Convert to world-space signed distances, flood signs into
//!    inactive space, and renormalize away rasterization bumps.
//! 5. Dilate the band out to the requested widths, then trim and prune.
//!
//! # Example
//!
//! ```
//! use nalgebra::Point3;
//! use voxel_grid::{Coord, GridTransform};
//! use voxel_sdf::{mesh_to_level_set, QuadMesh};
//!
//! // A 4x4x4 axis-aligned box.
//! let mut mesh = QuadMesh::new();
//! for &z in &[0.0f32, 4.0] {
//!     for &y in &[0.0f32, 4.0] {
//!         for &x in &[0.0f32, 4.0] {
//!             mesh.points.push(Point3::new(x, y, z));
//!         }
//!     }
//! }
//! for [a, b, c, d] in [
//!     [0u32, 1, 3, 2],
//!     [4, 5, 7, 6],
//!     [0, 1, 5, 4],
//!     [2, 3, 7, 6],
//!     [0, 2, 6, 4],
//!     [1, 3, 7, 5],
//! ] {
//!     mesh.push_triangle(a, b, c);
//!     mesh.push_triangle(a, c, d);
//! }
//!
//! let transform = GridTransform::new(1.0).unwrap();
//! let sdf = mesh_to_level_set(transform, &mesh, 2.0, 2.0).unwrap();
//!
//! // The box center is inside.
//! assert!(sdf.get(Coord::new(2, 2, 2)) < 0.0);
//! ```

mod cancel;
mod convert;
mod error;
mod expand;
mod intersect;
mod mesh;
mod renorm;
mod sign;
mod tri;
mod voxelize;

pub use cancel::CancelToken;
pub use convert::{
    mesh_to_level_set, mesh_to_unsigned_distance_field, MeshToVolume, DEFAULT_BAND_WIDTH,
    GENERATE_PRIM_INDEX_GRID, MIN_BAND_WIDTH,
};
pub use error::{ConvertError, ConvertResult};
pub use mesh::{QuadMesh, INVALID_IDX};
pub use tri::{tri_closest_point, tri_point_dist_sqr};
