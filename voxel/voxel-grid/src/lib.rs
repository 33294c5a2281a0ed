//! Sparse tiled 3D voxel grids.
//!
//! This crate provides the storage layer for narrow-band volume
//! processing: a hierarchically sparse grid of values with a per-voxel
//! active state, an index↔world transform, and the topology passes
//! (dilation, signed flood fill, pruning) that narrow-band pipelines
//! are built from.
//!
//! # Layer 0
//!
//! This is a Layer 0 crate with zero engine dependencies.
//!
//! # Design
//!
//! A [`SparseGrid`] stores dense 8³ [`Leaf`] tiles in a hash map keyed
//! by leaf origin. Regions with no allocated leaf read as either a
//! stored *tile value* or the grid-wide background, so an inactive
//! interior can carry a different signed background than the exterior.
//! Every voxel has a value whether or not it is active; the active mask
//! marks the narrow band.
//!
//! # Example
//!
//! ```
//! use voxel_grid::{Coord, SparseGrid};
//!
//! let mut grid = SparseGrid::new(f32::MAX);
//! grid.set(Coord::new(0, 1, 2), -0.25);
//!
//! assert_eq!(grid.active_voxel_count(), 1);
//! assert_eq!(grid.probe(Coord::new(0, 1, 2)), Some(-0.25));
//! ```

mod coord;
mod error;
mod flood;
mod grid;
mod leaf;
mod morphology;
mod transform;

pub use coord::{nearest_coord, Coord, CoordBounds, COORD_OFFSETS};
pub use error::{GridError, GridResult};
pub use grid::SparseGrid;
pub use leaf::{Leaf, LEAF_DIM, LEAF_LOG2, LEAF_VOLUME};
pub use transform::{GridClass, GridTransform};
