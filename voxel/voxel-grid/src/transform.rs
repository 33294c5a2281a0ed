//! Index↔world affine mapping.

use nalgebra::{Point3, Vector3};

use crate::coord::Coord;
use crate::error::{GridError, GridResult};

/// Classification of a grid's contents, carried as output metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridClass {
    /// No particular interpretation.
    #[default]
    Unknown,
    /// A narrow-band signed distance field / level set.
    LevelSet,
}

/// A uniform-scale + translation map between index space and world space.
///
/// Index space is the lattice of voxel centers: the world position of
/// lattice site `(i, j, k)` is `origin + (i, j, k) · voxel_size`.
///
/// # Example
///
/// ```
/// use nalgebra::Point3;
/// use voxel_grid::{Coord, GridTransform};
///
/// let transform = GridTransform::new(0.5).unwrap();
/// assert_eq!(transform.voxel_size(), 0.5);
/// assert_eq!(
///     transform.index_to_world(Point3::new(2.0, 0.0, -4.0)),
///     Point3::new(1.0, 0.0, -2.0),
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTransform {
    voxel_size: f64,
    origin: Point3<f64>,
}

impl GridTransform {
    /// Creates a transform with the given voxel size and a world origin
    /// at zero.
    ///
    /// # Errors
    ///
    /// Returns an error if `voxel_size` is not a positive finite number.
    pub fn new(voxel_size: f64) -> GridResult<Self> {
        if !voxel_size.is_finite() || voxel_size <= 0.0 {
            return Err(GridError::InvalidVoxelSize(voxel_size));
        }
        Ok(Self {
            voxel_size,
            origin: Point3::origin(),
        })
    }

    /// Returns the transform translated so index-space zero maps to
    /// `origin` in world space.
    #[must_use]
    pub const fn with_origin(mut self, origin: Point3<f64>) -> Self {
        self.origin = origin;
        self
    }

    /// Edge length of one voxel in world units.
    #[inline]
    #[must_use]
    pub const fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// Maps a continuous index-space position to world space.
    #[inline]
    #[must_use]
    pub fn index_to_world(&self, p: Point3<f64>) -> Point3<f64> {
        self.origin + p.coords * self.voxel_size
    }

    /// Maps a world-space position to continuous index space.
    #[inline]
    #[must_use]
    pub fn world_to_index(&self, p: Point3<f64>) -> Point3<f64> {
        ((p - self.origin) / self.voxel_size).into()
    }

    /// World-space center of the voxel at `coord`.
    #[inline]
    #[must_use]
    pub fn voxel_center(&self, coord: Coord) -> Point3<f64> {
        self.index_to_world(coord.to_point())
    }

    /// World-space displacement of one voxel step along each axis.
    #[must_use]
    pub fn voxel_extent(&self) -> Vector3<f64> {
        Vector3::new(self.voxel_size, self.voxel_size, self.voxel_size)
    }
}
