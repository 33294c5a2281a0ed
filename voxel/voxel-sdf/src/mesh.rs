//! Input mesh representation.

use nalgebra::Point3;

use crate::error::{ConvertError, ConvertResult};

/// Sentinel marking the unused fourth index of a triangle primitive.
///
/// The primitive-index grid stores this value reinterpreted as `i32` as
/// its background.
pub const INVALID_IDX: u32 = u32::MAX;

/// A triangle/quad mesh with points in grid index space.
///
/// Points are expected to be pre-transformed by the inverse of the
/// output grid transform, so one unit equals one voxel. Each primitive
/// is a 4-tuple of point indices; the fourth index equals
/// [`INVALID_IDX`] for a triangle, otherwise the tuple is a quad split
/// into the triangles `(v0, v1, v2)` and `(v0, v3, v2)`.
///
/// # Example
///
/// ```
/// use nalgebra::Point3;
/// use voxel_sdf::QuadMesh;
///
/// let mut mesh = QuadMesh::new();
/// mesh.points.push(Point3::new(0.0, 0.0, 0.0));
/// mesh.points.push(Point3::new(10.0, 0.0, 0.0));
/// mesh.points.push(Point3::new(5.0, 10.0, 0.0));
/// mesh.push_triangle(0, 1, 2);
///
/// assert_eq!(mesh.prim_count(), 1);
/// assert!(mesh.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct QuadMesh {
    /// Point positions in index space. Single precision suffices; the
    /// pipeline promotes to `f64` for distance evaluation.
    pub points: Vec<Point3<f32>>,

    /// Primitives as 4-tuples of point indices.
    pub prims: Vec<[u32; 4]>,
}

impl QuadMesh {
    /// Creates an empty mesh.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            points: Vec::new(),
            prims: Vec::new(),
        }
    }

    /// Creates a mesh from point and primitive lists.
    #[must_use]
    pub fn from_parts(points: Vec<Point3<f32>>, prims: Vec<[u32; 4]>) -> Self {
        Self { points, prims }
    }

    /// Appends a triangle primitive.
    pub fn push_triangle(&mut self, v0: u32, v1: u32, v2: u32) {
        self.prims.push([v0, v1, v2, INVALID_IDX]);
    }

    /// Appends a quad primitive.
    pub fn push_quad(&mut self, v0: u32, v1: u32, v2: u32, v3: u32) {
        self.prims.push([v0, v1, v2, v3]);
    }

    /// Number of primitives.
    #[must_use]
    pub fn prim_count(&self) -> usize {
        self.prims.len()
    }

    /// Whether primitive `prim` is a quad.
    #[must_use]
    pub fn is_quad(&self, prim: usize) -> bool {
        self.prims[prim][3] != INVALID_IDX
    }

    /// Point `index` promoted to double precision.
    #[inline]
    #[must_use]
    pub fn point(&self, index: u32) -> Point3<f64> {
        let p = self.points[index as usize];
        Point3::new(f64::from(p.x), f64::from(p.y), f64::from(p.z))
    }

    /// Checks that the mesh is non-empty and every primitive index is in
    /// range.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::EmptyMesh`] for a mesh without polygons
    /// and [`ConvertError::PointIndexOutOfRange`] for a dangling index.
    pub fn validate(&self) -> ConvertResult<()> {
        if self.prims.is_empty() {
            return Err(ConvertError::EmptyMesh);
        }

        let point_count = self.points.len();
        for (prim, verts) in self.prims.iter().enumerate() {
            for (slot, &index) in verts.iter().enumerate() {
                if slot == 3 && index == INVALID_IDX {
                    continue;
                }
                if index as usize >= point_count {
                    return Err(ConvertError::PointIndexOutOfRange {
                        prim,
                        index,
                        point_count,
                    });
                }
            }
        }

        Ok(())
    }
}
