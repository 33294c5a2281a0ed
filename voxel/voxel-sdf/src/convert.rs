//! Conversion driver.

use tracing::{debug, info};
use voxel_grid::{GridClass, GridTransform, SparseGrid};

use crate::cancel::{cancelled, CancelToken};
use crate::error::ConvertResult;
use crate::expand::expand_narrow_band;
use crate::intersect::{clean_intersecting_voxels, clean_shell_voxels, correct_intersecting_signs};
use crate::mesh::{QuadMesh, INVALID_IDX};
use crate::renorm::{
    offset_active, renormalize, rewrite_inactive_values, sqrt_and_scale, trim_to_band,
};
use crate::sign::{propagate_sign, trace_contours};
use crate::voxelize::voxelize_mesh;

/// Conversion flag: retain the primitive-index grid in the output.
pub const GENERATE_PRIM_INDEX_GRID: u32 = 0x1;

/// Default narrow-band half width in voxels.
pub const DEFAULT_BAND_WIDTH: f32 = 3.0;

/// Narrow-band widths are exclusive; the shortest valid distance has to
/// exceed one voxel.
pub const MIN_BAND_WIDTH: f32 = 1.0 + 1.0e-7;

/// Offset applied around the renormalization step, in voxels.
const RENORM_OFFSET: f32 = 0.8;

/// Converts triangle/quad meshes into narrow-band distance fields.
///
/// The input surface must be closed for signed conversion but need not
/// be manifold; self-intersections and degenerate faces are tolerated,
/// and no use is made of surface normals.
///
/// # Example
///
/// ```
/// use nalgebra::Point3;
/// use voxel_grid::GridTransform;
/// use voxel_sdf::{MeshToVolume, QuadMesh};
///
/// // A single triangle only supports unsigned conversion.
/// let mut mesh = QuadMesh::new();
/// mesh.points.push(Point3::new(0.0, 0.0, 0.0));
/// mesh.points.push(Point3::new(4.0, 0.0, 0.0));
/// mesh.points.push(Point3::new(2.0, 4.0, 0.0));
/// mesh.push_triangle(0, 1, 2);
///
/// let transform = GridTransform::new(1.0).unwrap();
/// let mut converter = MeshToVolume::new(transform);
/// converter.convert_to_unsigned_distance_field(&mesh, 2.0).unwrap();
///
/// assert!(converter.distance_grid().active_voxel_count() > 0);
/// ```
#[derive(Debug)]
pub struct MeshToVolume {
    transform: GridTransform,
    flags: u32,
    sign_sweeps: u32,
    cancel: Option<CancelToken>,
    dist: SparseGrid<f32>,
    index: SparseGrid<i32>,
    class: GridClass,
}

impl MeshToVolume {
    /// Creates a converter producing grids with the given transform.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn new(transform: GridTransform) -> Self {
        Self {
            transform,
            flags: 0,
            sign_sweeps: 1,
            cancel: None,
            dist: SparseGrid::new(f32::MAX),
            index: SparseGrid::new(INVALID_IDX as i32),
            class: GridClass::Unknown,
        }
    }

    /// Sets conversion flags (see [`GENERATE_PRIM_INDEX_GRID`]).
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the number of (contour trace, sign propagation) alternations
    /// used to resolve inside/outside state. Clamped to at least one.
    #[must_use]
    pub const fn with_sign_sweeps(mut self, sweeps: u32) -> Self {
        self.sign_sweeps = if sweeps > 1 { sweeps } else { 1 };
        self
    }

    /// Attaches a cancellation token polled between and inside stages.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Converts `mesh` to a signed narrow-band level set.
    ///
    /// Band widths are in voxel units and are silently clamped to
    /// [`MIN_BAND_WIDTH`]. On cancellation this returns `Ok` with
    /// whatever partial state the stages produced.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty mesh or out-of-range polygon
    /// indices.
    #[allow(clippy::cast_possible_truncation)]
    pub fn convert_to_level_set(
        &mut self,
        mesh: &QuadMesh,
        ex_band_voxels: f32,
        in_band_voxels: f32,
    ) -> ConvertResult<()> {
        let voxel_size = self.transform.voxel_size() as f32;
        let ex_band = voxel_size * ex_band_voxels.max(MIN_BAND_WIDTH);
        let in_band = voxel_size * in_band_voxels.max(MIN_BAND_WIDTH);

        self.do_convert(mesh, ex_band, in_band, false)?;
        self.class = GridClass::LevelSet;
        Ok(())
    }

    /// Converts `mesh` to an unsigned narrow-band distance field.
    ///
    /// Open surfaces are fine here; every produced distance is
    /// non-negative.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty mesh or out-of-range polygon
    /// indices.
    #[allow(clippy::cast_possible_truncation)]
    pub fn convert_to_unsigned_distance_field(
        &mut self,
        mesh: &QuadMesh,
        ex_band_voxels: f32,
    ) -> ConvertResult<()> {
        let voxel_size = self.transform.voxel_size() as f32;
        let ex_band = voxel_size * ex_band_voxels.max(MIN_BAND_WIDTH);

        self.do_convert(mesh, ex_band, 0.0, true)?;
        self.class = GridClass::Unknown;
        Ok(())
    }

    /// The distance grid produced by the last conversion.
    #[must_use]
    pub const fn distance_grid(&self) -> &SparseGrid<f32> {
        &self.dist
    }

    /// The primitive-index grid, when [`GENERATE_PRIM_INDEX_GRID`] was
    /// requested.
    #[must_use]
    pub const fn prim_index_grid(&self) -> Option<&SparseGrid<i32>> {
        if self.flags & GENERATE_PRIM_INDEX_GRID != 0 {
            Some(&self.index)
        } else {
            None
        }
    }

    /// The transform shared by the output grids.
    #[must_use]
    pub const fn transform(&self) -> &GridTransform {
        &self.transform
    }

    /// Classification of the distance grid.
    #[must_use]
    pub const fn grid_class(&self) -> GridClass {
        self.class
    }

    /// Consumes the converter, returning the distance grid and, when
    /// requested, the primitive-index grid.
    #[must_use]
    pub fn into_grids(self) -> (SparseGrid<f32>, Option<SparseGrid<i32>>) {
        let index = (self.flags & GENERATE_PRIM_INDEX_GRID != 0).then_some(self.index);
        (self.dist, index)
    }

    /// Drops all grid contents, keeping the configuration.
    #[allow(clippy::cast_possible_wrap)]
    pub fn clear(&mut self) {
        self.dist = SparseGrid::new(f32::MAX);
        self.index = SparseGrid::new(INVALID_IDX as i32);
        self.class = GridClass::Unknown;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn do_convert(
        &mut self,
        mesh: &QuadMesh,
        ex_band: f32,
        mut in_band: f32,
        unsigned_dist: bool,
    ) -> ConvertResult<()> {
        mesh.validate()?;
        self.clear();

        let token = self.cancel.clone();
        let cancel = token.as_ref();
        let voxel_size = self.transform.voxel_size() as f32;

        if cancelled(cancel) {
            return Ok(());
        }

        // Voxelize the mesh into a squared-distance shell.
        let grids = voxelize_mesh(mesh, cancel);
        if cancelled(cancel) {
            return Ok(());
        }
        self.dist = grids.dist;
        self.index = grids.index;
        let mut mask = grids.mask;

        if unsigned_dist {
            in_band = 0.0;
        } else {
            // Resolve the inside/outside state of the narrow band.
            for sweep in 0..self.sign_sweeps {
                if cancelled(cancel) {
                    break;
                }
                trace_contours(&mut self.dist, &mask, cancel);

                if cancelled(cancel) {
                    break;
                }
                propagate_sign(&mut self.dist, &mask, cancel);
                debug!("Finished sign sweep {}", sweep + 1);
            }

            if cancelled(cancel) {
                return Ok(());
            }

            correct_intersecting_signs(mesh, &mut self.dist, &self.index, &mask);
            if cancelled(cancel) {
                return Ok(());
            }

            // Drop rasterization artefacts of self-intersecting input.
            clean_intersecting_voxels(&self.dist, &mut mask);
            if cancelled(cancel) {
                return Ok(());
            }
            clean_shell_voxels(&mut self.dist, &mut self.index, &mask);
            if cancelled(cancel) {
                return Ok(());
            }
        }

        if self.dist.active_voxel_count() == 0 {
            debug!("No active voxels after voxelization");
            return Ok(());
        }

        // World-space scaling.
        sqrt_and_scale(&mut self.dist, voxel_size, unsigned_dist);
        if cancelled(cancel) {
            return Ok(());
        }

        if !unsigned_dist {
            self.dist.signed_flood_fill();
            if cancelled(cancel) {
                return Ok(());
            }

            rewrite_inactive_values(&mut self.dist, ex_band, in_band);
            if cancelled(cancel) {
                return Ok(());
            }

            // Smooth out bumps caused by self-intersecting and
            // overlapping portions of the mesh.
            let offset = RENORM_OFFSET * voxel_size;
            offset_active(&mut self.dist, -offset);
            renormalize(&mut self.dist, voxel_size, 1.0);
            offset_active(&mut self.dist, offset);

            mask.clear();
        }

        if cancelled(cancel) {
            return Ok(());
        }

        // Narrow-band dilation.
        let min_width = voxel_size * 2.0;
        if in_band > min_width || ex_band > min_width {
            expand_narrow_band(
                mesh,
                &mut self.dist,
                &mut self.index,
                ex_band,
                in_band,
                voxel_size,
                cancel,
            );
        }

        if self.flags & GENERATE_PRIM_INDEX_GRID == 0 {
            self.index.clear();
        }

        // The voxelization step produces extra shell voxels; trim when
        // the band was not widened past them.
        let min_trim_width = voxel_size * 3.0;
        if in_band < min_trim_width || ex_band < min_trim_width {
            trim_to_band(&mut self.dist, ex_band, in_band);
        }

        if cancelled(cancel) {
            return Ok(());
        }

        self.dist.prune_level_set(in_band);

        info!(
            "Converted {} primitives to a {} with {} active voxels",
            mesh.prim_count(),
            if unsigned_dist {
                "unsigned distance field"
            } else {
                "level set"
            },
            self.dist.active_voxel_count()
        );
        Ok(())
    }
}

/// One-call signed conversion, returning just the distance grid.
///
/// # Errors
///
/// Returns an error for an empty mesh or out-of-range polygon indices.
pub fn mesh_to_level_set(
    transform: GridTransform,
    mesh: &QuadMesh,
    ex_band_voxels: f32,
    in_band_voxels: f32,
) -> ConvertResult<SparseGrid<f32>> {
    let mut converter = MeshToVolume::new(transform);
    converter.convert_to_level_set(mesh, ex_band_voxels, in_band_voxels)?;
    Ok(converter.into_grids().0)
}

/// One-call unsigned conversion, returning just the distance grid.
///
/// # Errors
///
/// Returns an error for an empty mesh or out-of-range polygon indices.
pub fn mesh_to_unsigned_distance_field(
    transform: GridTransform,
    mesh: &QuadMesh,
    ex_band_voxels: f32,
) -> ConvertResult<SparseGrid<f32>> {
    let mut converter = MeshToVolume::new(transform);
    converter.convert_to_unsigned_distance_field(mesh, ex_band_voxels)?;
    Ok(converter.into_grids().0)
}
