//! Primitive rasterization into squared-distance shell voxels.

use std::collections::VecDeque;

use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;
use voxel_grid::{nearest_coord, Coord, SparseGrid};

use crate::cancel::{cancelled, CancelToken};
use crate::mesh::{QuadMesh, INVALID_IDX};
use crate::tri::prim_dist_sqr;

/// Squared pruning radius for the rasterized shell (√3 / 2).
///
/// A primitive's flood fill only continues through voxels whose squared
/// index-space distance to it stays below this bound, which keeps the
/// shell within roughly one voxel of the surface.
pub(crate) const SHELL_PRUNE_DIST_SQR: f64 = 0.866_025_403_784_438_61;

/// Primitives whose axis-wise `(v1 − v0)` and `(v0 − v2)` extents all
/// stay below this many index units rasterize through the plain
/// worklist flood; larger ones use the leaf-wavefront variant.
pub(crate) const SHORT_EDGE_MAX_EXTENT: f64 = 200.0;

/// The three parallel rasterization outputs sharing one lattice.
#[derive(Debug)]
pub(crate) struct RasterGrids {
    /// Negative squared index-space distances.
    pub dist: SparseGrid<f32>,
    /// Closest-primitive indices.
    pub index: SparseGrid<i32>,
    /// Voxels directly touched by some primitive.
    pub mask: SparseGrid<bool>,
}

impl RasterGrids {
    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn new() -> Self {
        Self {
            dist: SparseGrid::new(f32::MAX),
            index: SparseGrid::new(INVALID_IDX as i32),
            mask: SparseGrid::new(false),
        }
    }

    /// Folds `other` into `self`: per voxel the smaller squared distance
    /// wins together with its primitive index, and the shell masks
    /// union. Commutative and associative up to ties, which keep the
    /// first-written primitive.
    fn merge(mut self, other: Self) -> Self {
        for leaf in other.dist.leaves() {
            for (offset, rhs) in leaf.iter_active() {
                let c = leaf.coord_of(offset);
                if -rhs < self.dist.get(c).abs() {
                    self.dist.set(c, rhs);
                    self.index.set(c, other.index.get(c));
                }
            }
        }
        self.mask.topology_union(&other.mask);
        self
    }
}

/// Rasterizes every primitive of `mesh` into a thin shell of squared
/// distance samples, reducing per-worker partial grids pairwise.
pub(crate) fn voxelize_mesh(mesh: &QuadMesh, cancel: Option<&CancelToken>) -> RasterGrids {
    let grids = (0..mesh.prim_count())
        .into_par_iter()
        .fold(
            || RasterWorker::new(mesh, cancel),
            |mut worker, prim| {
                worker.rasterize(prim);
                worker
            },
        )
        .map(|worker| worker.out)
        .reduce(RasterGrids::new, RasterGrids::merge);

    debug!(
        "Rasterized {} primitives into {} shell voxels across {} leaves",
        mesh.prim_count(),
        grids.dist.active_voxel_count(),
        grids.dist.leaf_count()
    );
    grids
}

/// Per-worker rasterization state.
///
/// Each rayon split owns private output grids plus two accelerators: a
/// "last primitive" scratch grid that skips re-evaluating a voxel
/// against the primitive currently being flooded, and a reusable
/// worklist. Neither is observable outside the worker.
struct RasterWorker<'a> {
    mesh: &'a QuadMesh,
    cancel: Option<&'a CancelToken>,
    out: RasterGrids,
    last_prim: SparseGrid<i32>,
    worklist: VecDeque<Coord>,
}

impl<'a> RasterWorker<'a> {
    #[allow(clippy::cast_possible_wrap)]
    fn new(mesh: &'a QuadMesh, cancel: Option<&'a CancelToken>) -> Self {
        Self {
            mesh,
            cancel,
            out: RasterGrids::new(),
            last_prim: SparseGrid::new(INVALID_IDX as i32),
            worklist: VecDeque::new(),
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn rasterize(&mut self, prim: usize) {
        if cancelled(self.cancel) {
            return;
        }

        let verts = self.mesh.prims[prim];
        let p0 = self.mesh.point(verts[0]);
        let p1 = self.mesh.point(verts[1]);
        let p2 = self.mesh.point(verts[2]);

        if short_edge(p0, p1, p2) {
            self.flood_short(prim, verts, p0, p1, p2);
        } else {
            self.flood_long(prim, p0);
        }
    }

    /// Worklist flood for primitives spanning few voxels: seed at every
    /// vertex, then grow through 26-neighborhoods while the pruning
    /// radius admits them.
    #[allow(clippy::cast_possible_wrap)]
    fn flood_short(
        &mut self,
        prim: usize,
        verts: [u32; 4],
        p0: Point3<f64>,
        p1: Point3<f64>,
        p2: Point3<f64>,
    ) {
        self.worklist.clear();

        for seed in [p0, p1, p2] {
            let c = nearest_coord(seed);
            self.eval_voxel(c, prim);
            self.worklist.push_back(c);
        }
        if verts[3] != INVALID_IDX {
            let c = nearest_coord(self.mesh.point(verts[3]));
            self.eval_voxel(c, prim);
            self.worklist.push_back(c);
        }

        while let Some(c) = self.worklist.pop_back() {
            if cancelled(self.cancel) {
                break;
            }

            self.out.mask.set(c, true);

            for n in 0..26 {
                let nc = c.neighbor(n);
                if self.last_prim.get(nc) != prim as i32 {
                    self.last_prim.set(nc, prim as i32);
                    if self.eval_voxel(nc, prim) {
                        self.worklist.push_back(nc);
                    }
                }
            }
        }
    }

    /// Leaf-wavefront flood for primitives with long edges: the frontier
    /// lives in an auxiliary boolean grid whose inactive leaves are
    /// pruned between waves.
    #[allow(clippy::cast_possible_wrap)]
    fn flood_long(&mut self, prim: usize, p0: Point3<f64>) {
        let mut wavefront: SparseGrid<bool> = SparseGrid::new(false);

        let seed = nearest_coord(p0);
        self.eval_voxel(seed, prim);
        self.last_prim.set(seed, prim as i32);
        wavefront.set_active(seed);

        while wavefront.active_voxel_count() > 0 {
            if cancelled(self.cancel) {
                break;
            }

            for origin in wavefront.leaf_origins() {
                let offsets = wavefront
                    .leaf(origin)
                    .map(voxel_grid::Leaf::active_offsets)
                    .unwrap_or_default();

                for offset in offsets {
                    let c = {
                        let leaf = wavefront
                            .leaf_mut(origin)
                            .expect("wavefront leaf exists within the wave");
                        leaf.set_inactive(offset);
                        leaf.coord_of(offset)
                    };

                    self.out.mask.set(c, true);

                    for n in 0..26 {
                        let nc = c.neighbor(n);
                        if self.last_prim.get(nc) != prim as i32 {
                            self.last_prim.set(nc, prim as i32);
                            if self.eval_voxel(nc, prim) {
                                wavefront.set_active(nc);
                            }
                        }
                    }
                }
            }

            wavefront.prune_inactive();
        }
    }

    /// Evaluates the squared distance from the voxel center at `c` to
    /// primitive `prim`, recording it (negated, with the primitive
    /// index) when it beats the stored magnitude. Returns whether the
    /// flood should continue through this voxel.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn eval_voxel(&mut self, c: Coord, prim: usize) -> bool {
        let dist = prim_dist_sqr(self.mesh, prim, c.to_point());

        let tmp = dist as f32;
        if tmp < self.out.dist.get(c).abs() {
            self.out.dist.set(c, -tmp);
            self.out.index.set(c, prim as i32);
        }

        dist < SHELL_PRUNE_DIST_SQR
    }
}

/// True when all axis-wise extents of `(v1 − v0)` and `(v0 − v2)` stay
/// below [`SHORT_EDGE_MAX_EXTENT`].
fn short_edge(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> bool {
    let mut edge_max = (v1.x - v0.x).abs();
    edge_max = edge_max.max((v1.y - v0.y).abs());
    edge_max = edge_max.max((v1.z - v0.z).abs());
    edge_max = edge_max.max((v0.x - v2.x).abs());
    edge_max = edge_max.max((v0.y - v2.y).abs());
    edge_max = edge_max.max((v0.z - v2.z).abs());
    edge_max < SHORT_EDGE_MAX_EXTENT
}
