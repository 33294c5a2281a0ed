//! Narrow-band expansion.
//!
//! The rasterized band is at most about one voxel thick. This stage
//! alternates one-voxel topological dilation of a boolean front mask
//! with distance evaluation until the front dies out, producing signed
//! Euclidean world-space distances out to the requested band widths.

use rayon::prelude::*;
use tracing::debug;
use voxel_grid::{Coord, Leaf, SparseGrid, LEAF_DIM};

use crate::cancel::{cancelled, CancelToken};
use crate::mesh::QuadMesh;
use crate::tri::prim_dist_sqr;

/// Pending writes for one front-mask leaf, computed against the state
/// at the start of the iteration.
struct LeafUpdate {
    origin: Coord,
    /// Clear the whole mask leaf (its distance or index leaf is missing).
    clear_all: bool,
    /// Mask bits to retire.
    mask_off: Vec<usize>,
    /// Voxels to activate: (offset, signed distance, primitive).
    activate: Vec<(usize, f32, i32)>,
}

/// Dilates the active set of `dist` out to the requested world-space
/// band widths, computing each new voxel's distance through its best
/// neighbor's primitive.
///
/// The sign of a new voxel is inherited from the signed background it
/// lands on; this stage never flips signs.
pub(crate) fn expand_narrow_band(
    mesh: &QuadMesh,
    dist: &mut SparseGrid<f32>,
    index: &mut SparseGrid<i32>,
    ex_band: f32,
    in_band: f32,
    voxel_size: f32,
    cancel: Option<&CancelToken>,
) {
    let mut front: SparseGrid<bool> = SparseGrid::new(false);
    front.topology_union(dist);

    preallocate_leaves(dist, ex_band, in_band, voxel_size, cancel);
    if cancelled(cancel) {
        return;
    }

    index.topology_union(dist);

    let mut iterations = 0u32;
    while front.active_voxel_count() > 0 {
        if cancelled(cancel) {
            break;
        }

        front.dilate_active();

        let updates: Vec<LeafUpdate> = {
            let dist_ref: &SparseGrid<f32> = dist;
            let index_ref: &SparseGrid<i32> = index;
            let front_leaves: Vec<&Leaf<bool>> = front.leaves().collect();
            front_leaves
                .par_iter()
                .map(|leaf| {
                    compute_leaf_update(leaf, mesh, dist_ref, index_ref, ex_band, in_band, voxel_size)
                })
                .collect()
        };

        for update in updates {
            apply_leaf_update(update, dist, index, &mut front);
        }

        front.prune_inactive();
        iterations += 1;
    }

    debug!(
        "Expanded narrow band in {} iterations to {} active voxels",
        iterations,
        dist.active_voxel_count()
    );
}

/// Evaluates one front leaf against the pre-iteration grids.
fn compute_leaf_update(
    leaf: &Leaf<bool>,
    mesh: &QuadMesh,
    dist: &SparseGrid<f32>,
    index: &SparseGrid<i32>,
    ex_band: f32,
    in_band: f32,
    voxel_size: f32,
) -> LeafUpdate {
    let origin = leaf.origin();
    let mut update = LeafUpdate {
        origin,
        clear_all: false,
        mask_off: Vec::new(),
        activate: Vec::new(),
    };

    if index.leaf(origin).is_none() {
        // The front ran past the preallocated region.
        update.clear_all = true;
        return update;
    }
    let Some(dist_leaf) = dist.leaf(origin) else {
        update.clear_all = true;
        return update;
    };

    let mut prim: i32 = 0;

    for offset in leaf.active_offsets() {
        if dist_leaf.is_active(offset) {
            update.mask_off.push(offset);
            continue;
        }

        let c = leaf.coord_of(offset);
        let distance = neighbor_distance(mesh, dist, index, c, &mut prim, voxel_size);

        let inside = dist_leaf.value(offset) < 0.0;
        if !inside && distance < ex_band {
            update.activate.push((offset, distance, prim));
        } else if inside && distance < in_band {
            update.activate.push((offset, -distance, prim));
        } else {
            update.mask_off.push(offset);
        }
    }

    update
}

/// World-space distance from `c` to the primitive of its best neighbor.
///
/// Scans the 18 neighborhood for the active voxel with the smallest
/// distance magnitude and re-evaluates `c` exactly against that voxel's
/// primitive. `prim` carries the last primitive across calls within a
/// leaf, matching the rasterizer's first-writer tie behavior.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn neighbor_distance(
    mesh: &QuadMesh,
    dist: &SparseGrid<f32>,
    index: &SparseGrid<i32>,
    c: Coord,
    prim: &mut i32,
    voxel_size: f32,
) -> f32 {
    let mut best = f32::MAX;

    for n in 0..18 {
        let nc = c.neighbor(n);
        if let Some(value) = dist.probe(nc) {
            let magnitude = value.abs();
            if magnitude < best {
                best = magnitude;
                *prim = index.get(nc);
            }
        }
    }

    (prim_dist_sqr(mesh, *prim as usize, c.to_point()).sqrt() * f64::from(voxel_size)) as f32
}

fn apply_leaf_update(
    update: LeafUpdate,
    dist: &mut SparseGrid<f32>,
    index: &mut SparseGrid<i32>,
    front: &mut SparseGrid<bool>,
) {
    let Some(front_leaf) = front.leaf_mut(update.origin) else {
        return;
    };

    if update.clear_all {
        front_leaf.clear_mask();
        return;
    }

    for offset in update.mask_off {
        front_leaf.set_inactive(offset);
    }

    if update.activate.is_empty() {
        return;
    }

    let dist_leaf = dist
        .leaf_mut(update.origin)
        .expect("checked when the update was computed");
    for &(offset, value, _) in &update.activate {
        dist_leaf.set_value(offset, value);
    }

    let index_leaf = index
        .leaf_mut(update.origin)
        .expect("checked when the update was computed");
    for &(offset, _, prim) in &update.activate {
        index_leaf.set_value(offset, prim);
    }
}

/// Allocates rings of leaves around the current band so expansion can
/// write into them without allocation, bounded per side by the
/// requested widths.
fn preallocate_leaves(
    dist: &mut SparseGrid<f32>,
    ex_band: f32,
    in_band: f32,
    voxel_size: f32,
    cancel: Option<&CancelToken>,
) {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn rings(band: f32, leaf_size: f32) -> usize {
        (band / leaf_size).ceil().max(0.0) as usize + 1
    }

    let leaf_size = (LEAF_DIM - 1) as f32 * voxel_size;
    let in_rings = rings(in_band, leaf_size);
    let ex_rings = rings(ex_band, leaf_size);

    let mut frontier = dist.leaf_origins();

    for ring in 0..in_rings.max(ex_rings) {
        if cancelled(cancel) {
            return;
        }

        let mut next = Vec::with_capacity(2 * frontier.len());

        for origin in frontier {
            let inside = dist.get(origin) < 0.0;
            if inside && ring >= in_rings {
                continue;
            }
            if !inside && ring >= ex_rings {
                continue;
            }

            let candidates = [
                origin.offset_by(-1, 0, 0),
                origin.offset_by(0, -1, 0),
                origin.offset_by(0, 0, -1),
                origin.offset_by(LEAF_DIM, 0, 0),
                origin.offset_by(0, LEAF_DIM, 0),
                origin.offset_by(0, 0, LEAF_DIM),
            ];
            for c in candidates {
                if !dist.has_leaf(c) {
                    dist.touch_leaf(c);
                    next.push(c.leaf_origin());
                }
            }
        }

        if next.is_empty() {
            break;
        }
        frontier = next;
    }
}
