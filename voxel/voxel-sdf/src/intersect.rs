//! Shell-voxel sign correction and self-intersection cleanup.

use rayon::prelude::*;
use voxel_grid::{Coord, Leaf, SparseGrid};

use crate::mesh::QuadMesh;
use crate::tri::prim_closest_point_dir;
use crate::voxelize::SHELL_PRUNE_DIST_SQR;

/// Flips inside-marked shell voxels back to outside where a
/// self-intersecting sheet passed through them.
///
/// A shell voxel still marked inside is compared against its 26
/// non-shell outside neighbors: if any neighbor's closest-point
/// direction agrees with the voxel's own (positive dot product), the
/// voxel is declared outside. Reads touch only non-shell voxels and
/// writes touch only shell voxels, so flips are discovered in parallel
/// against a consistent snapshot and applied afterwards.
#[allow(clippy::cast_sign_loss)]
pub(crate) fn correct_intersecting_signs(
    mesh: &QuadMesh,
    dist: &mut SparseGrid<f32>,
    index: &SparseGrid<i32>,
    mask: &SparseGrid<bool>,
) {
    let dist_ref: &SparseGrid<f32> = dist;
    let mask_leaves: Vec<&Leaf<bool>> = mask.leaves().collect();

    let flips: Vec<Coord> = mask_leaves
        .par_iter()
        .flat_map_iter(|leaf| {
            leaf.active_offsets().into_iter().filter_map(|offset| {
                let c = leaf.coord_of(offset);
                let value = dist_ref.get(c);
                if value >= 0.0 {
                    return None;
                }

                let dir = prim_closest_point_dir(mesh, index.get(c) as usize, c.to_point());

                for n in 0..26 {
                    let nc = c.neighbor(n);
                    if mask.is_active(nc) {
                        continue;
                    }
                    let Some(nv) = dist_ref.probe(nc) else {
                        continue;
                    };
                    if nv < 0.0 {
                        continue;
                    }

                    let n_dir = prim_closest_point_dir(mesh, index.get(nc) as usize, nc.to_point());
                    if n_dir.dot(&dir) > 0.0 {
                        return Some(c);
                    }
                }
                None
            })
        })
        .collect();

    for c in flips {
        if let Some(value) = dist.probe(c) {
            if value < 0.0 {
                dist.set(c, -value);
            }
        }
    }
}

/// Deactivates shell voxels with no outside neighbor at all.
///
/// Such voxels were rasterized by self-intersecting portions of the
/// mesh; the surviving shell keeps an outside voxel within its 26
/// neighborhood.
pub(crate) fn clean_intersecting_voxels(dist: &SparseGrid<f32>, mask: &mut SparseGrid<bool>) {
    let mut leaves: Vec<&mut Leaf<bool>> = mask.leaves_mut().collect();

    leaves.par_iter_mut().for_each(|leaf| {
        for offset in leaf.active_offsets() {
            let c = leaf.coord_of(offset);
            let keep = (0..26).any(|n| dist.probe(c.neighbor(n)).is_some_and(|v| v > 0.0));
            if !keep {
                leaf.deactivate(offset, false);
            }
        }
    });

    mask.prune_inactive();
}

/// Deactivates inside-marked non-shell voxels that lost their shell.
///
/// A non-shell voxel marked inside must keep a shell voxel within its
/// 18 neighborhood; otherwise it is an artefact of a self-intersection
/// and is dropped from both the distance and the index grid. Survivors
/// adjacent to the shell are clamped so shell artefacts cannot push
/// them outward.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn clean_shell_voxels(
    dist: &mut SparseGrid<f32>,
    index: &mut SparseGrid<i32>,
    mask: &SparseGrid<bool>,
) {
    let clamp = (-SHELL_PRUNE_DIST_SQR) as f32;
    let dist_background = dist.background();

    let removed: Vec<Coord> = {
        let mut leaves: Vec<&mut Leaf<f32>> = dist.leaves_mut().collect();
        leaves
            .par_iter_mut()
            .map(|leaf| {
                let mut removed = Vec::new();
                for offset in leaf.active_offsets() {
                    let value = leaf.value(offset);
                    if value > 0.0 {
                        continue;
                    }
                    let c = leaf.coord_of(offset);
                    if mask.is_active(c) {
                        continue;
                    }

                    let keep = (0..18).any(|n| mask.is_active(c.neighbor(n)));
                    if keep {
                        if value > clamp {
                            leaf.set_value_only(offset, clamp);
                        }
                    } else {
                        leaf.deactivate(offset, dist_background);
                        removed.push(c);
                    }
                }
                removed
            })
            .reduce(Vec::new, |mut a, mut b| {
                a.append(&mut b);
                a
            })
    };

    let index_background = index.background();
    for c in removed {
        index.deactivate(c, index_background);
    }

    dist.prune_inactive();
    index.prune_inactive();
}
