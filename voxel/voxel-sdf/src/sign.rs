//! Inside/outside sign resolution.
//!
//! After rasterization every shell voxel stores a negative squared
//! distance. The contour tracer scans the volume slice by slice and
//! flips voxels it resolves as *outside* to positive; the sign
//! propagator then repairs inconsistencies between slices with a flood
//! fill bounded by the intersection mask. From here on positive means
//! outside and negative means inside.

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};
use rayon::prelude::*;
use voxel_grid::{Coord, CoordBounds, Leaf, SparseGrid, LEAF_DIM};

use crate::cancel::{cancelled, CancelToken};

/// Exclusive leaf store handed to each slice-band task.
type BandLeaves<'a> = HashMap<Coord, &'a mut Leaf<f32>>;

/// Flips the sign of outside voxels, one i-slice at a time.
///
/// Slices are grouped into leaf-aligned bands so every task has
/// exclusive access to the leaves it mutates; all reads stay within the
/// task's own slice.
pub(crate) fn trace_contours(
    dist: &mut SparseGrid<f32>,
    mask: &SparseGrid<bool>,
    cancel: Option<&CancelToken>,
) {
    let Some(bounds) = dist.leaf_bounding_box() else {
        return;
    };
    let bounds = align_to_tiles(bounds);

    let mut bands: HashMap<i32, (HashSet<i32>, BandLeaves<'_>)> = HashMap::new();
    for leaf in dist.leaves_mut() {
        let origin = leaf.origin();
        let band = bands.entry(origin.x).or_default();
        band.0.insert(origin.y);
        band.1.insert(origin, leaf);
    }

    let mut bands: Vec<_> = bands.into_iter().collect();
    bands
        .par_iter_mut()
        .for_each(|(band_x, (row_origins, leaves))| {
            for i in *band_x..*band_x + LEAF_DIM {
                if cancelled(cancel) {
                    break;
                }
                scan_slice(i, leaves, row_origins, mask, bounds);
            }
        });
}

/// Aligns the evaluated leaf bounding box with tile boundaries.
///
/// Minima at or below one tile dimension are rounded away from the
/// origin, so boxes near the origin come out over-extended rather than
/// clipped.
#[allow(clippy::cast_possible_truncation)]
fn align_to_tiles(mut bounds: CoordBounds) -> CoordBounds {
    let tile_dim = LEAF_DIM;

    for axis in 0..3 {
        let (min, max) = match axis {
            0 => (&mut bounds.min.x, &mut bounds.max.x),
            1 => (&mut bounds.min.y, &mut bounds.max.y),
            _ => (&mut bounds.min.z, &mut bounds.max.z),
        };

        let diff = f64::from(min.abs()) / f64::from(tile_dim);
        if *min <= tile_dim {
            let n = diff.ceil() as i32;
            *min = -n * tile_dim;
        } else {
            let n = diff.floor() as i32;
            *min = n * tile_dim;
        }

        let n = (f64::from((*max - *min).abs()) / f64::from(tile_dim)).ceil() as i32;
        *max = *min + n * tile_dim;
    }

    bounds
}

/// 2D scan of one i-slice.
///
/// Walks rows in +j order and voxels in +k order, stepping a whole leaf
/// at a time through unallocated space. `last_voxel_was_out` and
/// `last_k` persist across rows within the slice. Flips only ever turn
/// negative values positive, so repeated sweeps are stable.
fn scan_slice(
    i: i32,
    leaves: &mut BandLeaves<'_>,
    row_origins: &HashSet<i32>,
    mask: &SparseGrid<bool>,
    bounds: CoordBounds,
) {
    const LOCAL: i32 = LEAF_DIM - 1;

    let mut last_voxel_was_out = true;
    let mut last_k = bounds.min.z;

    let mut j = bounds.min.y;
    while j <= bounds.max.y {
        if !row_origins.contains(&(j & !LOCAL)) {
            j = (j | LOCAL) + 1;
            continue;
        }

        let mut k = bounds.min.z;
        while k <= bounds.max.z {
            let c = Coord::new(i, j, k);
            if !leaves.contains_key(&c.leaf_origin()) {
                k = (k | LOCAL) + 1;
                continue;
            }

            if let Some(value) = active_value(leaves, c) {
                if mask.is_active(c) {
                    // Boundary voxel: an outside run ends here.
                    last_voxel_was_out = false;
                    last_k = k;
                } else if value >= 0.0 {
                    last_voxel_was_out = true;
                } else if last_voxel_was_out {
                    // First interior voxel after outside space.
                    set_value(leaves, c, -value);
                } else {
                    for n in [3, 5] {
                        let nv = active_value(leaves, c.neighbor(n));
                        if nv.is_some_and(|v| v > 0.0) {
                            last_voxel_was_out = true;
                            break;
                        }
                    }

                    if last_voxel_was_out {
                        set_value(leaves, c, -value);

                        // Backtrack to the previous boundary, flipping the
                        // run of interior-marked voxels.
                        let mut kk = k - 1;
                        while kk >= last_k {
                            let bc = Coord::new(i, j, kk);
                            if mask.is_active(bc) {
                                break;
                            }
                            if let Some(bv) = active_value(leaves, bc) {
                                if bv < 0.0 {
                                    set_value(leaves, bc, -bv);
                                }
                            }
                            kk -= 1;
                        }

                        last_k = k;
                    } else {
                        last_k = last_k.min(k);
                    }
                }
            }

            k += 1;
        }

        j += 1;
    }
}

fn active_value(leaves: &BandLeaves<'_>, c: Coord) -> Option<f32> {
    let leaf = leaves.get(&c.leaf_origin())?;
    let offset = Leaf::<f32>::offset_of(c);
    leaf.is_active(offset).then(|| leaf.value(offset))
}

fn set_value(leaves: &mut BandLeaves<'_>, c: Coord, value: f32) {
    if let Some(leaf) = leaves.get_mut(&c.leaf_origin()) {
        leaf.set_value_only(Leaf::<f32>::offset_of(c), value);
    }
}

/// Repairs sign inconsistencies the per-slice tracing leaves behind.
///
/// Seeds are active, negative, non-boundary voxels with an outside face
/// neighbor; each is resolved by [`surface_tracer`].
pub(crate) fn propagate_sign(
    dist: &mut SparseGrid<f32>,
    mask: &SparseGrid<bool>,
    cancel: Option<&CancelToken>,
) {
    let mut seeds: Vec<Coord> = Vec::new();

    for origin in dist.leaf_origins() {
        if cancelled(cancel) {
            return;
        }

        let leaf = dist.leaf(origin).expect("origin from this grid");
        for (offset, value) in leaf.iter_active() {
            if value >= 0.0 {
                continue;
            }
            let c = leaf.coord_of(offset);
            if mask.is_active(c) {
                continue;
            }
            for n in 0..6 {
                if dist.probe(c.neighbor(n)).is_some_and(|v| v > 0.0) {
                    seeds.push(c);
                    break;
                }
            }
        }
    }

    for seed in seeds {
        surface_tracer(seed, dist, mask);
    }
}

/// Flood fill that flips interior-marked voxels to outside without
/// crossing the boundary defined by the intersection mask.
fn surface_tracer(seed: Coord, dist: &mut SparseGrid<f32>, mask: &SparseGrid<bool>) {
    let mut worklist: VecDeque<Coord> = VecDeque::new();
    worklist.push_back(seed);

    while let Some(c) = worklist.pop_back() {
        let Some(value) = dist.probe(c) else {
            continue;
        };
        if value >= 0.0 {
            continue;
        }
        dist.set(c, -value);

        for n in 0..6 {
            let nc = c.neighbor(n);
            if mask.is_active(nc) {
                continue;
            }
            if dist.probe(nc).is_some_and(|v| v < 0.0) {
                worklist.push_back(nc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a hollow square contour in the z = 0 .. 2 slices: a ring of
    /// boundary voxels around interior voxels, everything seeded with
    /// negative squared distances as the voxelizer leaves them.
    fn square_contour() -> (SparseGrid<f32>, SparseGrid<bool>) {
        let mut dist = SparseGrid::new(f32::MAX);
        let mut mask = SparseGrid::new(false);

        for i in 0..3 {
            for j in 2..=12 {
                for k in 2..=12 {
                    let c = Coord::new(i, j, k);
                    let on_ring = j == 2 || j == 12 || k == 2 || k == 12;
                    dist.set(c, -0.25);
                    if on_ring {
                        mask.set(c, true);
                    }
                }
            }
        }

        (dist, mask)
    }

    #[test]
    fn tracer_labels_ring_interior_and_exterior() {
        let (mut dist, mask) = square_contour();
        trace_contours(&mut dist, &mask, None);
        propagate_sign(&mut dist, &mask, None);

        for i in 0..3 {
            // Interior voxels stay negative.
            assert!(dist.probe(Coord::new(i, 7, 7)).unwrap() < 0.0);
            // Boundary voxels are untouched by the tracer.
            assert!(dist.probe(Coord::new(i, 2, 7)).unwrap() < 0.0);
        }
    }

    #[test]
    fn tracer_flips_exterior_shell() {
        let (mut dist, mask) = square_contour();

        // An exterior run in the first active row of the slice, the way
        // the rasterized shell's outer layer precedes the boundary.
        for k in 5..=6 {
            dist.set(Coord::new(0, 1, k), -0.5);
        }

        trace_contours(&mut dist, &mask, None);
        propagate_sign(&mut dist, &mask, None);

        for k in 5..=6 {
            assert!(
                dist.probe(Coord::new(0, 1, k)).unwrap() > 0.0,
                "voxel outside the ring is flipped positive"
            );
        }
        assert!(dist.probe(Coord::new(0, 7, 7)).unwrap() < 0.0);
    }

    #[test]
    fn propagation_resolves_orphan_regions() {
        let mut dist = SparseGrid::new(f32::MAX);
        let mask = SparseGrid::new(false);

        // A resolved outside voxel next to a chain of unresolved ones.
        dist.set(Coord::new(0, 0, 0), 0.5);
        dist.set(Coord::new(1, 0, 0), -0.5);
        dist.set(Coord::new(2, 0, 0), -0.5);
        dist.set(Coord::new(2, 1, 0), -0.5);

        propagate_sign(&mut dist, &mask, None);

        assert!(dist.probe(Coord::new(1, 0, 0)).unwrap() > 0.0);
        assert!(dist.probe(Coord::new(2, 0, 0)).unwrap() > 0.0);
        assert!(dist.probe(Coord::new(2, 1, 0)).unwrap() > 0.0);
    }

    #[test]
    fn surface_tracer_respects_mask_boundary() {
        let mut dist = SparseGrid::new(f32::MAX);
        let mut mask = SparseGrid::new(false);

        dist.set(Coord::new(0, 0, 0), -0.5);
        dist.set(Coord::new(1, 0, 0), -0.5); // boundary
        dist.set(Coord::new(2, 0, 0), -0.5); // behind the boundary
        mask.set(Coord::new(1, 0, 0), true);

        surface_tracer(Coord::new(0, 0, 0), &mut dist, &mask);

        assert!(dist.probe(Coord::new(0, 0, 0)).unwrap() > 0.0);
        assert!(dist.probe(Coord::new(1, 0, 0)).unwrap() < 0.0);
        assert!(dist.probe(Coord::new(2, 0, 0)).unwrap() < 0.0);
    }

    #[test]
    fn alignment_snaps_to_tile_boundaries() {
        let bounds = align_to_tiles(CoordBounds::new(Coord::new(3, -9, 17), Coord::new(20, 5, 30)));

        assert_eq!(bounds.min.x % LEAF_DIM, 0);
        assert_eq!(bounds.min.y % LEAF_DIM, 0);
        assert_eq!(bounds.min.z % LEAF_DIM, 0);
        assert!(bounds.min.x <= 3 || bounds.min.x == -8);
        assert!(bounds.max.x >= 20);
        assert!(bounds.max.y >= 5);
        assert!(bounds.max.z >= 30);
    }
}
