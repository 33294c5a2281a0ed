//! Sign propagation into inactive space and level-set pruning.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::coord::Coord;
use crate::grid::SparseGrid;
use crate::leaf::{Leaf, LEAF_DIM, LEAF_LOG2, LEAF_VOLUME};

impl SparseGrid<f32> {
    /// Propagates the sign of active voxels into inactive space.
    ///
    /// Inactive voxels inside allocated leaves take `±background` with
    /// the sign of the nearest active voxel in the same leaf
    /// (multi-source 6-connected BFS, seeded in ascending offset order
    /// so ties resolve deterministically). Allocated leaves with no
    /// active voxels, and unallocated leaf regions inside the leaf
    /// bounding box, take the sign carried along a leaf-level x-scan;
    /// negative regions are recorded as tile values.
    pub fn signed_flood_fill(&mut self) {
        let background = self.background();

        for leaf in self.leaves_mut() {
            if !leaf.is_inactive() {
                flood_leaf(leaf, background);
            }
        }

        self.sweep_tiles(background);
    }

    /// Leaf-level x-scan that assigns signs to allocated-but-empty leaves
    /// and records `-background` tiles for interior unallocated regions.
    fn sweep_tiles(&mut self, background: f32) {
        let Some(bounds) = self.leaf_bounding_box() else {
            return;
        };

        // Group allocated leaves into x-rows of the leaf-key lattice.
        let mut rows: HashMap<(i32, i32), Vec<Coord>> = HashMap::new();
        for origin in self.leaf_origins() {
            rows.entry((origin.y, origin.z)).or_default().push(origin);
        }

        let mut negative_tiles: Vec<Coord> = Vec::new();
        let mut row_keys: Vec<(i32, i32)> = rows.keys().copied().collect();
        row_keys.sort_unstable();

        for (y, z) in row_keys {
            let row = &rows[&(y, z)];
            let mut sign = 1.0f32;
            let mut x = bounds.min.x;

            while x <= bounds.max.x {
                let key = Coord::new(x, y, z);
                if let Some(leaf) = self.leaf_mut(key) {
                    if leaf.is_inactive() {
                        // Empty leaf: fill with the carried sign.
                        leaf.fill(sign.signum() * background);
                    } else {
                        // Carry the sign of the max-corner voxel onward.
                        sign = leaf.value(LEAF_VOLUME - 1).signum();
                    }
                } else if sign < 0.0 && in_row_span(row, x) {
                    negative_tiles.push(key);
                }
                x += LEAF_DIM;
            }
        }

        for key in negative_tiles {
            self.set_tile(key, -background);
        }
    }

    /// Collapses all-inactive leaves into tiles.
    ///
    /// A leaf with no active voxels and uniformly negative values is
    /// replaced by a `-in_background` tile; one with uniformly
    /// non-negative values is simply dropped (it reads as the grid
    /// background). Mixed-sign inactive leaves are kept.
    pub fn prune_level_set(&mut self, in_background: f32) {
        let mut negative: Vec<Coord> = Vec::new();
        let mut droppable: Vec<Coord> = Vec::new();

        for origin in self.leaf_origins() {
            let leaf = self.leaf(origin).expect("origin from this grid");
            if !leaf.is_inactive() {
                continue;
            }
            if leaf.values().iter().all(|&v| v < 0.0) {
                negative.push(origin);
            } else if leaf.values().iter().all(|&v| v >= 0.0) {
                droppable.push(origin);
            }
        }

        for origin in droppable {
            self.remove_leaf(origin);
        }
        for origin in negative {
            self.remove_leaf(origin);
            self.set_tile(origin, -in_background);
        }
    }
}

/// True if `x` lies between the row's first and last allocated leaf.
fn in_row_span(row: &[Coord], x: i32) -> bool {
    row.iter().any(|o| o.x < x) && row.iter().any(|o| o.x > x)
}

/// Multi-source BFS from the active voxels of one leaf, assigning every
/// inactive voxel `±background` with the sign of its nearest seed.
fn flood_leaf(leaf: &mut Leaf<f32>, background: f32) {
    let mut queue: VecDeque<usize> = VecDeque::new();
    let mut visited = [false; LEAF_VOLUME];

    for offset in leaf.active_offsets() {
        visited[offset] = true;
        queue.push_back(offset);
    }

    while let Some(offset) = queue.pop_front() {
        let sign = leaf.value(offset).signum();
        for neighbor in leaf_face_neighbors(offset) {
            if let Some(n) = neighbor {
                if !visited[n] {
                    visited[n] = true;
                    leaf.set_value_only(n, sign * background);
                    queue.push_back(n);
                }
            }
        }
    }
}

/// In-leaf linear offsets of the face neighbors of `offset`, `None` where
/// the neighbor falls outside the leaf.
fn leaf_face_neighbors(offset: usize) -> [Option<usize>; 6] {
    let dim = LEAF_DIM as usize;
    let x = offset >> (2 * LEAF_LOG2);
    let y = (offset >> LEAF_LOG2) & (dim - 1);
    let z = offset & (dim - 1);

    [
        (x > 0).then(|| offset - (dim * dim)),
        (x + 1 < dim).then(|| offset + (dim * dim)),
        (y > 0).then(|| offset - dim),
        (y + 1 < dim).then(|| offset + dim),
        (z > 0).then(|| offset - 1),
        (z + 1 < dim).then(|| offset + 1),
    ]
}
