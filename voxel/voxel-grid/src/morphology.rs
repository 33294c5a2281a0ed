//! Topological morphology on boolean grids.

use crate::coord::Coord;
use crate::grid::SparseGrid;
use crate::leaf::Leaf;

impl SparseGrid<bool> {
    /// Dilates the active set by one voxel along the 6 face directions,
    /// allocating leaves as needed.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut mask = SparseGrid::new(false);
    /// mask.set(Coord::new(0, 0, 0), true);
    /// mask.dilate_active();
    /// assert_eq!(mask.active_voxel_count(), 7);
    /// ```
    pub fn dilate_active(&mut self) {
        let mut seeds: Vec<Coord> = Vec::new();
        for leaf in self.leaves() {
            seeds.extend(leaf.iter_active().map(|(offset, _)| leaf.coord_of(offset)));
        }

        for seed in seeds {
            for n in 0..6 {
                let c = seed.neighbor(n);
                if !self.is_active(c) {
                    self.set(c, true);
                }
            }
        }
    }

    /// Activates the voxel at `coord`.
    pub fn set_active(&mut self, coord: Coord) {
        self.touch_leaf(coord)
            .set_value(Leaf::<bool>::offset_of(coord), true);
    }
}
