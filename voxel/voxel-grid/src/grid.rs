//! Sparse tiled voxel grid.

use hashbrown::HashMap;

use crate::coord::{Coord, CoordBounds};
use crate::leaf::{Leaf, LEAF_DIM};

/// A sparse, tiled 3D grid of values with per-voxel active state.
///
/// Storage is a map of dense [`Leaf`] tiles keyed by leaf origin, plus a
/// map of *tile values* for regions with no allocated leaf whose logical
/// value differs from the grid background. Any coordinate outside both
/// maps reads as the background.
///
/// The grid itself is single-threaded; parallel passes partition the
/// leaves and give each task exclusive access to its share (see
/// [`SparseGrid::leaves_mut`]).
///
/// # Example
///
/// ```
/// use voxel_grid::{Coord, SparseGrid};
///
/// let mut grid = SparseGrid::new(f32::MAX);
/// grid.set(Coord::new(1, 2, 3), -0.5);
///
/// assert_eq!(grid.probe(Coord::new(1, 2, 3)), Some(-0.5));
/// assert_eq!(grid.probe(Coord::new(0, 0, 0)), None);
/// assert_eq!(grid.get(Coord::new(100, 0, 0)), f32::MAX);
/// ```
#[derive(Debug, Clone)]
pub struct SparseGrid<T> {
    leaves: HashMap<Coord, Leaf<T>>,
    tiles: HashMap<Coord, T>,
    background: T,
}

impl<T: Copy> SparseGrid<T> {
    /// Creates an empty grid with the given background value.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::SparseGrid;
    ///
    /// let grid: SparseGrid<i32> = SparseGrid::new(-1);
    /// assert_eq!(grid.background(), -1);
    /// assert!(grid.is_empty());
    /// ```
    #[must_use]
    pub fn new(background: T) -> Self {
        Self {
            leaves: HashMap::new(),
            tiles: HashMap::new(),
            background,
        }
    }

    /// The value assumed at unallocated lattice sites.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::SparseGrid;
    ///
    /// let grid = SparseGrid::new(f32::MAX);
    /// assert_eq!(grid.background(), f32::MAX);
    /// ```
    #[inline]
    #[must_use]
    pub fn background(&self) -> T {
        self.background
    }

    /// Replaces the background value.
    ///
    /// Existing leaf values and tile entries are not rewritten.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(f32::MAX);
    /// grid.set_background(3.0);
    /// assert_eq!(grid.get(Coord::new(0, 0, 0)), 3.0);
    /// ```
    pub fn set_background(&mut self, background: T) {
        self.background = background;
    }

    /// Value at `coord`: the stored value if a leaf exists there, else
    /// the covering tile value, else the background.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// grid.set(Coord::new(1, 2, 3), 5.0);
    ///
    /// assert_eq!(grid.get(Coord::new(1, 2, 3)), 5.0);
    /// assert_eq!(grid.get(Coord::new(9, 9, 9)), 0.0);
    /// ```
    #[inline]
    #[must_use]
    pub fn get(&self, coord: Coord) -> T {
        let key = coord.leaf_origin();
        if let Some(leaf) = self.leaves.get(&key) {
            leaf.value(Leaf::<T>::offset_of(coord))
        } else {
            self.tiles.get(&key).copied().unwrap_or(self.background)
        }
    }

    /// Value at `coord` if the voxel is active, else `None`.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// grid.set(Coord::new(1, 2, 3), 5.0);
    ///
    /// assert_eq!(grid.probe(Coord::new(1, 2, 3)), Some(5.0));
    /// assert_eq!(grid.probe(Coord::new(1, 2, 4)), None);
    /// ```
    #[inline]
    #[must_use]
    pub fn probe(&self, coord: Coord) -> Option<T> {
        let leaf = self.leaves.get(&coord.leaf_origin())?;
        let offset = Leaf::<T>::offset_of(coord);
        leaf.is_active(offset).then(|| leaf.value(offset))
    }

    /// Whether the voxel at `coord` is active.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0i32);
    /// grid.set(Coord::new(4, 5, 6), 7);
    ///
    /// assert!(grid.is_active(Coord::new(4, 5, 6)));
    /// assert!(!grid.is_active(Coord::new(4, 5, 7)));
    /// ```
    #[inline]
    #[must_use]
    pub fn is_active(&self, coord: Coord) -> bool {
        self.leaves
            .get(&coord.leaf_origin())
            .is_some_and(|leaf| leaf.is_active(Leaf::<T>::offset_of(coord)))
    }

    /// Sets the value at `coord` and marks the voxel active, allocating
    /// the leaf if needed.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(f32::MAX);
    /// grid.set(Coord::new(4, 5, 6), -1.0);
    ///
    /// assert_eq!(grid.active_voxel_count(), 1);
    /// assert_eq!(grid.leaf_count(), 1);
    /// ```
    #[inline]
    pub fn set(&mut self, coord: Coord, value: T) {
        self.touch_leaf(coord)
            .set_value(Leaf::<T>::offset_of(coord), value);
    }

    /// Marks the voxel at `coord` inactive, storing `value` there.
    ///
    /// Does nothing if no leaf covers `coord`.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(f32::MAX);
    /// let c = Coord::new(0, 0, 0);
    /// grid.set(c, -1.0);
    ///
    /// grid.deactivate(c, f32::MAX);
    /// assert!(!grid.is_active(c));
    /// assert_eq!(grid.get(c), f32::MAX);
    /// ```
    pub fn deactivate(&mut self, coord: Coord, value: T) {
        if let Some(leaf) = self.leaves.get_mut(&coord.leaf_origin()) {
            leaf.deactivate(Leaf::<T>::offset_of(coord), value);
        }
    }

    /// Returns the leaf covering `coord`, allocating an all-inactive one
    /// (filled from the covering tile value or the background) if absent.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid: SparseGrid<f32> = SparseGrid::new(2.0);
    /// let leaf = grid.touch_leaf(Coord::new(10, 0, 0));
    ///
    /// assert_eq!(leaf.origin(), Coord::new(8, 0, 0));
    /// assert_eq!(leaf.value(0), 2.0);
    /// assert_eq!(grid.active_voxel_count(), 0);
    /// ```
    pub fn touch_leaf(&mut self, coord: Coord) -> &mut Leaf<T> {
        let key = coord.leaf_origin();
        let fill = self.tiles.get(&key).copied().unwrap_or(self.background);
        self.leaves
            .entry(key)
            .or_insert_with(|| Leaf::new(key, fill))
    }

    /// Whether a leaf covering `coord` is allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0i32);
    /// grid.set(Coord::new(3, 3, 3), 7);
    ///
    /// assert!(grid.has_leaf(Coord::new(7, 7, 7))); // same leaf
    /// assert!(!grid.has_leaf(Coord::new(8, 0, 0)));
    /// ```
    #[must_use]
    pub fn has_leaf(&self, coord: Coord) -> bool {
        self.leaves.contains_key(&coord.leaf_origin())
    }

    /// The leaf covering `coord`, if allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0i32);
    /// grid.set(Coord::new(0, 0, 0), 7);
    ///
    /// assert!(grid.leaf(Coord::new(5, 5, 5)).is_some());
    /// assert!(grid.leaf(Coord::new(-1, 0, 0)).is_none());
    /// ```
    #[must_use]
    pub fn leaf(&self, coord: Coord) -> Option<&Leaf<T>> {
        self.leaves.get(&coord.leaf_origin())
    }

    /// The leaf covering `coord`, mutable, if allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, Leaf, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// let c = Coord::new(1, 1, 1);
    /// grid.set(c, 1.0);
    ///
    /// let leaf = grid.leaf_mut(c).unwrap();
    /// leaf.set_value_only(Leaf::<f32>::offset_of(c), 2.0);
    /// assert_eq!(grid.probe(c), Some(2.0));
    /// ```
    pub fn leaf_mut(&mut self, coord: Coord) -> Option<&mut Leaf<T>> {
        self.leaves.get_mut(&coord.leaf_origin())
    }

    /// Iterates over all allocated leaves.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// grid.set(Coord::new(0, 0, 0), 1.0);
    /// grid.set(Coord::new(20, 0, 0), 1.0);
    ///
    /// assert_eq!(grid.leaves().count(), 2);
    /// ```
    pub fn leaves(&self) -> impl Iterator<Item = &Leaf<T>> {
        self.leaves.values()
    }

    /// Iterates mutably over all allocated leaves.
    ///
    /// Parallel passes collect these references and hand disjoint
    /// shares to their tasks.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// grid.set(Coord::new(0, 0, 0), 1.0);
    ///
    /// for leaf in grid.leaves_mut() {
    ///     for offset in leaf.active_offsets() {
    ///         let value = leaf.value(offset);
    ///         leaf.set_value_only(offset, value * 2.0);
    ///     }
    /// }
    ///
    /// assert_eq!(grid.probe(Coord::new(0, 0, 0)), Some(2.0));
    /// ```
    pub fn leaves_mut(&mut self) -> impl Iterator<Item = &mut Leaf<T>> {
        self.leaves.values_mut()
    }

    /// Origins of all allocated leaves, sorted for deterministic passes.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0i32);
    /// grid.set(Coord::new(12, 0, 0), 1);
    /// grid.set(Coord::new(-3, 0, 0), 1);
    ///
    /// assert_eq!(
    ///     grid.leaf_origins(),
    ///     vec![Coord::new(-8, 0, 0), Coord::new(8, 0, 0)],
    /// );
    /// ```
    #[must_use]
    pub fn leaf_origins(&self) -> Vec<Coord> {
        let mut origins: Vec<Coord> = self.leaves.keys().copied().collect();
        origins.sort_unstable();
        origins
    }

    /// Number of allocated leaves.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0i32);
    /// assert_eq!(grid.leaf_count(), 0);
    ///
    /// grid.set(Coord::new(0, 0, 0), 1);
    /// assert_eq!(grid.leaf_count(), 1);
    /// ```
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Total number of active voxels.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0i32);
    /// grid.set(Coord::new(0, 0, 0), 1);
    /// grid.set(Coord::new(0, 0, 1), 1);
    ///
    /// assert_eq!(grid.active_voxel_count(), 2);
    /// ```
    #[must_use]
    pub fn active_voxel_count(&self) -> u64 {
        self.leaves.values().map(|l| l.active_count() as u64).sum()
    }

    /// Bounding box of all allocated leaves (not just active voxels).
    ///
    /// Returns `None` for a grid with no leaves.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// assert!(grid.leaf_bounding_box().is_none());
    ///
    /// grid.set(Coord::new(1, 2, 3), 1.0);
    /// let bounds = grid.leaf_bounding_box().unwrap();
    /// assert_eq!(bounds.min, Coord::new(0, 0, 0));
    /// assert_eq!(bounds.max, Coord::new(7, 7, 7));
    /// ```
    #[must_use]
    pub fn leaf_bounding_box(&self) -> Option<CoordBounds> {
        let mut keys = self.leaves.keys();
        let first = *keys.next()?;
        let mut bounds = CoordBounds::new(first, first.offset_by(LEAF_DIM - 1, LEAF_DIM - 1, LEAF_DIM - 1));
        for &key in keys {
            bounds.expand_to_include(key);
            bounds.expand_to_include(key.offset_by(LEAF_DIM - 1, LEAF_DIM - 1, LEAF_DIM - 1));
        }
        Some(bounds)
    }

    /// Inserts every leaf of `other` (allocating missing ones) and ORs
    /// its active mask into this grid's, leaving this grid's values as
    /// they are.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut dist = SparseGrid::new(f32::MAX);
    /// dist.set(Coord::new(2, 2, 2), -1.0);
    ///
    /// let mut mask: SparseGrid<bool> = SparseGrid::new(false);
    /// mask.topology_union(&dist);
    ///
    /// assert!(mask.is_active(Coord::new(2, 2, 2)));
    /// // Activated voxels keep this grid's own (background) values.
    /// assert!(!mask.get(Coord::new(2, 2, 2)));
    /// ```
    pub fn topology_union<U: Copy>(&mut self, other: &SparseGrid<U>) {
        for src in other.leaves.values() {
            let dst = self.touch_leaf(src.origin());
            dst.union_mask(src.mask_words());
        }
    }

    /// Removes leaves with no active voxels, dropping their values.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// grid.touch_leaf(Coord::new(0, 0, 0));
    /// grid.set(Coord::new(8, 0, 0), 1.0);
    ///
    /// grid.prune_inactive();
    /// assert_eq!(grid.leaf_count(), 1);
    /// ```
    pub fn prune_inactive(&mut self) {
        self.leaves.retain(|_, leaf| !leaf.is_inactive());
    }

    /// Removes the leaf covering `coord`, if allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// grid.set(Coord::new(0, 0, 0), 1.0);
    ///
    /// grid.remove_leaf(Coord::new(5, 5, 5));
    /// assert!(grid.is_empty());
    /// ```
    pub fn remove_leaf(&mut self, coord: Coord) {
        self.leaves.remove(&coord.leaf_origin());
    }

    /// The tile value covering `coord`, if one is stored.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(3.0f32);
    /// assert_eq!(grid.tile(Coord::new(0, 0, 0)), None);
    ///
    /// grid.set_tile(Coord::new(0, 0, 0), -3.0);
    /// assert_eq!(grid.tile(Coord::new(7, 7, 7)), Some(-3.0));
    /// ```
    #[must_use]
    pub fn tile(&self, coord: Coord) -> Option<T> {
        self.tiles.get(&coord.leaf_origin()).copied()
    }

    /// Stores a tile value for the (unallocated) leaf region containing
    /// `coord`.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(3.0f32);
    /// grid.set_tile(Coord::new(9, 0, 0), -3.0);
    ///
    /// // Every coordinate in the covered region reads the tile value.
    /// assert_eq!(grid.get(Coord::new(10, 1, 2)), -3.0);
    /// assert_eq!(grid.get(Coord::new(0, 0, 0)), 3.0);
    /// ```
    pub fn set_tile(&mut self, coord: Coord, value: T) {
        self.tiles.insert(coord.leaf_origin(), value);
    }

    /// Applies `f` to every inactive leaf value and every tile entry.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(f32::MAX);
    /// grid.set(Coord::new(0, 0, 0), -0.5);
    ///
    /// grid.map_inactive(|v| if v < 0.0 { -2.0 } else { 4.0 });
    ///
    /// assert_eq!(grid.get(Coord::new(0, 0, 1)), 4.0);
    /// assert_eq!(grid.probe(Coord::new(0, 0, 0)), Some(-0.5));
    /// ```
    pub fn map_inactive(&mut self, f: impl Fn(T) -> T) {
        for leaf in self.leaves.values_mut() {
            for offset in 0..crate::leaf::LEAF_VOLUME {
                if !leaf.is_active(offset) {
                    leaf.set_value_only(offset, f(leaf.value(offset)));
                }
            }
        }
        for value in self.tiles.values_mut() {
            *value = f(*value);
        }
    }

    /// Drops all leaves and tiles.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0.0f32);
    /// grid.set(Coord::new(0, 0, 0), 1.0);
    ///
    /// grid.clear();
    /// assert!(grid.is_empty());
    /// assert_eq!(grid.active_voxel_count(), 0);
    /// ```
    pub fn clear(&mut self) {
        self.leaves.clear();
        self.tiles.clear();
    }

    /// Whether the grid has no allocated leaves.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_grid::{Coord, SparseGrid};
    ///
    /// let mut grid = SparseGrid::new(0i32);
    /// assert!(grid.is_empty());
    ///
    /// grid.set(Coord::new(0, 0, 0), 1);
    /// assert!(!grid.is_empty());
    /// ```
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}
