//! Bitset hash grid broad-phase over physical entity bounding boxes
//!
//! The world is divided into coarse cells; each occupied cell holds a packed
//! 16,384-bit set of the entity ids whose boxes overlap it. Region queries
//! union cell bitsets word by word, and collision candidates come from
//! pairing occupants cell by cell. The grid is a filter, not an oracle: it
//! may return false positives but never false negatives, so callers finish
//! with exact AABB tests.
//!
//! The grid is rebuilt from scratch every PRETICK from the registry's live
//! physical entities.

use bitvec::prelude::*;
use hashbrown::HashMap;
use rustc_hash::FxHashSet;

use crate::game::entity::{Aabb, EntityId, MAX_ENTITIES};

/// Default cell size in world units.
/// Completeness does not depend on this (boxes are marked into every cell
/// they overlap); it only trades bucket occupancy against cell count.
pub const DEFAULT_CELL_SIZE: f32 = 128.0;

/// Initial capacity for the cell map (number of expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 256;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

/// Packed bitset with one bit per entity slot
pub type EntityBits = BitArr!(for MAX_ENTITIES, in u64);

/// Broad-phase index, valid for one tick between `pre_tick` and `post_tick`
pub struct HashGrid {
    cell_size: f32,
    inv_cell_size: f32,
    /// Bitset of occupant ids per cell; cells stay allocated across ticks
    cells: HashMap<CellKey, Box<EntityBits>>,
    /// Reused across pair enumerations to dedup pairs seen in several cells
    pair_seen: FxHashSet<(EntityId, EntityId)>,
    /// Reused per-cell id extraction buffer
    ids_scratch: Vec<EntityId>,
}

impl HashGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            pair_seen: FxHashSet::default(),
            ids_scratch: Vec::with_capacity(64),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Begin a tick: drop the previous tick's contents
    pub fn pre_tick(&mut self) {
        self.clear_bits();
    }

    /// End a tick: contents are stale once the registry may mutate again
    pub fn post_tick(&mut self) {
        self.clear_bits();
    }

    fn clear_bits(&mut self) {
        for bits in self.cells.values_mut() {
            bits.fill(false);
        }
    }

    /// Inclusive cell coordinate range covered by a box
    #[inline]
    fn cell_range(&self, aabb: &Aabb) -> (i32, i32, i32, i32) {
        (
            (aabb.min.x * self.inv_cell_size).floor() as i32,
            (aabb.min.y * self.inv_cell_size).floor() as i32,
            (aabb.max.x * self.inv_cell_size).floor() as i32,
            (aabb.max.y * self.inv_cell_size).floor() as i32,
        )
    }

    /// Marks the id into every cell the box overlaps
    pub fn insert(&mut self, id: EntityId, aabb: &Aabb) {
        let (min_x, min_y, max_x, max_y) = self.cell_range(aabb);
        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                self.cells
                    .entry((cx, cy))
                    .or_insert_with(|| Box::new(EntityBits::ZERO))
                    .set(id as usize, true);
            }
        }
    }

    /// Union of cell bitsets overlapping the query rectangle.
    ///
    /// Candidates only: the caller must keep exact AABB filtering. Ids that
    /// no longer resolve to a live entity must be skipped, never
    /// dereferenced.
    pub fn retrieve(&self, aabb: &Aabb) -> Box<EntityBits> {
        let mut acc = Box::new(EntityBits::ZERO);
        let (min_x, min_y, max_x, max_y) = self.cell_range(aabb);
        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                if let Some(bits) = self.cells.get(&(cx, cy)) {
                    for (dst, src) in acc
                        .as_raw_mut_slice()
                        .iter_mut()
                        .zip(bits.as_raw_slice().iter())
                    {
                        *dst |= *src;
                    }
                }
            }
        }
        acc
    }

    /// Enumerates each unordered candidate pair exactly once.
    ///
    /// No self-pairs, no (a, b)/(b, a) duplicates; a pair co-occupying
    /// several cells is reported from the first cell encountered. Exact
    /// overlap and response belong to the callback.
    pub fn for_each_collision_pair(&mut self, mut callback: impl FnMut(EntityId, EntityId)) {
        self.pair_seen.clear();

        for bits in self.cells.values() {
            self.ids_scratch.clear();
            self.ids_scratch
                .extend(bits.iter_ones().map(|id| id as EntityId));

            // iter_ones yields ascending ids, so (a, b) is already normalized
            for i in 0..self.ids_scratch.len() {
                for j in (i + 1)..self.ids_scratch.len() {
                    let pair = (self.ids_scratch[i], self.ids_scratch[j]);
                    if self.pair_seen.insert(pair) {
                        callback(pair.0, pair.1);
                    }
                }
            }
        }
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> HashGridStats {
        let occupied_cells = self.cells.values().filter(|bits| bits.any()).count();
        let total_markings: usize = self.cells.values().map(|bits| bits.count_ones()).sum();
        let max_per_cell = self
            .cells
            .values()
            .map(|bits| bits.count_ones())
            .max()
            .unwrap_or(0);

        HashGridStats {
            occupied_cells,
            total_markings,
            max_per_cell,
        }
    }
}

impl Default for HashGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

/// Statistics about the broad-phase grid
#[derive(Debug, Clone)]
pub struct HashGridStats {
    pub occupied_cells: usize,
    /// Sum of per-cell occupancy; one box can mark several cells
    pub total_markings: usize,
    pub max_per_cell: usize,
}
