//! Spatial hash grid for pickup and proximity queries
//!
//! Divides the world into square cells keyed by integer coordinates. Queries
//! visit only the cells overlapping the query circle's bounding box.

use rustc_hash::FxHashMap;

use crate::util::vec2::Vec2;

/// Grid cell key - (x, y) cell coordinates
pub type GridCell = (i32, i32);

const GRID_INITIAL_CAPACITY: usize = 256;
const CELL_INITIAL_CAPACITY: usize = 8;

/// Hash grid of small copyable handles with their positions
#[derive(Debug, Clone)]
pub struct SpatialGrid<T: Copy> {
    cell_size: f32,
    inv_cell_size: f32,
    cells: FxHashMap<GridCell, Vec<(T, Vec2)>>,
    len: usize,
}

impl<T: Copy> SpatialGrid<T> {
    /// Cell size should be at least the typical query radius
    pub fn new(cell_size: f32) -> Self {
        let mut cells = FxHashMap::default();
        cells.reserve(GRID_INITIAL_CAPACITY);
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells,
            len: 0,
        }
    }

    /// Remove all entries but keep allocated cells
    pub fn clear(&mut self) {
        for cell in self.cells.values_mut() {
            cell.clear();
        }
        self.len = 0;
    }

    #[inline]
    fn cell_of(&self, position: Vec2) -> GridCell {
        (
            (position.x * self.inv_cell_size).floor() as i32,
            (position.y * self.inv_cell_size).floor() as i32,
        )
    }

    pub fn insert(&mut self, handle: T, position: Vec2) {
        let key = self.cell_of(position);
        self.cells
            .entry(key)
            .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
            .push((handle, position));
        self.len += 1;
    }

    /// Rebuild from scratch
    pub fn rebuild(&mut self, entries: impl Iterator<Item = (T, Vec2)>) {
        self.clear();
        for (handle, position) in entries {
            self.insert(handle, position);
        }
    }

    /// Handles whose position lies strictly within `radius` of `center`
    pub fn query_radius(&self, center: Vec2, radius: f32) -> impl Iterator<Item = T> + '_ {
        let (min_x, min_y) = self.cell_of(center - Vec2::new(radius, radius));
        let (max_x, max_y) = self.cell_of(center + Vec2::new(radius, radius));
        let radius_sq = radius * radius;

        (min_x..=max_x).flat_map(move |cx| {
            (min_y..=max_y).flat_map(move |cy| {
                self.cells
                    .get(&(cx, cy))
                    .into_iter()
                    .flat_map(|cell| cell.iter())
                    .filter(move |(_, pos)| pos.distance_sq_to(center) < radius_sq)
                    .map(|(handle, _)| *handle)
            })
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }
}
