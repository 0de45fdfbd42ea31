use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use nalgebra::Vector3;
use rayon::prelude::*;

/// Bounded uniform grid over an axis-aligned domain.
///
/// Cells hold at most `max_per_cell` particle indices; slots are claimed
/// with an atomic increment so insertion can run in parallel. Insertions
/// into a full cell and neighbour lists cut at `max_neighbours` are
/// dropped, but counted so the caller can surface the saturation.
pub struct FixedGrid {
    dims: [isize; 3],
    cell_size: f32,
    search_radius_sq: f32,
    max_per_cell: usize,
    max_neighbours: usize,

    counts: Vec<AtomicU32>,
    slots: Vec<AtomicU32>,

    cell_overflows: AtomicUsize,
    neighbour_truncations: AtomicUsize,
}

impl FixedGrid {
    pub fn new(
        extents: Vector3<f32>,
        cell_size: f32,
        search_radius: f32,
        max_per_cell: usize,
        max_neighbours: usize,
    ) -> FixedGrid {
        debug_assert!(cell_size >= search_radius, "a 1-ring scan needs cell_size >= search_radius");

        let dim = |extent: f32| (extent / cell_size).floor() as isize + 1;
        let dims = [dim(extents.x), dim(extents.y), dim(extents.z)];
        let cell_count = (dims[0] * dims[1] * dims[2]) as usize;

        FixedGrid {
            dims,
            cell_size,
            search_radius_sq: search_radius.powi(2),
            max_per_cell,
            max_neighbours,

            counts: (0..cell_count).map(|_| AtomicU32::new(0)).collect(),
            slots: (0..cell_count * max_per_cell).map(|_| AtomicU32::new(0)).collect(),

            cell_overflows: AtomicUsize::new(0),
            neighbour_truncations: AtomicUsize::new(0),
        }
    }

    fn cell_of(&self, position: Vector3<f32>) -> [isize; 3] {
        let coord = |v: f32| (v / self.cell_size).floor() as isize;

        [coord(position.x), coord(position.y), coord(position.z)]
    }

    fn cell_index(&self, cell: [isize; 3]) -> Option<usize> {
        for axis in 0..3 {
            if cell[axis] < 0 || cell[axis] >= self.dims[axis] {
                return None;
            }
        }

        Some(((cell[0] * self.dims[1] + cell[1]) * self.dims[2] + cell[2]) as usize)
    }

    pub fn clear(&self) {
        self.counts.par_iter().for_each(|c| c.store(0, Ordering::Relaxed));
        self.cell_overflows.store(0, Ordering::Relaxed);
        self.neighbour_truncations.store(0, Ordering::Relaxed);
    }

    pub fn insert(&self, i: usize, position: Vector3<f32>) {
        let cell = match self.cell_index(self.cell_of(position)) {
            Some(cell) => cell,
            None => {
                self.cell_overflows.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let slot = self.counts[cell].fetch_add(1, Ordering::Relaxed) as usize;

        if slot < self.max_per_cell {
            self.slots[cell * self.max_per_cell + slot].store(i as u32, Ordering::Relaxed);
        } else {
            self.cell_overflows.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn build(&self, positions: &[Vector3<f32>]) {
        self.clear();
        positions.par_iter().enumerate().for_each(|(i, &p)| self.insert(i, p));
    }

    pub fn find_neighbours(&self, i: usize, positions: &[Vector3<f32>], position: Vector3<f32>) -> Vec<usize> {
        let cell = self.cell_of(position);
        let mut result = Vec::with_capacity(self.max_neighbours);

        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let index = match self.cell_index([cell[0] + dx, cell[1] + dy, cell[2] + dz]) {
                        Some(index) => index,
                        None => continue,
                    };

                    let count = (self.counts[index].load(Ordering::Relaxed) as usize).min(self.max_per_cell);

                    for slot in 0..count {
                        let j = self.slots[index * self.max_per_cell + slot].load(Ordering::Relaxed) as usize;

                        if i != j && (position - positions[j]).norm_squared() < self.search_radius_sq {
                            if result.len() == self.max_neighbours {
                                self.neighbour_truncations.fetch_add(1, Ordering::Relaxed);
                                return result;
                            }

                            result.push(j);
                        }
                    }
                }
            }
        }

        result
    }

    pub fn find_all_neighbours(&self, positions: &[Vector3<f32>]) -> Vec<Vec<usize>> {
        positions.par_iter().enumerate().map(|(i, p)| {
            self.find_neighbours(i, positions, *p)
        }).collect()
    }

    pub fn cell_overflows(&self) -> usize {
        self.cell_overflows.load(Ordering::Relaxed)
    }

    pub fn neighbour_truncations(&self) -> usize {
        self.neighbour_truncations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(max_per_cell: usize, max_neighbours: usize) -> FixedGrid {
        FixedGrid::new(Vector3::new(10.0, 10.0, 10.0), 1.0, 1.0, max_per_cell, max_neighbours)
    }

    #[test]
    fn close_pair_is_symmetric() {
        let grid = grid(16, 16);
        let positions = vec![
            Vector3::new(5.0, 5.0, 5.0),
            Vector3::new(5.5, 5.0, 5.0),
            Vector3::new(9.5, 9.5, 9.5),
        ];

        grid.build(&positions);

        let lists = grid.find_all_neighbours(&positions);
        assert_eq!(lists[0], vec![1]);
        assert_eq!(lists[1], vec![0]);
        assert!(lists[2].is_empty());
    }

    #[test]
    fn self_is_excluded() {
        let grid = grid(16, 16);
        let positions = vec![Vector3::new(5.0, 5.0, 5.0)];

        grid.build(&positions);

        assert!(grid.find_neighbours(0, &positions, positions[0]).is_empty());
    }

    #[test]
    fn pair_across_cell_border_is_found() {
        let grid = grid(16, 16);
        let positions = vec![
            Vector3::new(3.95, 5.0, 5.0),
            Vector3::new(4.05, 5.0, 5.0),
        ];

        grid.build(&positions);

        assert_eq!(grid.find_neighbours(0, &positions, positions[0]), vec![1]);
    }

    #[test]
    fn cell_overflow_is_counted() {
        let grid = grid(2, 16);
        let positions = vec![Vector3::new(5.5, 5.5, 5.5); 5];

        grid.build(&positions);

        assert_eq!(grid.cell_overflows(), 3);

        // the surviving slots still answer queries
        let found = grid.find_neighbours(0, &positions, positions[0]);
        assert!(found.len() <= 2);

        grid.clear();
        assert_eq!(grid.cell_overflows(), 0);
    }

    #[test]
    fn neighbour_list_is_truncated_at_capacity() {
        let grid = grid(16, 1);
        let positions = vec![
            Vector3::new(5.0, 5.0, 5.0),
            Vector3::new(5.1, 5.0, 5.0),
            Vector3::new(5.0, 5.1, 5.0),
            Vector3::new(5.0, 5.0, 5.1),
        ];

        grid.build(&positions);

        assert_eq!(grid.find_neighbours(0, &positions, positions[0]).len(), 1);
        assert!(grid.neighbour_truncations() >= 1);
    }

    #[test]
    fn out_of_domain_insert_is_dropped() {
        let grid = grid(16, 16);

        grid.clear();
        grid.insert(0, Vector3::new(-1.0, 5.0, 5.0));

        assert_eq!(grid.cell_overflows(), 1);
    }
}
