use std::ops::Range;

use float_ord::FloatOrd;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use crate::math::{GridCell, MortonIndex64, AABB};

/// Deepest level of an [`Octree`]
pub const MAX_LEVEL: u8 = MortonIndex64::LEVELS as u8;

/// A point returned by a spatial query, identified by its index within the indexed positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub squared_distance: f64,
}

/// Result of a k-nearest-neighbor query
#[derive(Debug, Clone, Default)]
pub struct KnnResult {
    /// The nearest neighbors sorted by ascending distance
    pub neighbors: Vec<Neighbor>,
    /// Number of candidate points that were gathered from the visited cells before selecting the nearest
    /// neighbors. This measures how well the query level matches the local point density
    pub candidates: usize,
}

/// Linear octree over a set of positions. The positions are sorted by their 63-bit Morton code within the
/// cubic bounds of the point set, so that every octree cell maps to a contiguous range of points. Cells are
/// never materialized, any level between 0 and [`MAX_LEVEL`] can be queried.
#[derive(Debug, Clone)]
pub struct Octree {
    bounds: AABB<f64>,
    codes: Vec<u64>,
    indices: Vec<usize>,
    positions: Vec<Vector3<f64>>,
    cells_per_level: [usize; MAX_LEVEL as usize + 1],
}

impl Octree {
    /// Builds a new octree over `positions`. Query results refer to points by their index within `positions`
    pub fn build(positions: &[Vector3<f64>]) -> Self {
        let bounds = AABB::from_positions(positions)
            .unwrap_or_else(|| {
                AABB::from_min_max_unchecked(Point3::origin(), Point3::new(1.0, 1.0, 1.0))
            })
            .cubic();

        let mut keyed = positions
            .par_iter()
            .enumerate()
            .map(|(index, position)| {
                let code = MortonIndex64::from_point_in_bounds(&Point3::from(*position), &bounds);
                (code.index(), index)
            })
            .collect::<Vec<_>>();
        keyed.par_sort_unstable();

        let codes = keyed.iter().map(|(code, _)| *code).collect::<Vec<_>>();
        let indices = keyed.iter().map(|(_, index)| *index).collect::<Vec<_>>();
        let sorted_positions = indices.par_iter().map(|&index| positions[index]).collect();
        let cells_per_level = Self::count_cells(&codes);

        Self {
            bounds,
            codes,
            indices,
            positions: sorted_positions,
            cells_per_level,
        }
    }

    /// Two consecutive codes fall into different cells from the level of their highest differing bit downwards
    fn count_cells(sorted_codes: &[u64]) -> [usize; MAX_LEVEL as usize + 1] {
        let mut first_split_counts = [0_usize; MAX_LEVEL as usize + 1];
        for pair in sorted_codes.windows(2) {
            let diff = pair[0] ^ pair[1];
            if diff == 0 {
                continue;
            }
            let highest_bit = 63 - diff.leading_zeros() as usize;
            let level = MortonIndex64::LEVELS - highest_bit / 3;
            first_split_counts[level] += 1;
        }

        let mut cells = [0_usize; MAX_LEVEL as usize + 1];
        if sorted_codes.is_empty() {
            return cells;
        }
        let mut splits = 0;
        for level in 0..=MAX_LEVEL as usize {
            splits += first_split_counts[level];
            cells[level] = 1 + splits;
        }
        cells
    }

    /// Returns the number of indexed points
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Returns the cubic bounds of this octree
    pub fn bounds(&self) -> &AABB<f64> {
        &self.bounds
    }

    /// Returns the edge length of a cell at the given `level`
    pub fn cell_edge(&self, level: u8) -> f64 {
        self.bounds.extent().x / (1_u64 << level) as f64
    }

    /// Returns the number of non-empty cells at the given `level`
    pub fn non_empty_cells(&self, level: u8) -> usize {
        self.cells_per_level[level as usize]
    }

    /// Returns the Morton code of `position` within the bounds of this octree. Positions outside of the bounds are
    /// clamped to the nearest boundary cell
    pub fn morton_code(&self, position: &Vector3<f64>) -> u64 {
        MortonIndex64::from_point_in_bounds(&Point3::from(*position), &self.bounds).index()
    }

    /// Returns the indices of all points in ascending Morton order
    pub fn indices_in_morton_order(&self) -> &[usize] {
        &self.indices
    }

    /// Returns the deepest level at which the non-empty cells hold on average at least `target` points. Never returns
    /// a level below 1 unless the octree is empty
    /// ```
    /// # use masc_core::index::Octree;
    /// # use masc_core::nalgebra::Vector3;
    /// let positions = (0..64)
    ///     .map(|i| Vector3::new((i % 4) as f64, ((i / 4) % 4) as f64, (i / 16) as f64))
    ///     .collect::<Vec<_>>();
    /// let octree = Octree::build(&positions);
    /// assert_eq!(1, octree.level_for_population(8.0));
    /// ```
    pub fn level_for_population(&self, target: f64) -> u8 {
        if self.is_empty() {
            return 0;
        }
        let mut best = 1;
        for level in 1..=MAX_LEVEL {
            let mean = self.len() as f64 / self.non_empty_cells(level) as f64;
            if mean >= target {
                best = level;
            } else {
                break;
            }
        }
        best
    }

    /// Returns the deepest level whose cells are at least `radius` wide, so that a sphere of this radius
    /// overlaps at most 3 cells along each axis
    pub fn level_for_radius(&self, radius: f64) -> u8 {
        if radius.is_nan() || radius <= 0.0 {
            return MAX_LEVEL;
        }
        let mut level = 0;
        while level < MAX_LEVEL && self.cell_edge(level + 1) >= radius {
            level += 1;
        }
        level
    }

    /// Returns the number of points in the cell at `level` that contains `position`
    pub fn cell_population(&self, position: &Vector3<f64>, level: u8) -> usize {
        let cell = self.grid_cell(position, level);
        self.cell_range(MortonIndex64::cell_code(&cell, level), level)
            .len()
    }

    fn grid_cell(&self, position: &Vector3<f64>, level: u8) -> GridCell {
        MortonIndex64::grid_coordinates(&Point3::from(*position), &self.bounds, level)
    }

    fn cell_range(&self, cell_code: u64, level: u8) -> Range<usize> {
        let shift = 3 * (MortonIndex64::LEVELS - level as usize);
        let start = self.codes.partition_point(|code| (code >> shift) < cell_code);
        let end = start + self.codes[start..].partition_point(|code| (code >> shift) <= cell_code);
        start..end
    }

    fn gather_cell(
        &self,
        cell: &GridCell,
        level: u8,
        query: &Vector3<f64>,
        out: &mut Vec<Neighbor>,
    ) {
        let cells_per_axis = 1_i64 << level;
        if cell.iter().any(|&c| c < 0 || c >= cells_per_axis) {
            return;
        }
        for slot in self.cell_range(MortonIndex64::cell_code(cell, level), level) {
            out.push(Neighbor {
                index: self.indices[slot],
                squared_distance: (self.positions[slot] - query).norm_squared(),
            });
        }
    }

    /// Distance from `query` to the closest face of the block of cells around `center` with Chebyshev radius
    /// `ring`. Faces on the outside of the octree bounds don't limit the distance
    fn covered_distance(
        &self,
        query: &Vector3<f64>,
        center: &GridCell,
        ring: i64,
        level: u8,
    ) -> f64 {
        let edge = self.cell_edge(level);
        let last_cell = (1_i64 << level) - 1;
        let mut covered = f64::INFINITY;
        for axis in 0..3 {
            if center[axis] - ring > 0 {
                let lower = self.bounds.min()[axis] + (center[axis] - ring) as f64 * edge;
                covered = covered.min(query[axis] - lower);
            }
            if center[axis] + ring < last_cell {
                let upper = self.bounds.min()[axis] + (center[axis] + ring + 1) as f64 * edge;
                covered = covered.min(upper - query[axis]);
            }
        }
        covered.max(0.0)
    }

    fn gather_ring(
        &self,
        center: &GridCell,
        ring: i64,
        level: u8,
        query: &Vector3<f64>,
        out: &mut Vec<Neighbor>,
    ) {
        if ring == 0 {
            self.gather_cell(center, level, query, out);
            return;
        }
        for dx in -ring..=ring {
            for dy in -ring..=ring {
                let on_shell = dx.abs() == ring || dy.abs() == ring;
                let mut visit = |dz: i64| {
                    let cell = [center[0] + dx, center[1] + dy, center[2] + dz];
                    self.gather_cell(&cell, level, query, out);
                };
                if on_shell {
                    (-ring..=ring).for_each(&mut visit);
                } else {
                    visit(-ring);
                    visit(ring);
                }
            }
        }
    }

    fn gather_all(&self, query: &Vector3<f64>, out: &mut Vec<Neighbor>) {
        out.clear();
        out.extend(
            self.indices
                .iter()
                .zip(self.positions.iter())
                .map(|(&index, position)| Neighbor {
                    index,
                    squared_distance: (position - query).norm_squared(),
                }),
        );
    }

    /// Finds the `k` nearest neighbors of `query` that lie within `max_radius` (pass `f64::INFINITY` for an
    /// unbounded search). The search starts in the cell at `level` containing `query` and expands ring by ring
    /// over the neighboring cells until the `k` nearest points are guaranteed to be found, so the result does
    /// not depend on `level`, only the amount of work does. The neighbors are written to `out` sorted by
    /// ascending distance, the number of gathered candidate points is returned
    pub fn knn_into(
        &self,
        query: &Vector3<f64>,
        k: usize,
        level: u8,
        max_radius: f64,
        out: &mut Vec<Neighbor>,
    ) -> usize {
        out.clear();
        if k == 0 || self.is_empty() {
            return 0;
        }
        let level = level.min(MAX_LEVEL);
        let center = self.grid_cell(query, level);
        let cells_per_axis = 1_i64 << level;
        let max_ring = center
            .iter()
            .map(|&c| c.max(cells_per_axis - 1 - c))
            .max()
            .unwrap_or(0);
        let max_squared_radius = max_radius * max_radius;

        let mut ring = 0;
        loop {
            let ring_width = (2 * ring + 1) as usize;
            if ring_width.saturating_pow(3) > 8 * self.len() {
                // The rings have become far larger than the point set
                self.gather_all(query, out);
                break;
            }
            self.gather_ring(&center, ring, level, query, out);

            if ring >= max_ring {
                break;
            }
            // Unvisited points are at least `covered` away, so points at exactly `max_radius` may still be missing
            let covered = self.covered_distance(query, &center, ring, level);
            if covered > max_radius {
                break;
            }
            let covered_squared = covered * covered;
            let found = out
                .iter()
                .filter(|neighbor| neighbor.squared_distance < covered_squared)
                .count();
            if found >= k {
                break;
            }
            ring += 1;
        }

        let candidates = out.len();
        out.retain(|neighbor| neighbor.squared_distance <= max_squared_radius);
        if out.len() > k {
            out.select_nth_unstable_by_key(k - 1, |neighbor| {
                (FloatOrd(neighbor.squared_distance), neighbor.index)
            });
            out.truncate(k);
        }
        out.sort_unstable_by_key(|neighbor| (FloatOrd(neighbor.squared_distance), neighbor.index));
        candidates
    }

    /// Like [`knn_into`](Self::knn_into), but allocates the result
    pub fn knn(&self, query: &Vector3<f64>, k: usize, level: u8, max_radius: f64) -> KnnResult {
        let mut neighbors = Vec::with_capacity(k);
        let candidates = self.knn_into(query, k, level, max_radius, &mut neighbors);
        KnnResult {
            neighbors,
            candidates,
        }
    }

    /// Finds all points within `radius` around `query` by scanning the cells at `level` that overlap the
    /// bounding box of the search sphere. The neighbors are written to `out` sorted by ascending distance
    pub fn radius_search_into(
        &self,
        query: &Vector3<f64>,
        radius: f64,
        level: u8,
        out: &mut Vec<Neighbor>,
    ) {
        out.clear();
        if self.is_empty() || radius.is_nan() || radius < 0.0 {
            return;
        }
        let level = level.min(MAX_LEVEL);
        let offset = Vector3::new(radius, radius, radius);
        let low = self.grid_cell(&(query - offset), level);
        let high = self.grid_cell(&(query + offset), level);
        let squared_radius = radius * radius;

        let mut candidates = Vec::new();
        for x in low[0]..=high[0] {
            for y in low[1]..=high[1] {
                for z in low[2]..=high[2] {
                    candidates.clear();
                    self.gather_cell(&[x, y, z], level, query, &mut candidates);
                    out.extend(
                        candidates
                            .iter()
                            .filter(|neighbor| neighbor.squared_distance <= squared_radius),
                    );
                }
            }
        }
        out.sort_unstable_by_key(|neighbor| (FloatOrd(neighbor.squared_distance), neighbor.index));
    }

    /// Like [`radius_search_into`](Self::radius_search_into), but allocates the result
    pub fn radius_search(&self, query: &Vector3<f64>, radius: f64, level: u8) -> Vec<Neighbor> {
        let mut neighbors = Vec::new();
        self.radius_search_into(query, radius, level, &mut neighbors);
        neighbors
    }
}
