use nalgebra::{Point3, Vector3};

use super::{expand_bits_by_3, AABB};

/// Integer cell coordinates within the regular grid of one octree level
pub type GridCell = [i64; 3];

/// 64-bit 3D Morton index
#[derive(Debug, PartialEq, Eq, Copy, Clone, PartialOrd, Ord, Hash, Default)]
pub struct MortonIndex64 {
    index: u64,
}

impl MortonIndex64 {
    pub const LEVELS: usize = 21;

    /// Creates a `MortonIndex64` from the given raw index
    pub fn from_raw(index: u64) -> Self {
        Self { index }
    }

    /// Creates a `MortonIndex64` from integer grid coordinates at the deepest level. Coordinates are truncated
    /// to 21 bits. Octant order is ZYX little-endian (MSB encodes Z, LSB encodes X)
    ///
    /// Example:
    /// ```
    /// # use masc_core::math::*;
    /// assert_eq!(0b111, MortonIndex64::from_grid(1, 1, 1).index());
    /// assert_eq!(0b100, MortonIndex64::from_grid(0, 0, 1).index());
    /// ```
    pub fn from_grid(x: u64, y: u64, z: u64) -> Self {
        let index = (expand_bits_by_3(z) << 2) | (expand_bits_by_3(y) << 1) | expand_bits_by_3(x);
        Self { index }
    }

    /// Computes a `MortonIndex64` for the given `point` within `bounds`. `bounds` is expected to be a cube, points
    /// outside of `bounds` are clamped to the nearest boundary cell
    pub fn from_point_in_bounds(point: &Point3<f64>, bounds: &AABB<f64>) -> Self {
        let [x, y, z] = Self::grid_coordinates(point, bounds, Self::LEVELS as u8);
        Self::from_grid(x as u64, y as u64, z as u64)
    }

    /// Computes the cell coordinates of `point` in the grid of the given octree `level` spanned by `bounds`.
    /// Coordinates are clamped to `[0; 2^level)`
    ///
    /// Example:
    /// ```
    /// # use masc_core::math::*;
    /// # use masc_core::nalgebra::Point3;
    /// let bounds = AABB::from_min_max_unchecked(Point3::new(0.0, 0.0, 0.0), Point3::new(8.0, 8.0, 8.0));
    /// assert_eq!([1, 0, 3], MortonIndex64::grid_coordinates(&Point3::new(2.5, 0.0, 9.0), &bounds, 2));
    /// ```
    pub fn grid_coordinates(point: &Point3<f64>, bounds: &AABB<f64>, level: u8) -> GridCell {
        let cells_per_axis = (1_u64 << level) as f64;
        let normalized_extent = cells_per_axis / bounds.extent().x;
        let normalized_point: Vector3<f64> = (point - bounds.min()) * normalized_extent;

        let max_index = (1_i64 << level) - 1;
        let to_cell = |v: f64| -> i64 {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                i64::min(v as i64, max_index)
            }
        };
        [
            to_cell(normalized_point.x),
            to_cell(normalized_point.y),
            to_cell(normalized_point.z),
        ]
    }

    /// Returns the raw value of the associated `MortonIndex64`
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the code of the cell at `level` that contains this index. Level 0 is the root cell
    ///
    /// Example:
    /// ```
    /// # use masc_core::math::*;
    /// let morton_index = MortonIndex64::from_grid(3, 0, 0);
    /// assert_eq!(0, morton_index.cell_at_level(0));
    /// assert_eq!(morton_index.index(), morton_index.cell_at_level(21));
    /// ```
    pub fn cell_at_level(&self, level: u8) -> u64 {
        if level as usize > Self::LEVELS {
            panic!(
                "MortonIndex64::cell_at_level: Level {} is out of bounds!",
                level
            );
        }
        let shift = 3 * (Self::LEVELS - level as usize);
        if shift >= 64 {
            0
        } else {
            self.index >> shift
        }
    }

    /// Returns the code of the cell with the given grid coordinates at `level`, i.e. the value that
    /// `cell_at_level(level)` returns for every point inside that cell
    pub fn cell_code(cell: &GridCell, level: u8) -> u64 {
        let shift = Self::LEVELS - level as usize;
        Self::from_grid(
            (cell[0] as u64) << shift,
            (cell[1] as u64) << shift,
            (cell[2] as u64) << shift,
        )
        .cell_at_level(level)
    }
}
