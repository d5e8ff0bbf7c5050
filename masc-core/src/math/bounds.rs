use nalgebra::{ClosedSub, Point3, Scalar, Vector3};

use super::MinMax;

/// 3D axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AABB<T: Scalar + PartialOrd> {
    min: Point3<T>,
    max: Point3<T>,
}

impl<T: Scalar + ClosedSub + PartialOrd + Copy> AABB<T> {
    /// Creates a new AABB from the given minimum and maximum coordinates without checking that min <= max
    pub fn from_min_max_unchecked(min: Point3<T>, max: Point3<T>) -> Self {
        Self { min, max }
    }

    /// Returns the minimum point of this AABB
    pub fn min(&self) -> &Point3<T> {
        &self.min
    }

    /// Returns the maximum point of this AABB
    pub fn max(&self) -> &Point3<T> {
        &self.max
    }

    /// Returns the extent of this AABB. The extent is the size between the minimum and maximum position of this AABB
    /// ```
    /// # use masc_core::math::AABB;
    /// let bounds = AABB::from_min_max_unchecked(nalgebra::Point3::new(0.0, 0.0, 0.0), nalgebra::Point3::new(1.0, 2.0, 3.0));
    /// assert_eq!(bounds.extent(), nalgebra::Vector3::new(1.0, 2.0, 3.0));
    /// ```
    pub fn extent(&self) -> Vector3<T> {
        self.max - self.min
    }

    /// Returns true if the given point is contained within this AABB. Points right on the boundary
    /// of this AABB (e.g. point.x == self.max.x or self.min.x) will return true as well.
    pub fn contains(&self, point: &Point3<T>) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

impl AABB<f64> {
    /// Computes the bounds of the given positions. Returns `None` if `positions` is empty
    /// ```
    /// # use masc_core::math::AABB;
    /// # use masc_core::nalgebra::Vector3;
    /// let bounds = AABB::from_positions(&[Vector3::new(1.0, 0.0, 0.0), Vector3::new(-1.0, 2.0, 0.5)]).unwrap();
    /// assert_eq!(*bounds.min(), nalgebra::Point3::new(-1.0, 0.0, 0.0));
    /// assert_eq!(*bounds.max(), nalgebra::Point3::new(1.0, 2.0, 0.5));
    /// ```
    pub fn from_positions(positions: &[Vector3<f64>]) -> Option<Self> {
        let first = *positions.first()?;
        let (min, max) = positions[1..]
            .iter()
            .fold((first, first), |(min, max), p| (min.infimum(p), max.supremum(p)));
        Some(Self::from_min_max_unchecked(
            Point3::from(min),
            Point3::from(max),
        ))
    }

    /// Returns the smallest cube that shares the minimum corner of this AABB and contains it. Degenerate
    /// (flat or single-point) bounds get a unit edge length so that the cube always has a positive volume
    /// ```
    /// # use masc_core::math::AABB;
    /// let bounds = AABB::from_min_max_unchecked(nalgebra::Point3::new(0.0, 0.0, 0.0), nalgebra::Point3::new(1.0, 4.0, 2.0));
    /// let cube = bounds.cubic();
    /// assert_eq!(cube.extent(), nalgebra::Vector3::new(4.0, 4.0, 4.0));
    /// ```
    pub fn cubic(&self) -> Self {
        let extent = self.extent();
        let mut edge = extent.x.max(extent.y).max(extent.z);
        if edge.is_nan() || edge <= 0.0 {
            edge = 1.0;
        }
        Self {
            min: self.min,
            max: self.min + Vector3::new(edge, edge, edge),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_positions_empty() {
        assert!(AABB::from_positions(&[]).is_none());
    }

    #[test]
    fn test_cubic_of_single_point() {
        let bounds = AABB::from_positions(&[Vector3::new(2.0, 2.0, 2.0)]).unwrap();
        let cube = bounds.cubic();
        assert_eq!(*cube.min(), Point3::new(2.0, 2.0, 2.0));
        assert_eq!(cube.extent(), Vector3::new(1.0, 1.0, 1.0));
        assert!(cube.contains(&Point3::new(2.5, 2.5, 2.5)));
    }
}
