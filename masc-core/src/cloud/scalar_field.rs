use std::fmt::Display;

use crate::math::minmax_of;

/// Stable handle of a scalar field within its owning [`PointCloud`](super::PointCloud). Handles are never reused,
/// so a handle of a removed field stays invalid even if a field with the same name is created later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldId(pub(crate) u64);

impl FieldId {
    /// Returns the raw value of this handle
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named array with one scalar value per point. Missing values are stored as NaN
#[derive(Debug, Clone)]
pub struct ScalarField {
    id: FieldId,
    name: String,
    values: Vec<f64>,
    min_max: Option<(f64, f64)>,
}

impl ScalarField {
    pub(crate) fn new(id: FieldId, name: String, values: Vec<f64>) -> Self {
        Self {
            id,
            name,
            values,
            min_max: None,
        }
    }

    /// Returns the handle of this field
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Returns the name of this field
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Returns the number of values in this field. This is always equal to the point count of the owning cloud
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if this field has no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at `index`
    ///
    /// # Panics
    ///
    /// If `index` is out of bounds
    pub fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    /// Sets the value at `index`. This invalidates the cached min/max values
    ///
    /// # Panics
    ///
    /// If `index` is out of bounds
    pub fn set_value(&mut self, index: usize, value: f64) {
        self.values[index] = value;
        self.min_max = None;
    }

    /// Returns all values of this field
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns all values of this field mutably. This invalidates the cached min/max values
    pub fn values_mut(&mut self) -> &mut [f64] {
        self.min_max = None;
        &mut self.values
    }

    /// Moves the values out of this field, leaving it empty until [`restore_values`](Self::restore_values) is called.
    /// This allows computing new values for a field while the owning cloud is borrowed immutably
    pub fn take_values(&mut self) -> Vec<f64> {
        self.min_max = None;
        std::mem::take(&mut self.values)
    }

    /// Puts back values that were previously taken with [`take_values`](Self::take_values)
    ///
    /// # Panics
    ///
    /// If this field still holds values, or if `values` has a different length than the taken values
    pub fn restore_values(&mut self, values: Vec<f64>, expected_len: usize) {
        assert!(
            self.values.is_empty(),
            "ScalarField::restore_values: field {} still holds values",
            self.name
        );
        assert_eq!(
            values.len(),
            expected_len,
            "ScalarField::restore_values: value count does not match the point count"
        );
        self.values = values;
    }

    /// Sets all values of this field to `value`
    pub fn fill(&mut self, value: f64) {
        self.values.iter_mut().for_each(|v| *v = value);
        self.min_max = None;
    }

    /// Recomputes the cached minimum and maximum of all non-NaN values
    pub fn compute_min_max(&mut self) -> Option<(f64, f64)> {
        self.min_max = minmax_of(&self.values);
        self.min_max
    }

    /// Returns the cached minimum and maximum values. This is `None` if the cache was invalidated or the field
    /// contains only NaN values
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.min_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max_cache_invalidation() {
        let mut field = ScalarField::new(FieldId(0), "F".into(), vec![1.0, f64::NAN, 4.0]);
        assert_eq!(None, field.min_max());
        assert_eq!(Some((1.0, 4.0)), field.compute_min_max());
        field.set_value(1, -2.0);
        assert_eq!(None, field.min_max());
        assert_eq!(Some((-2.0, 4.0)), field.compute_min_max());
    }

    #[test]
    fn test_take_and_restore_values() {
        let mut field = ScalarField::new(FieldId(3), "F".into(), vec![1.0, 2.0]);
        let mut values = field.take_values();
        assert!(field.is_empty());
        values[0] = 10.0;
        field.restore_values(values, 2);
        assert_eq!(&[10.0, 2.0], field.values());
    }

    #[test]
    #[should_panic(expected = "value count does not match")]
    fn test_restore_values_wrong_length() {
        let mut field = ScalarField::new(FieldId(3), "F".into(), vec![1.0, 2.0]);
        let _ = field.take_values();
        field.restore_values(vec![1.0], 2);
    }
}
