use std::collections::TryReserveError;

use nalgebra::Vector3;

use super::{FieldId, ScalarField};
use crate::math::AABB;

/// An in-memory point cloud: an ordered sequence of positions with optional per-point colors and normals and
/// any number of named scalar fields. All per-point arrays always have the same length as the positions.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    name: String,
    positions: Vec<Vector3<f64>>,
    colors: Option<Vec<Vector3<u16>>>,
    normals: Option<Vec<Vector3<f64>>>,
    fields: Vec<ScalarField>,
    next_field_id: u64,
    displayed_field: Option<FieldId>,
}

impl PointCloud {
    /// Creates a new point cloud with the given `name` from the given `positions`
    /// ```
    /// # use masc_core::cloud::PointCloud;
    /// # use masc_core::nalgebra::Vector3;
    /// let cloud = PointCloud::from_positions("PC1", vec![Vector3::new(0.0, 0.0, 0.0)]);
    /// assert_eq!(1, cloud.len());
    /// assert_eq!("PC1", cloud.name());
    /// ```
    pub fn from_positions<S: Into<String>>(name: S, positions: Vec<Vector3<f64>>) -> Self {
        Self {
            name: name.into(),
            positions,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// Returns the number of points
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the position of the point at `index`
    ///
    /// # Panics
    ///
    /// If `index` is out of bounds
    pub fn position(&self, index: usize) -> Vector3<f64> {
        self.positions[index]
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    /// Returns the bounding box of all points, or `None` if the cloud is empty
    pub fn bounds(&self) -> Option<AABB<f64>> {
        AABB::from_positions(&self.positions)
    }

    /// Sets the per-point RGB colors
    ///
    /// # Panics
    ///
    /// If `colors` does not contain exactly one color per point
    pub fn set_colors(&mut self, colors: Vec<Vector3<u16>>) {
        if colors.len() != self.len() {
            panic!(
                "PointCloud::set_colors: expected {} colors, got {}",
                self.len(),
                colors.len()
            );
        }
        self.colors = Some(colors);
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    pub fn colors(&self) -> Option<&[Vector3<u16>]> {
        self.colors.as_deref()
    }

    /// Sets the per-point normals
    ///
    /// # Panics
    ///
    /// If `normals` does not contain exactly one normal per point
    pub fn set_normals(&mut self, normals: Vec<Vector3<f64>>) {
        if normals.len() != self.len() {
            panic!(
                "PointCloud::set_normals: expected {} normals, got {}",
                self.len(),
                normals.len()
            );
        }
        self.normals = Some(normals);
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn normals(&self) -> Option<&[Vector3<f64>]> {
        self.normals.as_deref()
    }

    /// Returns all scalar fields of this cloud in creation order
    pub fn fields(&self) -> &[ScalarField] {
        &self.fields
    }

    /// Returns an iterator over the names of all scalar fields
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name())
    }

    /// Returns the handle of the field named exactly `name`
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .find(|field| field.name() == name)
            .map(|field| field.id())
    }

    /// Returns the handle of the field whose name equals `name` ignoring ASCII case. An exact match is preferred
    /// over a case-insensitive one
    /// ```
    /// # use masc_core::cloud::PointCloud;
    /// let mut cloud = PointCloud::default();
    /// let id = cloud.add_field("Intensity").unwrap();
    /// assert_eq!(Some(id), cloud.find_field_ignore_case("INTENSITY"));
    /// ```
    pub fn find_field_ignore_case(&self, name: &str) -> Option<FieldId> {
        self.field_id(name).or_else(|| {
            self.fields
                .iter()
                .find(|field| field.name().eq_ignore_ascii_case(name))
                .map(|field| field.id())
        })
    }

    pub fn field(&self, id: FieldId) -> Option<&ScalarField> {
        self.fields.iter().find(|field| field.id() == id)
    }

    pub fn field_mut(&mut self, id: FieldId) -> Option<&mut ScalarField> {
        self.fields.iter_mut().find(|field| field.id() == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&ScalarField> {
        self.fields.iter().find(|field| field.name() == name)
    }

    /// Creates a new scalar field named `name`, filled with NaN. Returns `None` if a field with this name
    /// already exists
    pub fn add_field<S: Into<String>>(&mut self, name: S) -> Option<FieldId> {
        let values = vec![f64::NAN; self.len()];
        self.add_field_with_values(name, values)
    }

    /// Creates a new scalar field named `name` holding `values`. Returns `None` if a field with this name
    /// already exists
    ///
    /// # Panics
    ///
    /// If `values` does not contain exactly one value per point
    pub fn add_field_with_values<S: Into<String>>(
        &mut self,
        name: S,
        values: Vec<f64>,
    ) -> Option<FieldId> {
        let name = name.into();
        if values.len() != self.len() {
            panic!(
                "PointCloud::add_field_with_values: field {} has {} values, but the cloud has {} points",
                name,
                values.len(),
                self.len()
            );
        }
        if self.field_id(&name).is_some() {
            return None;
        }
        let id = FieldId(self.next_field_id);
        self.next_field_id += 1;
        self.fields.push(ScalarField::new(id, name, values));
        Some(id)
    }

    /// Removes the field with the given handle and returns it, or `None` if no such field exists
    pub fn remove_field(&mut self, id: FieldId) -> Option<ScalarField> {
        let position = self.fields.iter().position(|field| field.id() == id)?;
        if self.displayed_field == Some(id) {
            self.displayed_field = None;
        }
        Some(self.fields.remove(position))
    }

    /// Renames the field with the given handle. Returns `false` if the field does not exist or if another
    /// field already uses `new_name`
    pub fn rename_field<S: Into<String>>(&mut self, id: FieldId, new_name: S) -> bool {
        let new_name = new_name.into();
        match self.field_id(&new_name) {
            Some(existing) if existing != id => return false,
            _ => {}
        }
        match self.field_mut(id) {
            Some(field) => {
                field.set_name(new_name);
                true
            }
            None => false,
        }
    }

    /// Marks the field that a viewer should display. This is only a hint and has no effect on any computation
    pub fn set_displayed_field(&mut self, id: FieldId) {
        if self.field(id).is_some() {
            self.displayed_field = Some(id);
        }
    }

    pub fn displayed_field(&self) -> Option<FieldId> {
        self.displayed_field
    }

    /// Creates a new cloud containing the points at `indices` (in that order), including their colors, normals
    /// and the values of every scalar field. Field names are kept, field handles are renumbered.
    ///
    /// # Errors
    ///
    /// If memory for the new cloud can't be reserved
    ///
    /// # Panics
    ///
    /// If any of the `indices` is out of bounds
    pub fn partial_clone<S: Into<String>>(
        &self,
        indices: &[usize],
        name: S,
    ) -> Result<PointCloud, TryReserveError> {
        let mut positions = Vec::new();
        positions.try_reserve_exact(indices.len())?;
        positions.extend(indices.iter().map(|&idx| self.positions[idx]));

        let mut clone = PointCloud::from_positions(name, positions);

        if let Some(colors) = &self.colors {
            let mut picked = Vec::new();
            picked.try_reserve_exact(indices.len())?;
            picked.extend(indices.iter().map(|&idx| colors[idx]));
            clone.colors = Some(picked);
        }
        if let Some(normals) = &self.normals {
            let mut picked = Vec::new();
            picked.try_reserve_exact(indices.len())?;
            picked.extend(indices.iter().map(|&idx| normals[idx]));
            clone.normals = Some(picked);
        }
        for field in &self.fields {
            let mut values = Vec::new();
            values.try_reserve_exact(indices.len())?;
            values.extend(indices.iter().map(|&idx| field.value(idx)));
            // Names are unique in `self`, so adding can't collide
            let _ = clone.add_field_with_values(field.name(), values);
        }

        Ok(clone)
    }
}
