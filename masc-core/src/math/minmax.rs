use nalgebra::{Scalar, Vector3};

/// Helper trait for computing minimum and maximum values for types. Floating point implementations
/// ignore NaN operands, so that folding over a scalar field with missing values yields the range of
/// the valid values
pub trait MinMax {
    /// Computes the infimum of this value and `other`. For vector types, this is the component-wise minimum
    ///
    /// # Example
    /// ```
    /// use masc_core::math::MinMax;
    /// # use masc_core::nalgebra::Vector3;
    ///
    /// assert_eq!(5.0_f64.infimum(&3.0), 3.0);
    /// assert_eq!(f64::NAN.infimum(&3.0), 3.0);
    /// assert_eq!(Vector3::new(1.0, 2.0, 3.0).infimum(&Vector3::new(2.0, 1.0, 0.0)), Vector3::new(1.0, 1.0, 0.0));
    /// ```
    fn infimum(&self, other: &Self) -> Self;
    /// Computes the supremum of this value and `other`. For vector types, this is the component-wise maximum
    fn supremum(&self, other: &Self) -> Self;
}

macro_rules! impl_minmax_for_float {
    ($type:tt) => {
        impl MinMax for $type {
            fn infimum(&self, other: &Self) -> Self {
                self.min(*other)
            }

            fn supremum(&self, other: &Self) -> Self {
                self.max(*other)
            }
        }
    };
}

impl_minmax_for_float! {f32}
impl_minmax_for_float! {f64}

impl<T: MinMax + Scalar> MinMax for Vector3<T> {
    fn infimum(&self, other: &Self) -> Self {
        Vector3::new(
            self.x.infimum(&other.x),
            self.y.infimum(&other.y),
            self.z.infimum(&other.z),
        )
    }

    fn supremum(&self, other: &Self) -> Self {
        Vector3::new(
            self.x.supremum(&other.x),
            self.y.supremum(&other.y),
            self.z.supremum(&other.z),
        )
    }
}

/// Returns the minimum and maximum of all non-NaN values, or `None` if there is no such value
/// ```
/// # use masc_core::math::minmax_of;
/// assert_eq!(minmax_of(&[3.0, f64::NAN, -1.0, 2.0]), Some((-1.0, 3.0)));
/// assert_eq!(minmax_of(&[f64::NAN]), None);
/// ```
pub fn minmax_of(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(None, |minmax, &val| match minmax {
            None => Some((val, val)),
            Some((old_min, old_max)) => Some((val.infimum(&old_min), val.supremum(&old_max))),
        })
}
