use std::{fmt::Display, str::FromStr};

use super::compute::Neighborhood;
use crate::{
    error::{MascError, Result},
    structure_measures::{
        dip_degrees, dip_direction_degrees, first_order_moment, quadric_mean_curvature,
    },
};

/// Geometric features of the neighborhood around a core point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NeighborhoodFeatureType {
    /// Largest normalized eigenvalue of the structure tensor
    Pca1,
    Pca2,
    Pca3,
    Spher,
    Linea,
    Plana,
    /// Dip of the least squares plane in degrees
    Dip,
    /// Dip direction of the least squares plane in degrees
    DipDir,
    /// Distance of the core point to the least squares plane
    Rough,
    /// Number of points in the neighborhood
    NbPts,
    /// Mean curvature of a quadric fitted to the neighborhood
    Curv,
    ZRange,
    /// Height of the highest neighbor above the core point
    ZMax,
    /// Height of the core point above the lowest neighbor
    ZMin,
    Aniso,
    /// First order moment along the first principal axis
    Fom,
}

impl NeighborhoodFeatureType {
    const KEYWORDS: [(&'static str, NeighborhoodFeatureType); 16] = [
        ("PCA1", NeighborhoodFeatureType::Pca1),
        ("PCA2", NeighborhoodFeatureType::Pca2),
        ("PCA3", NeighborhoodFeatureType::Pca3),
        ("SPHER", NeighborhoodFeatureType::Spher),
        ("LINEA", NeighborhoodFeatureType::Linea),
        ("PLANA", NeighborhoodFeatureType::Plana),
        ("DIP", NeighborhoodFeatureType::Dip),
        ("DIPDIR", NeighborhoodFeatureType::DipDir),
        ("ROUGH", NeighborhoodFeatureType::Rough),
        ("NBPTS", NeighborhoodFeatureType::NbPts),
        ("CURV", NeighborhoodFeatureType::Curv),
        ("ZRANGE", NeighborhoodFeatureType::ZRange),
        ("ZMAX", NeighborhoodFeatureType::ZMax),
        ("ZMIN", NeighborhoodFeatureType::ZMin),
        ("ANISO", NeighborhoodFeatureType::Aniso),
        ("FOM", NeighborhoodFeatureType::Fom),
    ];

    /// Returns `true` if this feature is computed from the structure tensor of the neighborhood
    pub(super) fn needs_tensor(&self) -> bool {
        !matches!(
            self,
            NeighborhoodFeatureType::NbPts
                | NeighborhoodFeatureType::ZRange
                | NeighborhoodFeatureType::ZMax
                | NeighborhoodFeatureType::ZMin
        )
    }

    /// Computes the feature for one neighborhood. Neighborhoods that are too small for the feature give NaN
    pub(super) fn evaluate(&self, neighborhood: &Neighborhood) -> f64 {
        use NeighborhoodFeatureType::*;
        match self {
            NbPts => return neighborhood.len() as f64,
            ZRange | ZMax | ZMin => return self.height_feature(neighborhood),
            _ => {}
        }

        let tensor = match neighborhood.tensor() {
            Some(tensor) => tensor,
            None => return f64::NAN,
        };
        match self {
            Pca1 => tensor.normalized_eigenvalues()[0],
            Pca2 => tensor.normalized_eigenvalues()[1],
            Pca3 => tensor.normalized_eigenvalues()[2],
            Spher => tensor.sphericity(),
            Linea => tensor.linearity(),
            Plana => tensor.planarity(),
            Aniso => tensor.anisotropy(),
            Dip => dip_degrees(&tensor.normal()),
            DipDir => dip_direction_degrees(&tensor.normal()),
            Rough => tensor.distance_to_plane(neighborhood.query()),
            Fom => first_order_moment(tensor, neighborhood.points(), neighborhood.query()),
            Curv => quadric_mean_curvature(tensor, neighborhood.points(), neighborhood.query())
                .unwrap_or(f64::NAN),
            NbPts | ZRange | ZMax | ZMin => f64::NAN,
        }
    }

    fn height_feature(&self, neighborhood: &Neighborhood) -> f64 {
        if neighborhood.len() < 2 {
            return f64::NAN;
        }
        let (min, max) = neighborhood
            .points()
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), p| {
                (min.min(p.z), max.max(p.z))
            });
        let z = neighborhood.query().z;
        match self {
            NeighborhoodFeatureType::ZMax => max - z,
            NeighborhoodFeatureType::ZMin => z - min,
            _ => max - min,
        }
    }
}

impl Display for NeighborhoodFeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keyword = Self::KEYWORDS
            .iter()
            .find(|(_, ty)| ty == self)
            .map_or("?", |(keyword, _)| *keyword);
        write!(f, "{}", keyword)
    }
}

impl FromStr for NeighborhoodFeatureType {
    type Err = MascError;

    fn from_str(s: &str) -> Result<Self> {
        Self::KEYWORDS
            .iter()
            .find(|(keyword, _)| keyword.eq_ignore_ascii_case(s))
            .map(|(_, ty)| *ty)
            .ok_or_else(|| {
                MascError::InvalidFeatureType(format!("unknown neighborhood feature '{}'", s))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use masc_core::nalgebra::Vector3;

    fn neighborhood(points: &[Vector3<f64>], query: Vector3<f64>) -> Neighborhood {
        let mut neighborhood = Neighborhood::default();
        neighborhood.load_points(points, &query, true);
        neighborhood
    }

    fn grid(z: impl Fn(f64, f64) -> f64) -> Vec<Vector3<f64>> {
        let mut points = vec![];
        for x in -2..=2 {
            for y in -2..=2 {
                let (x, y) = (x as f64 * 0.5, y as f64 * 0.5);
                points.push(Vector3::new(x, y, z(x, y)));
            }
        }
        points
    }

    #[test]
    fn test_planar_neighborhood() {
        let points = grid(|_, _| 1.0);
        let hood = neighborhood(&points, Vector3::new(0.0, 0.0, 1.5));
        assert_approx_eq!(0.5, NeighborhoodFeatureType::Pca1.evaluate(&hood));
        assert_approx_eq!(0.0, NeighborhoodFeatureType::Pca3.evaluate(&hood));
        assert_approx_eq!(1.0, NeighborhoodFeatureType::Plana.evaluate(&hood));
        assert_approx_eq!(0.0, NeighborhoodFeatureType::Dip.evaluate(&hood));
        assert_approx_eq!(0.5, NeighborhoodFeatureType::Rough.evaluate(&hood));
        assert_approx_eq!(25.0, NeighborhoodFeatureType::NbPts.evaluate(&hood));
        assert_approx_eq!(0.0, NeighborhoodFeatureType::Curv.evaluate(&hood), 1e-9);
    }

    #[test]
    fn test_height_features_are_exclusive_of_anisotropy() {
        let points = grid(|x, _| x);
        let hood = neighborhood(&points, Vector3::new(0.0, 0.0, 0.25));
        assert_approx_eq!(2.0, NeighborhoodFeatureType::ZRange.evaluate(&hood));
        assert_approx_eq!(0.75, NeighborhoodFeatureType::ZMax.evaluate(&hood));
        assert_approx_eq!(1.25, NeighborhoodFeatureType::ZMin.evaluate(&hood));
        let aniso = NeighborhoodFeatureType::Aniso.evaluate(&hood);
        assert_approx_eq!(1.0, aniso);

        let single = neighborhood(&points[..1], Vector3::zeros());
        assert!(NeighborhoodFeatureType::ZRange.evaluate(&single).is_nan());
        assert!(NeighborhoodFeatureType::Aniso.evaluate(&single).is_nan());
    }

    #[test]
    fn test_degenerate_neighborhoods() {
        let colinear = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        ];
        let hood = neighborhood(&colinear, colinear[1]);
        assert_approx_eq!(1.0, NeighborhoodFeatureType::Linea.evaluate(&hood));
        let planarity = NeighborhoodFeatureType::Plana.evaluate(&hood);
        assert!(planarity.is_nan() || planarity.abs() < 1e-9);
        // Too few points for a quadric
        assert!(NeighborhoodFeatureType::Curv.evaluate(&hood).is_nan());

        let empty = neighborhood(&[], Vector3::zeros());
        assert_eq!(0.0, NeighborhoodFeatureType::NbPts.evaluate(&empty));
        assert!(NeighborhoodFeatureType::Pca1.evaluate(&empty).is_nan());
    }

    #[test]
    fn test_keywords() {
        for (keyword, ty) in NeighborhoodFeatureType::KEYWORDS.iter() {
            assert_eq!(*ty, keyword.to_lowercase().parse().unwrap());
            assert_eq!(*keyword, ty.to_string());
        }
    }
}
