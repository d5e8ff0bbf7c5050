use std::{fmt::Display, str::FromStr};

use masc_core::cloud::{fields, PointCloud, ScalarField};

use super::compute::ValueSource;
use crate::{
    error::{MascError, Result},
    sources::{FeatureSource, FeatureSourceKind},
    structure_measures::{dip_degrees, dip_direction_degrees},
};

/// Per-point value of a point feature. Scaled point features summarize these values over a neighborhood with a
/// statistic, scale-less ones use the value of the core point itself
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PointFeatureType {
    Intensity,
    X,
    Y,
    Z,
    NumberOfReturns,
    ReturnNumber,
    /// Return number divided by the number of returns
    EchoRatio,
    Red,
    Green,
    Blue,
    Nir,
    /// Dip of the point normal in degrees
    Dip,
    /// Dip direction of the point normal in degrees
    DipDir,
    M3c2,
    Pcv,
    /// Any scalar field, by exact name
    ScalarField(String),
}

const SCALAR_FIELD_PREFIX: &str = "SF_";

impl PointFeatureType {
    const KEYWORDS: [(&'static str, PointFeatureType); 15] = [
        ("INT", PointFeatureType::Intensity),
        ("X", PointFeatureType::X),
        ("Y", PointFeatureType::Y),
        ("Z", PointFeatureType::Z),
        ("NBRET", PointFeatureType::NumberOfReturns),
        ("RETNB", PointFeatureType::ReturnNumber),
        ("ECHORAT", PointFeatureType::EchoRatio),
        ("R", PointFeatureType::Red),
        ("G", PointFeatureType::Green),
        ("B", PointFeatureType::Blue),
        ("NIR", PointFeatureType::Nir),
        ("DIP", PointFeatureType::Dip),
        ("DIPDIR", PointFeatureType::DipDir),
        ("M3C2", PointFeatureType::M3c2),
        ("PCV", PointFeatureType::Pcv),
    ];

    /// Name of the scalar field this feature reads, if it reads one
    fn field_name(&self) -> Option<&str> {
        match self {
            PointFeatureType::Intensity => Some(fields::INTENSITY),
            PointFeatureType::NumberOfReturns => Some(fields::NUMBER_OF_RETURNS),
            PointFeatureType::ReturnNumber => Some(fields::RETURN_NUMBER),
            PointFeatureType::Nir => Some(fields::NIR),
            PointFeatureType::M3c2 => Some(fields::M3C2),
            PointFeatureType::Pcv => Some(fields::PCV),
            PointFeatureType::ScalarField(name) => Some(name),
            _ => None,
        }
    }
}

impl Display for PointFeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let PointFeatureType::ScalarField(name) = self {
            return write!(f, "{}{}", SCALAR_FIELD_PREFIX, name);
        }
        let keyword = Self::KEYWORDS
            .iter()
            .find(|(_, ty)| ty == self)
            .map_or("?", |(keyword, _)| *keyword);
        write!(f, "{}", keyword)
    }
}

impl FromStr for PointFeatureType {
    type Err = MascError;

    /// Keywords are case-insensitive, the field name after `SF_` is not
    fn from_str(s: &str) -> Result<Self> {
        if s.len() > SCALAR_FIELD_PREFIX.len()
            && s[..SCALAR_FIELD_PREFIX.len()].eq_ignore_ascii_case(SCALAR_FIELD_PREFIX)
        {
            return Ok(PointFeatureType::ScalarField(
                s[SCALAR_FIELD_PREFIX.len()..].to_owned(),
            ));
        }
        Self::KEYWORDS
            .iter()
            .find(|(keyword, _)| keyword.eq_ignore_ascii_case(s))
            .map(|(_, ty)| ty.clone())
            .ok_or_else(|| MascError::InvalidFeatureType(format!("unknown point feature '{}'", s)))
    }
}

/// Looks up a field by its exact name, falling back to a case-insensitive match
fn find_field<'a>(cloud: &'a PointCloud, name: &str) -> Result<&'a ScalarField> {
    cloud
        .find_field_ignore_case(name)
        .and_then(|id| cloud.field(id))
        .ok_or_else(|| {
            MascError::MissingField(format!(
                "scalar field '{}' not found on cloud {}",
                name,
                cloud.name()
            ))
        })
}

fn require_colors(cloud: &PointCloud) -> Result<()> {
    if cloud.has_colors() {
        Ok(())
    } else {
        Err(MascError::MissingField(format!(
            "cloud {} has no colors",
            cloud.name()
        )))
    }
}

/// Source of a scale-less feature that can be read from `cloud` as is. `None` for features whose values have to be
/// computed first
pub(super) fn direct_source(
    ty: &PointFeatureType,
    cloud: &PointCloud,
) -> Result<Option<FeatureSource>> {
    let source = match ty {
        PointFeatureType::X => FeatureSource::new(FeatureSourceKind::DimX, "X"),
        PointFeatureType::Y => FeatureSource::new(FeatureSourceKind::DimY, "Y"),
        PointFeatureType::Z => FeatureSource::new(FeatureSourceKind::DimZ, "Z"),
        PointFeatureType::Red => {
            require_colors(cloud)?;
            FeatureSource::new(FeatureSourceKind::Red, "R")
        }
        PointFeatureType::Green => {
            require_colors(cloud)?;
            FeatureSource::new(FeatureSourceKind::Green, "G")
        }
        PointFeatureType::Blue => {
            require_colors(cloud)?;
            FeatureSource::new(FeatureSourceKind::Blue, "B")
        }
        PointFeatureType::EchoRatio | PointFeatureType::Dip | PointFeatureType::DipDir => {
            return Ok(None)
        }
        other => {
            let name = other.field_name().unwrap_or_default();
            FeatureSource::scalar_field(find_field(cloud, name)?.name())
        }
    };
    Ok(Some(source))
}

/// Computes the value of the feature for every point of `cloud`
pub(super) fn per_point_values(ty: &PointFeatureType, cloud: &PointCloud) -> Result<Vec<f64>> {
    let values = match ty {
        PointFeatureType::X => cloud.positions().iter().map(|p| p.x).collect(),
        PointFeatureType::Y => cloud.positions().iter().map(|p| p.y).collect(),
        PointFeatureType::Z => cloud.positions().iter().map(|p| p.z).collect(),
        PointFeatureType::Red | PointFeatureType::Green | PointFeatureType::Blue => {
            let channel = match ty {
                PointFeatureType::Red => 0,
                PointFeatureType::Green => 1,
                _ => 2,
            };
            let colors = cloud.colors().ok_or_else(|| {
                MascError::MissingField(format!("cloud {} has no colors", cloud.name()))
            })?;
            colors.iter().map(|c| c[channel] as f64).collect()
        }
        PointFeatureType::EchoRatio => {
            let returns = find_field(cloud, fields::RETURN_NUMBER)?;
            let count = find_field(cloud, fields::NUMBER_OF_RETURNS)?;
            returns
                .values()
                .iter()
                .zip(count.values())
                .map(|(&number, &total)| {
                    if total == 0.0 {
                        f64::NAN
                    } else {
                        number / total
                    }
                })
                .collect()
        }
        PointFeatureType::Dip | PointFeatureType::DipDir => {
            let normals = cloud.normals().ok_or_else(|| {
                MascError::MissingField(format!("cloud {} has no normals", cloud.name()))
            })?;
            normals
                .iter()
                .map(|normal| {
                    let upward = if normal.z < 0.0 { -normal } else { *normal };
                    if *ty == PointFeatureType::Dip {
                        dip_degrees(&upward)
                    } else {
                        dip_direction_degrees(&upward)
                    }
                })
                .collect()
        }
        other => {
            let name = other.field_name().unwrap_or_default();
            find_field(cloud, name)?.values().to_vec()
        }
    };
    Ok(values)
}

/// Per-point values of `cloud` that scaled features summarize over their neighborhoods
pub(super) fn value_source(ty: &PointFeatureType, cloud: &PointCloud) -> Result<ValueSource> {
    match ty {
        PointFeatureType::X => Ok(ValueSource::Coordinate(0)),
        PointFeatureType::Y => Ok(ValueSource::Coordinate(1)),
        PointFeatureType::Z => Ok(ValueSource::Coordinate(2)),
        other => per_point_values(other, cloud).map(ValueSource::Values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use masc_core::nalgebra::Vector3;

    fn cloud() -> PointCloud {
        let mut cloud = PointCloud::from_positions(
            "PC1",
            vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(1.0, 0.0, 2.0)],
        );
        cloud
            .add_field_with_values("returnnumber", vec![1.0, 2.0])
            .unwrap();
        cloud
            .add_field_with_values(fields::NUMBER_OF_RETURNS, vec![2.0, 0.0])
            .unwrap();
        cloud
    }

    #[test]
    fn test_keywords() {
        for (keyword, ty) in PointFeatureType::KEYWORDS.iter() {
            assert_eq!(*ty, keyword.parse().unwrap());
            assert_eq!(*keyword, ty.to_string());
        }
        assert_eq!(
            PointFeatureType::ScalarField("Reflectance".into()),
            "sf_Reflectance".parse().unwrap()
        );
        assert!("SF_".parse::<PointFeatureType>().is_err());
    }

    #[test]
    fn test_echo_ratio() {
        let values = per_point_values(&PointFeatureType::EchoRatio, &cloud()).unwrap();
        assert_eq!(0.5, values[0]);
        assert!(values[1].is_nan());
    }

    #[test]
    fn test_dip_from_normals() {
        let mut cloud = cloud();
        assert!(matches!(
            per_point_values(&PointFeatureType::Dip, &cloud),
            Err(MascError::MissingField(_))
        ));
        cloud.set_normals(vec![
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 1.0).normalize(),
        ]);
        let dip = per_point_values(&PointFeatureType::Dip, &cloud).unwrap();
        assert_approx_eq!(0.0, dip[0]);
        assert_approx_eq!(45.0, dip[1]);
        let dip_dir = per_point_values(&PointFeatureType::DipDir, &cloud).unwrap();
        assert_approx_eq!(90.0, dip_dir[1]);
    }

    #[test]
    fn test_direct_sources() {
        let cloud = cloud();
        assert_eq!(
            Some(FeatureSource::scalar_field("returnnumber")),
            direct_source(&PointFeatureType::ReturnNumber, &cloud).unwrap()
        );
        assert!(direct_source(&PointFeatureType::EchoRatio, &cloud)
            .unwrap()
            .is_none());
        assert!(matches!(
            direct_source(&PointFeatureType::Red, &cloud),
            Err(MascError::MissingField(_))
        ));
    }
}
