use std::{fmt::Display, str::FromStr};

use super::compute::Neighborhood;
use crate::{
    error::{MascError, Result},
    structure_measures::calc_centroid,
};

/// Position of a core point relative to its nearest points in a context cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextFeatureType {
    /// Height above the centroid of the context points
    DZ,
    /// Horizontal distance to the centroid of the context points
    DH,
}

impl ContextFeatureType {
    pub(super) fn evaluate(&self, neighborhood: &Neighborhood) -> f64 {
        if neighborhood.is_empty() {
            return f64::NAN;
        }
        let centroid = calc_centroid(neighborhood.points());
        let query = neighborhood.query();
        match self {
            ContextFeatureType::DZ => query.z - centroid.z,
            ContextFeatureType::DH => (query.xy() - centroid.xy()).norm(),
        }
    }
}

impl Display for ContextFeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextFeatureType::DZ => write!(f, "DZ"),
            ContextFeatureType::DH => write!(f, "DH"),
        }
    }
}

impl FromStr for ContextFeatureType {
    type Err = MascError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DZ" => Ok(ContextFeatureType::DZ),
            "DH" => Ok(ContextFeatureType::DH),
            _ => Err(MascError::InvalidFeatureType(format!(
                "unknown context feature '{}'",
                s
            ))),
        }
    }
}
