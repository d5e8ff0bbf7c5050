use std::{fmt::Display, str::FromStr};

use crate::error::{MascError, Result};

/// Features that compare two clouds point by point. None of them can be computed yet, preparing one always fails
/// with [`MascError::NotImplemented`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DualCloudFeatureType {
    IntensityDifference,
}

impl Display for DualCloudFeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DualCloudFeatureType::IntensityDifference => write!(f, "INTDIFF"),
        }
    }
}

impl FromStr for DualCloudFeatureType {
    type Err = MascError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("INTDIFF") {
            Ok(DualCloudFeatureType::IntensityDifference)
        } else {
            Err(MascError::InvalidFeatureType(format!(
                "unknown dual cloud feature '{}'",
                s
            )))
        }
    }
}
