//! Names of the scalar fields with a well-known meaning. Lookups of these fields are case-insensitive
//! (see [`PointCloud::find_field_ignore_case`](crate::cloud::PointCloud::find_field_ignore_case)), so
//! clouds read from files with differently-cased headers still resolve.

/// Scalar field for an intensity value
pub const INTENSITY: &str = "Intensity";

/// Scalar field for a return number
pub const RETURN_NUMBER: &str = "ReturnNumber";

/// Scalar field for the number of returns of a pulse
pub const NUMBER_OF_RETURNS: &str = "NumberOfReturns";

/// Scalar field for the classification label of a point
pub const CLASSIFICATION: &str = "Classification";

/// Scalar field for near-infrared records (NIR)
pub const NIR: &str = "NIR";

/// Scalar field holding M3C2 distances
pub const M3C2: &str = "M3C2 distance";

/// Scalar field holding portion-of-visible-sky (PCV) values
pub const PCV: &str = "PCV";

/// Suffix appended to the name of a field that is preserved before being overwritten
pub const PREVIOUS_SUFFIX: &str = "_prev";

/// Scalar field for the confidence of a classification result
pub const CLASSIFICATION_CONFIDENCE: &str = "Classification_confidence";
