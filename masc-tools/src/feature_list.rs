use anyhow::{anyhow, bail, Context, Result};
use masc_algorithms::{
    features::{CloudRef, FeatureDescriptor, FeatureKind},
    stats::Statistic,
};

/// Parses a comma-separated list of scales, e.g. `0.5,1,2`
pub fn parse_scales(list: &str) -> Result<Vec<f64>> {
    list.split(',')
        .map(str::trim)
        .filter(|scale| !scale.is_empty())
        .map(|scale| {
            let value = scale
                .parse::<f64>()
                .with_context(|| format!("Invalid scale '{}'", scale))?;
            if value.is_nan() || value <= 0.0 || value.is_infinite() {
                bail!("Scale must be positive, got {}", value);
            }
            Ok(value)
        })
        .collect()
}

/// Builds the feature descriptors for a comma-separated list of `KEYWORD[:STAT]` entries on `cloud`, e.g.
/// `PCA1,PLANA,INT:MEAN,Z`.
///
/// Entries with a statistic are point features summarized over a neighborhood, neighborhood features like
/// `PLANA` are computed at every scale. Point features without statistic are read from every core point as is
/// and are added once
pub fn parse_feature_list(
    list: &str,
    scales: &[f64],
    cloud: &CloudRef,
) -> Result<Vec<FeatureDescriptor>> {
    let mut descriptors = vec![];
    for entry in list.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (keyword, stat) = match entry.find(':') {
            Some(separator) => {
                let stat = entry[separator + 1..]
                    .parse::<Statistic>()
                    .with_context(|| format!("Invalid statistic in feature '{}'", entry))?;
                (&entry[..separator], Some(stat))
            }
            None => (entry, None),
        };

        let scaled = FeatureKind::parse(keyword, true, stat.is_some())
            .with_context(|| format!("Invalid feature '{}'", entry))?;
        match (&scaled, stat) {
            (FeatureKind::Point(_), None) => {
                descriptors.push(FeatureDescriptor::new(scaled.clone(), cloud.clone()));
            }
            (FeatureKind::Neighborhood(_), Some(_)) => {
                bail!("Feature '{}' does not take a statistic", keyword);
            }
            (FeatureKind::Point(_), Some(_)) | (FeatureKind::Neighborhood(_), None) => {
                if scales.is_empty() {
                    bail!("Feature '{}' needs at least one scale", entry);
                }
                for &scale in scales {
                    let descriptor = FeatureDescriptor::new(scaled.clone(), cloud.clone()).scale(scale);
                    descriptors.push(match stat {
                        Some(stat) => descriptor.stat(stat),
                        None => descriptor,
                    });
                }
            }
            _ => {
                return Err(anyhow!(
                    "Feature '{}' needs a second cloud and can't be used from the command line",
                    keyword
                ))
            }
        }
    }
    if descriptors.is_empty() {
        bail!("No features given");
    }
    Ok(descriptors)
}
