use log::info;
use masc_core::cloud::{CloudId, CloudStore};
use rand::{prelude::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{MascError, Result};

/// How the core points are derived from their origin cloud
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SubsamplingMethod {
    /// All points of the origin cloud are core points
    None,
    /// A uniform random subset of `floor(size * ratio)` points, with `0 < ratio < 1`
    Random { ratio: f64 },
    /// A subset in which no two points are closer than `min_spacing`
    Spatial { min_spacing: f64 },
}

impl Default for SubsamplingMethod {
    fn default() -> Self {
        SubsamplingMethod::None
    }
}

/// The points on which features and labels are ultimately computed: either an origin cloud itself, or a subsample of
/// it that is added to the [`CloudStore`] as a new cloud
#[derive(Debug, Clone)]
pub struct CorePoints {
    origin: CloudId,
    method: SubsamplingMethod,
    seed: Option<u64>,
    derived: Option<CloudId>,
    index_map: Vec<usize>,
}

impl CorePoints {
    pub fn new(origin: CloudId, method: SubsamplingMethod) -> Self {
        Self {
            origin,
            method,
            seed: None,
            derived: None,
            index_map: vec![],
        }
    }

    /// Uses a fixed seed for random subsampling
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn origin(&self) -> CloudId {
        self.origin
    }

    pub fn method(&self) -> SubsamplingMethod {
        self.method
    }

    pub fn is_prepared(&self) -> bool {
        self.derived.is_some()
    }

    /// Returns the cloud holding the core points, or `None` before [`prepare`](Self::prepare) was called. Without
    /// subsampling this is the origin cloud
    pub fn cloud(&self) -> Option<CloudId> {
        self.derived
    }

    /// Returns the index within the origin cloud of each core point, or `None` if there is no subsampling
    pub fn index_map(&self) -> Option<&[usize]> {
        match self.method {
            SubsamplingMethod::None => None,
            _ => Some(&self.index_map),
        }
    }

    /// Returns the index within the origin cloud of the core point at `index`
    pub fn origin_index(&self, index: usize) -> usize {
        match self.method {
            SubsamplingMethod::None => index,
            _ => self.index_map[index],
        }
    }

    /// Derives the core points. Does nothing if they were derived before
    ///
    /// # Errors
    ///
    /// If the subsampling parameter is out of range, or if the subsample can't be allocated
    pub fn prepare(&mut self, store: &mut CloudStore) -> Result<()> {
        if self.derived.is_some() {
            return Ok(());
        }

        let indices = match self.method {
            SubsamplingMethod::None => {
                self.derived = Some(self.origin);
                return Ok(());
            }
            SubsamplingMethod::Random { ratio } => {
                if !(ratio > 0.0 && ratio < 1.0) {
                    return Err(MascError::Config(format!(
                        "random subsampling ratio must be in (0;1), got {}",
                        ratio
                    )));
                }
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let size = store.cloud(self.origin).len();
                let count = (size as f64 * ratio).floor() as usize;
                let mut indices = rand::seq::index::sample(&mut rng, size, count).into_vec();
                indices.sort_unstable();
                indices
            }
            SubsamplingMethod::Spatial { min_spacing } => {
                if min_spacing.is_nan() || min_spacing <= 0.0 {
                    return Err(MascError::Config(format!(
                        "minimum spacing must be positive, got {}",
                        min_spacing
                    )));
                }
                spatial_subsample(store, self.origin, min_spacing)?
            }
        };

        let origin = store.cloud(self.origin);
        let name = format!("{}.core", origin.name());
        let subsample = origin.partial_clone(&indices, name)?;
        info!(
            "Core points: kept {} of {} points of {}",
            subsample.len(),
            origin.len(),
            origin.name()
        );
        self.derived = Some(store.insert(subsample));
        self.index_map = indices;
        Ok(())
    }
}

/// Visits the points in Morton order and keeps each point that is not within `min_spacing` of an already kept point
fn spatial_subsample(store: &mut CloudStore, origin: CloudId, min_spacing: f64) -> Result<Vec<usize>> {
    store.ensure_octree(origin);
    let octree = store
        .octree(origin)
        .ok_or_else(|| MascError::Internal("octree was not built".into()))?;
    let positions = store.cloud(origin).positions();
    let level = octree.level_for_radius(min_spacing);

    let mut removed = vec![false; positions.len()];
    let mut kept = Vec::new();
    let mut neighbors = Vec::new();
    for &index in octree.indices_in_morton_order() {
        if removed[index] {
            continue;
        }
        kept.push(index);
        octree.radius_search_into(&positions[index], min_spacing, level, &mut neighbors);
        for neighbor in &neighbors {
            removed[neighbor.index] = true;
        }
    }
    kept.sort_unstable();
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use masc_core::cloud::PointCloud;
    use masc_core::nalgebra::Vector3;

    fn line_store(count: usize, spacing: f64) -> (CloudStore, CloudId) {
        let mut store = CloudStore::new();
        let positions = (0..count)
            .map(|i| Vector3::new(i as f64 * spacing, 0.0, 0.0))
            .collect::<Vec<_>>();
        let mut cloud = PointCloud::from_positions("line", positions);
        cloud
            .add_field_with_values("Intensity", (0..count).map(|i| i as f64).collect())
            .unwrap();
        let id = store.insert(cloud);
        (store, id)
    }

    #[test]
    fn test_no_subsampling_uses_origin() {
        let (mut store, origin) = line_store(10, 1.0);
        let mut core = CorePoints::new(origin, SubsamplingMethod::None);
        assert_eq!(None, core.cloud());
        core.prepare(&mut store).unwrap();
        assert_eq!(Some(origin), core.cloud());
        assert_eq!(1, store.len());
        assert_eq!(7, core.origin_index(7));
        assert!(core.index_map().is_none());
    }

    #[test]
    fn test_random_subsampling() {
        let (mut store, origin) = line_store(101, 1.0);
        let mut core = CorePoints::new(origin, SubsamplingMethod::Random { ratio: 0.25 }).with_seed(3);
        core.prepare(&mut store).unwrap();
        let derived = core.cloud().unwrap();
        assert_ne!(origin, derived);
        assert_eq!(25, store.cloud(derived).len());

        let map = core.index_map().unwrap().to_vec();
        assert!(map.windows(2).all(|w| w[0] < w[1]));
        let intensities = store.cloud(derived).field_by_name("Intensity").unwrap();
        for (core_index, origin_index) in map.iter().enumerate() {
            assert_eq!(*origin_index as f64, intensities.value(core_index));
        }

        // Idempotent
        core.prepare(&mut store).unwrap();
        assert_eq!(2, store.len());
    }

    #[test]
    fn test_random_subsampling_ratio_out_of_range() {
        let (mut store, origin) = line_store(10, 1.0);
        for ratio in [0.0, 1.0, -0.5, f64::NAN].iter() {
            let mut core = CorePoints::new(origin, SubsamplingMethod::Random { ratio: *ratio });
            assert!(matches!(
                core.prepare(&mut store),
                Err(MascError::Config(_))
            ));
            assert!(!core.is_prepared());
        }
    }

    #[test]
    fn test_spatial_subsampling() {
        let (mut store, origin) = line_store(100, 0.1);
        let mut core = CorePoints::new(origin, SubsamplingMethod::Spatial { min_spacing: 0.25 });
        core.prepare(&mut store).unwrap();
        let derived = store.cloud(core.cloud().unwrap());
        assert!(derived.len() < 50 && derived.len() >= 30, "{}", derived.len());
        let positions = derived.positions();
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                assert!((positions[i] - positions[j]).norm() > 0.25);
            }
        }
    }
}
