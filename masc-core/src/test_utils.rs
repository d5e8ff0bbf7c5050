use nalgebra::Vector3;
use rand::prelude::Distribution;
use rand::Rng;

use crate::cloud::PointCloud;

/// Uniform distribution of positions inside the cube `[0; size]^3`
pub(crate) struct UniformBoxDistribution {
    pub size: f64,
}

impl Distribution<Vector3<f64>> for UniformBoxDistribution {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector3<f64> {
        Vector3::new(
            rng.gen::<f64>() * self.size,
            rng.gen::<f64>() * self.size,
            rng.gen::<f64>() * self.size,
        )
    }
}

pub(crate) fn random_positions_in_box<R: Rng>(
    rng: &mut R,
    count: usize,
    size: f64,
) -> Vec<Vector3<f64>> {
    UniformBoxDistribution { size }
        .sample_iter(rng)
        .take(count)
        .collect()
}

/// A regular `size x size` grid of points in the XY plane with the given spacing
pub(crate) fn planar_grid_cloud(name: &str, size: usize, spacing: f64) -> PointCloud {
    let positions = (0..size * size)
        .map(|idx| {
            Vector3::new(
                (idx % size) as f64 * spacing,
                (idx / size) as f64 * spacing,
                0.0,
            )
        })
        .collect();
    PointCloud::from_positions(name, positions)
}
