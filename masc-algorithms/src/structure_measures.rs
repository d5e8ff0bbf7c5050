//! Structure measures computed from the structure tensor (the covariance matrix) of a local neighborhood. The
//! definitions of the eigenvalue-based measures follow 'FEATURE RELEVANCE ASSESSMENT FOR THE SEMANTIC INTERPRETATION
//! OF 3D POINT CLOUD DATA' (Martin Weinmann, Boris Jutzi, Clément Mallet, ISPRS Annals of the Photogrammetry, Remote
//! Sensing and Spatial Information Sciences, Volume II-5/W2, 2013)

use masc_core::nalgebra::{Matrix3, Matrix6, SymmetricEigen, Vector3, Vector6};

/// Eigen decomposition of the structure tensor of a set of points. Eigenvalues are sorted in descending order and
/// the eigenvectors match them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructureTensor {
    pub centroid: Vector3<f64>,
    pub eigenvalues: [f64; 3],
    pub eigenvectors: [Vector3<f64>; 3],
}

impl StructureTensor {
    /// Computes the structure tensor of `points`. Returns `None` for less than 3 points or if the decomposition
    /// produced non-finite values
    pub fn from_points(points: &[Vector3<f64>]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let centroid = calc_centroid(points);
        let covariance_matrix = calc_covariance_matrix(&centroid, points);
        let eigen = SymmetricEigen::new(covariance_matrix);

        let mut order = [0, 1, 2];
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        // Round-off can produce tiny negative eigenvalues for flat neighborhoods
        let eigenvalues = [
            eigen.eigenvalues[order[0]].max(0.0),
            eigen.eigenvalues[order[1]].max(0.0),
            eigen.eigenvalues[order[2]].max(0.0),
        ];
        if eigenvalues.iter().any(|e| !e.is_finite()) {
            return None;
        }
        let eigenvectors = [
            eigen.eigenvectors.column(order[0]).into_owned(),
            eigen.eigenvectors.column(order[1]).into_owned(),
            eigen.eigenvectors.column(order[2]).into_owned(),
        ];

        Some(Self {
            centroid,
            eigenvalues,
            eigenvectors,
        })
    }

    /// Eigenvalues divided by their sum
    pub fn normalized_eigenvalues(&self) -> [f64; 3] {
        let sum = self.eigenvalues.iter().sum::<f64>();
        [
            self.eigenvalues[0] / sum,
            self.eigenvalues[1] / sum,
            self.eigenvalues[2] / sum,
        ]
    }

    /// `(l1 - l2) / l1`
    pub fn linearity(&self) -> f64 {
        let [e1, e2, _] = self.normalized_eigenvalues();
        (e1 - e2) / e1
    }

    /// `(l2 - l3) / l1`
    pub fn planarity(&self) -> f64 {
        let [e1, e2, e3] = self.normalized_eigenvalues();
        (e2 - e3) / e1
    }

    /// `l3 / l1`
    pub fn sphericity(&self) -> f64 {
        let [e1, _, e3] = self.normalized_eigenvalues();
        e3 / e1
    }

    /// `(l1 - l3) / l1`
    pub fn anisotropy(&self) -> f64 {
        let [e1, _, e3] = self.normalized_eigenvalues();
        (e1 - e3) / e1
    }

    /// Normal of the least squares plane, oriented towards +Z
    pub fn normal(&self) -> Vector3<f64> {
        let normal = self.eigenvectors[2];
        if normal.z < 0.0 {
            -normal
        } else {
            normal
        }
    }

    /// Distance of `point` to the least squares plane
    pub fn distance_to_plane(&self, point: &Vector3<f64>) -> f64 {
        (point - self.centroid).dot(&self.eigenvectors[2]).abs()
    }

    /// Expresses `point` in the local frame spanned by the eigenvectors, centered on the centroid
    pub fn to_local_frame(&self, point: &Vector3<f64>) -> Vector3<f64> {
        let offset = point - self.centroid;
        Vector3::new(
            offset.dot(&self.eigenvectors[0]),
            offset.dot(&self.eigenvectors[1]),
            offset.dot(&self.eigenvectors[2]),
        )
    }
}

/// Dip angle in degrees (0 for a horizontal plane, 90 for a vertical one) of a plane with the given upward `normal`
pub fn dip_degrees(normal: &Vector3<f64>) -> f64 {
    let horizontal = (normal.x * normal.x + normal.y * normal.y).sqrt();
    horizontal.atan2(normal.z.abs()).to_degrees()
}

/// Dip direction in degrees, measured clockwise from +Y within `[0; 360)`, of a plane with the given upward `normal`
pub fn dip_direction_degrees(normal: &Vector3<f64>) -> f64 {
    let direction = normal.x.atan2(normal.y).to_degrees();
    if direction < 0.0 {
        direction + 360.0
    } else {
        direction
    }
}

/// Mean curvature at `query` of the quadric `w = a + b*u + c*v + d*u² + e*u*v + f*v²` fitted in the local
/// frame of the `tensor`. Requires at least 6 points, returns `None` if the least squares system is singular
pub fn quadric_mean_curvature(
    tensor: &StructureTensor,
    points: &[Vector3<f64>],
    query: &Vector3<f64>,
) -> Option<f64> {
    if points.len() < 6 {
        return None;
    }
    let mut normal_matrix = Matrix6::<f64>::zeros();
    let mut rhs = Vector6::<f64>::zeros();
    for point in points {
        let local = tensor.to_local_frame(point);
        let (u, v, w) = (local.x, local.y, local.z);
        let row = Vector6::new(1.0, u, v, u * u, u * v, v * v);
        normal_matrix += row * row.transpose();
        rhs += row * w;
    }
    let coefficients = normal_matrix.cholesky()?.solve(&rhs);
    if coefficients.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let local_query = tensor.to_local_frame(query);
    let (u, v) = (local_query.x, local_query.y);
    let fu = coefficients[1] + 2.0 * coefficients[3] * u + coefficients[4] * v;
    let fv = coefficients[2] + coefficients[4] * u + 2.0 * coefficients[5] * v;
    let fuu = 2.0 * coefficients[3];
    let fuv = coefficients[4];
    let fvv = 2.0 * coefficients[5];
    let gradient = 1.0 + fu * fu + fv * fv;
    let mean_curvature = ((1.0 + fv * fv) * fuu - 2.0 * fu * fv * fuv + (1.0 + fu * fu) * fvv)
        / (2.0 * gradient.powf(1.5));
    Some(mean_curvature)
}

/// First order moment around `query` along the first principal axis: `(sum d)² / (n * sum d²)` with `d` being the
/// offset of each point to `query` projected onto the axis
pub fn first_order_moment(
    tensor: &StructureTensor,
    points: &[Vector3<f64>],
    query: &Vector3<f64>,
) -> f64 {
    let axis = tensor.eigenvectors[0];
    let (sum, sum_of_squares) = points.iter().fold((0.0, 0.0), |(sum, squares), point| {
        let d = (point - query).dot(&axis);
        (sum + d, squares + d * d)
    });
    (sum * sum) / (points.len() as f64 * sum_of_squares)
}

pub(crate) fn calc_centroid(knn: &[Vector3<f64>]) -> Vector3<f64> {
    let sum: Vector3<f64> = knn.iter().sum();

    sum / (knn.len() as f64)
}

fn calc_covariance_matrix(centroid: &Vector3<f64>, knn: &[Vector3<f64>]) -> Matrix3<f64> {
    let unweighted_covariance_matrix: Matrix3<f64> = knn
        .iter()
        .map(|v| {
            let diff: Vector3<f64> = v - centroid;
            diff * diff.transpose()
        })
        .sum();
    unweighted_covariance_matrix / knn.len() as f64
}
