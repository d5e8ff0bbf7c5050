use log::{debug, info};
use masc_core::{
    cloud::{CloudId, CloudStore, FieldId},
    index::Neighbor,
    nalgebra::Vector3,
};

use super::{ContextFeatureType, FeatureDescriptor, NeighborhoodFeatureType};
use crate::{
    core_points::CorePoints,
    error::{MascError, Result},
    ledger::FieldLedger,
    neighborhood_search::{search_and_evaluate, SearchKind, SearchSummary},
    progress::{Progress, ProgressMonitor},
    sources::FeatureSource,
    stats::Statistic,
    structure_measures::StructureTensor,
};

/// Per-point values that a statistic summarizes over a neighborhood
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ValueSource {
    /// One value per point of the source cloud
    Values(Vec<f64>),
    /// A coordinate axis of the source positions
    Coordinate(usize),
}

/// Computes the value of a feature from a neighborhood
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Evaluator {
    Statistic { stat: Statistic, values: ValueSource },
    Neighborhood(NeighborhoodFeatureType),
    Context(ContextFeatureType),
}

impl Evaluator {
    fn needs_tensor(&self) -> bool {
        match self {
            Evaluator::Neighborhood(ty) => ty.needs_tensor(),
            _ => false,
        }
    }

    fn evaluate(&self, neighborhood: &mut Neighborhood) -> f64 {
        match self {
            Evaluator::Statistic { stat, values } => neighborhood.statistic(*stat, values),
            Evaluator::Neighborhood(ty) => ty.evaluate(neighborhood),
            Evaluator::Context(ty) => ty.evaluate(neighborhood),
        }
    }
}

/// Neighborhood of one core point, reused by a worker for all core points it processes
#[derive(Debug, Default)]
pub(crate) struct Neighborhood {
    query: Vector3<f64>,
    indices: Vec<usize>,
    points: Vec<Vector3<f64>>,
    tensor: Option<StructureTensor>,
    scratch: Vec<f64>,
}

impl Neighborhood {
    fn load(
        &mut self,
        positions: &[Vector3<f64>],
        query: &Vector3<f64>,
        neighbors: &[Neighbor],
        with_tensor: bool,
    ) {
        self.query = *query;
        self.indices.clear();
        self.indices.extend(neighbors.iter().map(|n| n.index));
        self.points.clear();
        self.points
            .extend(neighbors.iter().map(|n| positions[n.index]));
        self.update_tensor(with_tensor);
    }

    /// Loads all of `points` as the neighborhood of `query`
    #[cfg(test)]
    pub(crate) fn load_points(
        &mut self,
        points: &[Vector3<f64>],
        query: &Vector3<f64>,
        with_tensor: bool,
    ) {
        self.query = *query;
        self.indices = (0..points.len()).collect();
        self.points = points.to_vec();
        self.update_tensor(with_tensor);
    }

    fn update_tensor(&mut self, with_tensor: bool) {
        self.tensor = if with_tensor {
            StructureTensor::from_points(&self.points)
        } else {
            None
        };
    }

    pub(crate) fn query(&self) -> &Vector3<f64> {
        &self.query
    }

    pub(crate) fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub(crate) fn len(&self) -> usize {
        self.points.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Structure tensor of the neighborhood. `None` for less than 3 points, or if it was not requested when loading
    pub(crate) fn tensor(&self) -> Option<&StructureTensor> {
        self.tensor.as_ref()
    }

    fn statistic(&mut self, stat: Statistic, source: &ValueSource) -> f64 {
        self.scratch.clear();
        match source {
            ValueSource::Values(values) => self
                .scratch
                .extend(self.indices.iter().map(|&index| values[index])),
            ValueSource::Coordinate(axis) => self
                .scratch
                .extend(self.points.iter().map(|point| point[*axis])),
        }
        stat.compute(&mut self.scratch).unwrap_or(f64::NAN)
    }
}

/// Neighborhood computation of one output field
#[derive(Debug, Clone)]
pub(crate) struct Job {
    /// Cloud in which the neighborhoods are searched
    pub source: CloudId,
    pub search: SearchKind,
    pub evaluator: Evaluator,
    /// Field on the core cloud
    pub output: FieldId,
    /// Index of the descriptor this job belongs to
    pub descriptor: usize,
}

/// Jobs that share the neighborhoods of the same search
struct JobGroup {
    source: CloudId,
    search: SearchKind,
    jobs: Vec<Job>,
}

fn group_jobs(jobs: Vec<Job>) -> Vec<JobGroup> {
    let mut groups: Vec<JobGroup> = vec![];
    for job in jobs {
        let duplicate = groups
            .iter()
            .flat_map(|group| group.jobs.iter())
            .any(|other| other.output == job.output);
        if duplicate {
            continue;
        }
        match groups
            .iter_mut()
            .find(|group| group.source == job.source && group.search == job.search)
        {
            Some(group) => group.jobs.push(job),
            None => groups.push(JobGroup {
                source: job.source,
                search: job.search,
                jobs: vec![job],
            }),
        }
    }
    groups
}

/// Computes all jobs of `group` for every point of the core cloud
fn run_group(
    store: &mut CloudStore,
    core_cloud: CloudId,
    group: &JobGroup,
    monitor: &dyn ProgressMonitor,
) -> Result<SearchSummary> {
    store.ensure_octree(group.source);
    let point_count = store.cloud(core_cloud).len();
    for job in &group.jobs {
        if store.cloud(core_cloud).field(job.output).is_none() {
            return Err(MascError::Internal(format!(
                "output field {} is missing on the core cloud",
                job.output
            )));
        }
    }

    // The output columns are moved out of the core cloud while the store is borrowed for the search, and always
    // moved back afterwards, even if the search was cancelled
    let mut columns = Vec::with_capacity(group.jobs.len());
    let cloud = store.cloud_mut(core_cloud);
    for job in &group.jobs {
        if let Some(field) = cloud.field_mut(job.output) {
            columns.push(field.take_values());
        }
    }

    let result = match store.octree(group.source) {
        Some(octree) => {
            let queries = store.cloud(core_cloud).positions();
            let positions = store.cloud(group.source).positions();
            let with_tensor = group.jobs.iter().any(|job| job.evaluator.needs_tensor());
            let description = format!(
                "Computing {} feature(s) on {} with {:?}",
                group.jobs.len(),
                store.cloud(group.source).name(),
                group.search
            );
            let progress = Progress::new(monitor, &description, queries.len());
            search_and_evaluate(
                octree,
                queries,
                group.search,
                &mut columns,
                &progress,
                Neighborhood::default,
                |neighborhood, query, neighbors, row| {
                    neighborhood.load(positions, query, neighbors, with_tensor);
                    for (job, value) in group.jobs.iter().zip(row.iter_mut()) {
                        *value = job.evaluator.evaluate(neighborhood);
                    }
                },
            )
        }
        None => Err(MascError::Internal("octree was not built".into())),
    };

    let cloud = store.cloud_mut(core_cloud);
    for (job, values) in group.jobs.iter().zip(columns) {
        if let Some(field) = cloud.field_mut(job.output) {
            field.restore_values(values, point_count);
        }
    }
    result
}

/// Computes the features of all `descriptors` on the core points and returns their sources, in the order of the
/// descriptors. The core points are derived first if necessary. Scaled features that search neighborhoods of the
/// same size in the same cloud share one search.
///
/// Output fields are obtained through `ledger`, so that intermediate fields can be released after the run.
///
/// # Errors
///
/// Stops at the first invalid descriptor or failed computation, which marks the affected descriptors as failed.
/// Values computed before are kept. [`MascError::Cancelled`] if `monitor` requests cancellation
pub fn compute_features(
    descriptors: &mut [FeatureDescriptor],
    store: &mut CloudStore,
    core: &mut CorePoints,
    ledger: &mut FieldLedger,
    monitor: &dyn ProgressMonitor,
) -> Result<Vec<FeatureSource>> {
    core.prepare(store)?;
    let core_cloud = core
        .cloud()
        .ok_or_else(|| MascError::Internal("core points are not prepared".into()))?;

    for descriptor in descriptors.iter_mut() {
        if let Err(err) = descriptor.check_validity(core) {
            descriptor.mark_failed();
            return Err(err);
        }
    }

    let mut jobs = vec![];
    for (index, descriptor) in descriptors.iter_mut().enumerate() {
        let mut descriptor_jobs = descriptor.prepare(store, core, ledger)?;
        for job in descriptor_jobs.iter_mut() {
            job.descriptor = index;
        }
        jobs.extend(descriptor_jobs);
    }

    let groups = group_jobs(jobs);
    info!(
        "Computing {} feature(s) with {} neighborhood search(es) on {} core points",
        descriptors.len(),
        groups.len(),
        store.cloud(core_cloud).len()
    );
    for group in &groups {
        match run_group(store, core_cloud, group, monitor) {
            Ok(summary) => debug!(
                "Neighborhood search used octree levels {} to {} ({} changes)",
                summary.initial_level,
                summary.final_level,
                summary.level_changes
            ),
            Err(err) => {
                for job in &group.jobs {
                    descriptors[job.descriptor].mark_failed();
                }
                return Err(err);
            }
        }
    }

    for descriptor in descriptors.iter_mut() {
        descriptor.finish(store)?;
    }

    descriptors
        .iter()
        .map(|descriptor| {
            descriptor.source().cloned().ok_or_else(|| {
                MascError::Internal(format!("feature {} has no source", descriptor.kind()))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core_points::SubsamplingMethod,
        features::{CloudRef, FeatureKind, FeatureState, MathOperator, PointFeatureType},
        ledger::FieldBehavior,
        progress::{CancellationToken, NoProgress},
    };
    use assert_approx_eq::assert_approx_eq;
    use masc_core::cloud::PointCloud;

    /// Flat 11x11 grid with spacing 1 at z = 0, with an intensity equal to x
    fn flat_store() -> (CloudStore, CloudRef) {
        let mut positions = vec![];
        for y in 0..11 {
            for x in 0..11 {
                positions.push(Vector3::new(x as f64, y as f64, 0.0));
            }
        }
        let intensity = positions.iter().map(|p| p.x).collect();
        let mut cloud = PointCloud::from_positions("flat", positions);
        cloud.add_field_with_values("Intensity", intensity).unwrap();
        let mut store = CloudStore::new();
        let id = store.insert(cloud);
        (store, CloudRef::new(id, "PC1"))
    }

    fn center_index() -> usize {
        5 * 11 + 5
    }

    fn neighborhood_feature(ty: NeighborhoodFeatureType, cloud: &CloudRef) -> FeatureDescriptor {
        FeatureDescriptor::new(FeatureKind::Neighborhood(ty), cloud.clone()).scale(2.5)
    }

    #[test]
    fn test_features_share_one_search() {
        let (mut store, pc1) = flat_store();
        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let mut ledger = FieldLedger::new();
        let mut descriptors = vec![
            neighborhood_feature(NeighborhoodFeatureType::NbPts, &pc1),
            neighborhood_feature(NeighborhoodFeatureType::Plana, &pc1),
            FeatureDescriptor::new(FeatureKind::Point(PointFeatureType::Intensity), pc1.clone())
                .scale(2.5)
                .stat(Statistic::Mean),
            FeatureDescriptor::new(FeatureKind::Point(PointFeatureType::Z), pc1.clone()),
        ];

        let sources =
            compute_features(&mut descriptors, &mut store, &mut core, &mut ledger, &NoProgress)
                .unwrap();
        assert_eq!(4, sources.len());
        assert_eq!("NBPTS_SC2.5_PC1", sources[0].name);
        assert_eq!("INT_SC2.5_MEAN_PC1", sources[2].name);
        assert!(descriptors
            .iter()
            .all(|d| d.state() == FeatureState::Finalized));

        let cloud = store.cloud(pc1.id);
        let counts = cloud.field_by_name("NBPTS_SC2.5_PC1").unwrap();
        // Radius 1.25 around a grid point: itself and its 4 direct neighbors
        assert_eq!(5.0, counts.value(center_index()));
        // Corner: itself and 2 neighbors
        assert_eq!(3.0, counts.value(0));
        assert_eq!(Some((3.0, 5.0)), counts.min_max());

        let planarity = cloud.field_by_name("PLANA_SC2.5_PC1").unwrap();
        assert_approx_eq!(1.0, planarity.value(center_index()));
        let mean_intensity = cloud.field_by_name("INT_SC2.5_MEAN_PC1").unwrap();
        assert_approx_eq!(5.0, mean_intensity.value(center_index()));
        assert_approx_eq!(1.0 / 3.0, mean_intensity.value(0));

        assert_eq!(3, ledger.records().len());
        assert_eq!(
            cloud.field_id("INT_SC2.5_MEAN_PC1"),
            cloud.displayed_field()
        );
    }

    #[test]
    fn test_existing_fields_are_reused() {
        let (mut store, pc1) = flat_store();
        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let mut ledger = FieldLedger::new();
        let mut first = vec![neighborhood_feature(NeighborhoodFeatureType::NbPts, &pc1)];
        compute_features(&mut first, &mut store, &mut core, &mut ledger, &NoProgress).unwrap();
        let field_count = store.cloud(pc1.id).fields().len();

        // Tamper with the cached values to detect a recomputation
        let id = first[0].output_field().unwrap();
        store.cloud_mut(pc1.id).field_mut(id).unwrap().fill(-1.0);

        let mut second = vec![
            neighborhood_feature(NeighborhoodFeatureType::NbPts, &pc1),
            neighborhood_feature(NeighborhoodFeatureType::NbPts, &pc1),
        ];
        compute_features(&mut second, &mut store, &mut core, &mut ledger, &NoProgress).unwrap();
        assert!(second.iter().all(|d| d.is_cached()));
        assert_eq!(field_count, store.cloud(pc1.id).fields().len());
        assert_eq!(-1.0, store.cloud(pc1.id).field(id).unwrap().value(0));
    }

    #[test]
    fn test_math_operator_combines_two_clouds() {
        let (mut store, pc1) = flat_store();
        let shifted = store
            .cloud(pc1.id)
            .positions()
            .iter()
            .map(|p| Vector3::new(p.x, p.y, p.z + 1.0))
            .collect::<Vec<_>>();
        let mut pc2 = PointCloud::from_positions("raised", shifted);
        pc2.add_field_with_values("Intensity", vec![2.0; 121])
            .unwrap();
        let pc2 = CloudRef::new(store.insert(pc2), "PC2");

        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let mut ledger = FieldLedger::new();
        let mut descriptors = vec![FeatureDescriptor::new(
            FeatureKind::Point(PointFeatureType::Intensity),
            pc1.clone(),
        )
        .scale(2.5)
        .stat(Statistic::Median)
        .cloud2(pc2, MathOperator::Minus)];
        compute_features(&mut descriptors, &mut store, &mut core, &mut ledger, &NoProgress)
            .unwrap();

        let cloud = store.cloud(pc1.id);
        let combined = cloud
            .field_by_name("INT_SC2.5_MEDIAN_PC1_MINUS_PC2")
            .unwrap();
        // Median of 4, 5, 5, 5, 6 minus the intensity of the only point of the raised cloud within reach
        assert_approx_eq!(3.0, combined.value(center_index()));
        let secondary = cloud.field_id("INT_SC2.5_MEDIAN_PC2").unwrap();
        assert_eq!(
            Some(FieldBehavior::AlwaysRemove),
            ledger.behavior(pc1.id, secondary)
        );

        ledger.release(&mut store, true);
        let cloud = store.cloud(pc1.id);
        assert!(cloud.field_by_name("INT_SC2.5_MEDIAN_PC2").is_none());
        assert!(cloud
            .field_by_name("INT_SC2.5_MEDIAN_PC1_MINUS_PC2")
            .is_some());
    }

    #[test]
    fn test_context_features() {
        let (mut store, pc1) = flat_store();
        let ground = (0..11)
            .flat_map(|y| (0..11).map(move |x| Vector3::new(x as f64, y as f64, -2.0)))
            .collect::<Vec<_>>();
        let ground = CloudRef::new(store.insert(PointCloud::from_positions("ground", ground)), "GND");

        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let mut ledger = FieldLedger::new();
        let mut descriptors = vec![FeatureDescriptor::new(
            FeatureKind::Context(ContextFeatureType::DZ),
            pc1.clone(),
        )
        .k(4)
        .cloud2(ground, MathOperator::None)];
        let sources =
            compute_features(&mut descriptors, &mut store, &mut core, &mut ledger, &NoProgress)
                .unwrap();
        assert_eq!("DZ_K4_PC1_GND", sources[0].name);
        let dz = store.cloud(pc1.id).field_by_name("DZ_K4_PC1_GND").unwrap();
        assert!(dz.values().iter().all(|v| (v - 2.0).abs() < 1e-9));
    }

    #[test]
    fn test_subsampled_core_points() {
        let (mut store, pc1) = flat_store();
        let mut core =
            CorePoints::new(pc1.id, SubsamplingMethod::Random { ratio: 0.5 }).with_seed(7);
        let mut ledger = FieldLedger::new();
        let mut descriptors = vec![neighborhood_feature(NeighborhoodFeatureType::NbPts, &pc1)];
        compute_features(&mut descriptors, &mut store, &mut core, &mut ledger, &NoProgress)
            .unwrap();

        let core_cloud = store.cloud(core.cloud().unwrap());
        assert_eq!(60, core_cloud.len());
        let counts = core_cloud.field_by_name("NBPTS_SC2.5_PC1").unwrap();
        // Neighborhoods are searched in the full cloud
        assert!(counts.values().iter().all(|c| *c >= 3.0 && *c <= 5.0));
        assert!(store
            .cloud(pc1.id)
            .field_by_name("NBPTS_SC2.5_PC1")
            .is_none());
    }

    #[test]
    fn test_cancellation_marks_features_failed() {
        let (mut store, pc1) = flat_store();
        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let mut ledger = FieldLedger::new();
        let mut descriptors = vec![neighborhood_feature(NeighborhoodFeatureType::Plana, &pc1)];
        let token = CancellationToken::new();
        token.cancel();
        let err = compute_features(&mut descriptors, &mut store, &mut core, &mut ledger, &token)
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(FeatureState::Failed, descriptors[0].state());
        // The output field is intact
        let field = store.cloud(pc1.id).field_by_name("PLANA_SC2.5_PC1").unwrap();
        assert_eq!(121, field.len());
    }

    #[test]
    fn test_invalid_descriptor_stops_before_computation() {
        let (mut store, pc1) = flat_store();
        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let mut ledger = FieldLedger::new();
        let mut descriptors = vec![
            neighborhood_feature(NeighborhoodFeatureType::Plana, &pc1),
            FeatureDescriptor::new(FeatureKind::Point(PointFeatureType::Intensity), pc1.clone())
                .scale(1.0),
        ];
        assert!(matches!(
            compute_features(&mut descriptors, &mut store, &mut core, &mut ledger, &NoProgress),
            Err(MascError::Config(_))
        ));
        assert_eq!(FeatureState::Unprepared, descriptors[0].state());
        assert_eq!(FeatureState::Failed, descriptors[1].state());
        assert!(ledger.records().is_empty());
    }
}
