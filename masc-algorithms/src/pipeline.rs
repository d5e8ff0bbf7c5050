use log::{debug, info, warn};
use masc_core::cloud::{CloudId, CloudStore};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    classifier::{
        classify, evaluate, importance_report, train, ClassificationFields, EnsembleModel,
        Evaluation, RandomSubset, TrainingParameters,
    },
    core_points::CorePoints,
    error::{MascError, Result},
    features::{compute_features, FeatureDescriptor},
    ledger::{FieldBehavior, FieldLedger},
    progress::ProgressMonitor,
    sources::FeatureSource,
};

/// Settings of a feature extraction and classification run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Keep the computed feature fields on the clouds once the run is done
    pub keep_intermediate_fields: bool,
    /// Feature fields of the core cloud that are kept in any case
    pub keep_fields: Vec<String>,
    /// Share of the core points held back for testing. Without it, all core points are used for training and no
    /// evaluation takes place
    pub test_ratio: Option<f64>,
    /// Seed for the train/test split
    pub seed: Option<u64>,
    /// Number of worker threads, 0 for one per logical core
    pub num_threads: usize,
    pub training: TrainingParameters,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keep_intermediate_fields: false,
            keep_fields: Vec::new(),
            test_ratio: None,
            seed: None,
            num_threads: 0,
            training: Default::default(),
        }
    }
}

/// Outcome of [`Pipeline::train`]
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Inputs of the trained model, in column order
    pub sources: Vec<FeatureSource>,
    pub training_points: usize,
    /// Evaluation on the held back test points, if a test ratio was configured
    pub evaluation: Option<Evaluation>,
    /// Feature sources sorted by importance, if the model computed importances
    pub importance: Option<Vec<(String, f64)>>,
}

/// Runs feature extraction, training and classification on a dedicated thread pool. Every run tracks the fields
/// it creates and cleans them up when it is done
pub struct Pipeline {
    config: PipelineConfig,
    pool: rayon::ThreadPool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
            .map_err(|err| MascError::Config(format!("can't create thread pool: {}", err)))?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Computes all features. The feature fields stay on the clouds, tracked by `ledger`
    pub fn compute_features(
        &self,
        descriptors: &mut [FeatureDescriptor],
        store: &mut CloudStore,
        core: &mut CorePoints,
        ledger: &mut FieldLedger,
        monitor: &dyn ProgressMonitor,
    ) -> Result<Vec<FeatureSource>> {
        self.pool
            .install(|| compute_features(descriptors, store, core, ledger, monitor))
    }

    /// Computes the features, trains `model` on the labeled core points and evaluates it on the test points
    pub fn train(
        &self,
        descriptors: &mut [FeatureDescriptor],
        model: &mut dyn EnsembleModel,
        store: &mut CloudStore,
        core: &mut CorePoints,
        monitor: &dyn ProgressMonitor,
    ) -> Result<TrainingReport> {
        let mut ledger = FieldLedger::new();
        let report = self.pool.install(|| {
            let sources = compute_features(descriptors, store, core, &mut ledger, monitor)?;
            self.keep_requested_fields(&mut ledger, store, core)?;
            let cloud = store.cloud(core_cloud(core)?);

            let (training_points, evaluation) = match self.config.test_ratio {
                Some(ratio) => {
                    let mut rng = match self.config.seed {
                        Some(seed) => StdRng::seed_from_u64(seed),
                        None => StdRng::from_entropy(),
                    };
                    let split = RandomSubset::new(cloud.len(), ratio, &mut rng)?;
                    info!(
                        "Split {} core points into {} training and {} test points",
                        cloud.len(),
                        split.outside().len(),
                        split.inside().len()
                    );
                    train(
                        model,
                        cloud,
                        &sources,
                        &self.config.training,
                        Some(split.outside()),
                        monitor,
                    )?;
                    let evaluation = evaluate(model, cloud, &sources, Some(split.inside()), monitor)?;
                    (split.outside().len(), Some(evaluation))
                }
                None => {
                    train(model, cloud, &sources, &self.config.training, None, monitor)?;
                    (cloud.len(), None)
                }
            };
            let importance = importance_report(model, &sources);
            Ok(TrainingReport {
                sources,
                training_points,
                evaluation,
                importance,
            })
        });
        self.release(&mut ledger, store);
        report
    }

    /// Computes the features and classifies the core points with a trained `model`. `sources` are the inputs the
    /// model was trained with, the descriptors have to produce them
    pub fn classify(
        &self,
        descriptors: &mut [FeatureDescriptor],
        model: &dyn EnsembleModel,
        sources: &[FeatureSource],
        store: &mut CloudStore,
        core: &mut CorePoints,
        monitor: &dyn ProgressMonitor,
    ) -> Result<ClassificationFields> {
        let mut ledger = FieldLedger::new();
        let fields = self.pool.install(|| {
            let computed = compute_features(descriptors, store, core, &mut ledger, monitor)?;
            self.keep_requested_fields(&mut ledger, store, core)?;
            if let Some(missing) = sources.iter().find(|source| !computed.contains(source)) {
                return Err(MascError::MissingField(format!(
                    "the features don't produce the classifier input {}",
                    missing
                )));
            }
            let cloud = store.cloud_mut(core_cloud(core)?);
            classify(model, cloud, sources, monitor)
        });
        self.release(&mut ledger, store);
        fields
    }

    /// Flags the fields named in `keep_fields` so that releasing `ledger` leaves them on the core cloud. Fields
    /// that existed before the run are not tracked and stay anyway
    fn keep_requested_fields(
        &self,
        ledger: &mut FieldLedger,
        store: &CloudStore,
        core: &CorePoints,
    ) -> Result<()> {
        let id = core_cloud(core)?;
        let cloud = store.cloud(id);
        for name in &self.config.keep_fields {
            match cloud.field_id(name) {
                Some(field) => {
                    if ledger.upgrade(id, field, FieldBehavior::AlwaysKeep) {
                        debug!("Keeping scalar field '{}' on {}", name, cloud.name());
                    }
                }
                None => warn!("Can't keep scalar field '{}', {} has no such field", name, cloud.name()),
            }
        }
        Ok(())
    }

    fn release(&self, ledger: &mut FieldLedger, store: &mut CloudStore) {
        let removed = ledger.release(store, self.config.keep_intermediate_fields);
        info!("Removed {} intermediate scalar fields", removed);
    }
}

fn core_cloud(core: &CorePoints) -> Result<CloudId> {
    core.cloud()
        .ok_or_else(|| MascError::Internal("core points are not prepared".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::RandomForest,
        core_points::SubsamplingMethod,
        features::{CloudRef, FeatureKind, NeighborhoodFeatureType, PointFeatureType},
        progress::NoProgress,
        sources::FeatureSourceKind,
    };
    use masc_core::{
        cloud::{fields, PointCloud},
        nalgebra::Vector3,
    };

    /// A ground grid (class 2) and a roof grid 6 units above it (class 6)
    fn store() -> (CloudStore, CloudRef) {
        let mut positions = vec![];
        let mut labels = vec![];
        for (z, label) in [(0.0, 2.0), (6.0, 6.0)].iter() {
            for y in 0..10 {
                for x in 0..10 {
                    positions.push(Vector3::new(x as f64, y as f64, *z));
                    labels.push(*label);
                }
            }
        }
        let mut cloud = PointCloud::from_positions("scene", positions);
        cloud
            .add_field_with_values(fields::CLASSIFICATION, labels)
            .unwrap();
        let mut store = CloudStore::new();
        let id = store.insert(cloud);
        (store, CloudRef::new(id, "PC1"))
    }

    fn descriptors(pc1: &CloudRef) -> Vec<FeatureDescriptor> {
        vec![
            FeatureDescriptor::new(FeatureKind::Point(PointFeatureType::Z), pc1.clone()),
            FeatureDescriptor::new(
                FeatureKind::Neighborhood(NeighborhoodFeatureType::NbPts),
                pc1.clone(),
            )
            .scale(2.5),
        ]
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            test_ratio: Some(0.25),
            seed: Some(3),
            num_threads: 2,
            training: TrainingParameters {
                max_tree_count: 10,
                compute_var_importance: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_train_with_split() {
        let (mut store, pc1) = store();
        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let pipeline = Pipeline::new(config()).unwrap();
        let mut forest = RandomForest::new().with_seed(8);
        let report = pipeline
            .train(&mut descriptors(&pc1), &mut forest, &mut store, &mut core, &NoProgress)
            .unwrap();

        assert_eq!(
            vec![
                FeatureSource::new(FeatureSourceKind::DimZ, "Z"),
                FeatureSource::scalar_field("NBPTS_SC2.5_PC1"),
            ],
            report.sources
        );
        assert_eq!(150, report.training_points);
        let evaluation = report.evaluation.unwrap();
        assert_eq!(50, evaluation.sample_count);
        assert_eq!(50, evaluation.correct);
        assert_eq!("Z", report.importance.unwrap()[0].0);

        // The feature field is intermediate
        assert!(store.cloud(pc1.id).field_by_name("NBPTS_SC2.5_PC1").is_none());
    }

    #[test]
    fn test_classify_keeps_fields_on_request() {
        let (mut store, pc1) = store();
        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let pipeline = Pipeline::new(PipelineConfig {
            keep_intermediate_fields: true,
            test_ratio: None,
            ..config()
        })
        .unwrap();
        let mut forest = RandomForest::new().with_seed(8);
        let report = pipeline
            .train(&mut descriptors(&pc1), &mut forest, &mut store, &mut core, &NoProgress)
            .unwrap();
        assert!(report.evaluation.is_none());

        let fields = pipeline
            .classify(
                &mut descriptors(&pc1),
                &forest,
                &report.sources,
                &mut store,
                &mut core,
                &NoProgress,
            )
            .unwrap();
        let cloud = store.cloud(pc1.id);
        assert!(fields.previous.is_some());
        assert_eq!(6.0, cloud.field(fields.labels).unwrap().value(150));
        assert!(cloud.field_by_name("NBPTS_SC2.5_PC1").is_some());
    }

    #[test]
    fn test_requested_fields_survive_the_cleanup() {
        let (mut store, pc1) = store();
        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let pipeline = Pipeline::new(PipelineConfig {
            keep_fields: vec!["NBPTS_SC2.5_PC1".into(), "UNKNOWN".into()],
            ..config()
        })
        .unwrap();
        let mut forest = RandomForest::new().with_seed(8);
        let mut features = descriptors(&pc1);
        features.push(
            FeatureDescriptor::new(
                FeatureKind::Neighborhood(NeighborhoodFeatureType::NbPts),
                pc1.clone(),
            )
            .scale(1.5),
        );
        pipeline
            .train(&mut features, &mut forest, &mut store, &mut core, &NoProgress)
            .unwrap();

        let cloud = store.cloud(pc1.id);
        let kept = cloud.field_by_name("NBPTS_SC2.5_PC1").unwrap();
        assert_eq!(0, (0..kept.len()).filter(|&index| kept.value(index).is_nan()).count());
        assert!(cloud.field_by_name("NBPTS_SC1.5_PC1").is_none());
        assert!(cloud.field_by_name("UNKNOWN").is_none());
    }

    #[test]
    fn test_classify_requires_the_trained_sources() {
        let (mut store, pc1) = store();
        let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
        let pipeline = Pipeline::new(config()).unwrap();
        let mut forest = RandomForest::new().with_seed(8);
        let report = pipeline
            .train(&mut descriptors(&pc1), &mut forest, &mut store, &mut core, &NoProgress)
            .unwrap();

        let mut only_z = descriptors(&pc1);
        only_z.truncate(1);
        let result = pipeline.classify(
            &mut only_z,
            &forest,
            &report.sources,
            &mut store,
            &mut core,
            &NoProgress,
        );
        assert!(matches!(result, Err(MascError::MissingField(_))));
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"test_ratio": 0.2, "training": {"max_tree_count": 50}}"#)
                .unwrap();
        assert_eq!(Some(0.2), config.test_ratio);
        assert!(!config.keep_intermediate_fields);
        assert!(config.keep_fields.is_empty());
        assert_eq!(50, config.training.max_tree_count);
        assert_eq!(25, config.training.max_depth);
    }
}
