//! Classification of point clouds from feature values: training, evaluation and classification with an ensemble
//! model, plus the helpers around it (train/test split, confusion matrix, importance report, persistence)

mod confusion;
mod forest;
mod subset;

pub use self::confusion::*;
pub use self::forest::*;
pub use self::subset::*;

use std::{
    borrow::Cow,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
};

use float_ord::FloatOrd;
use log::{info, warn};
use masc_core::cloud::{fields, FieldId, PointCloud};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{MascError, Result},
    progress::{Progress, ProgressMonitor},
    sources::{read_sources_from_file, write_sources_to_file, FeatureSource},
};

/// Hyperparameters of an ensemble model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParameters {
    pub max_depth: usize,
    /// Nodes with fewer samples are not split any further
    pub min_sample_count: usize,
    pub max_tree_count: usize,
    /// Number of randomly chosen features considered per split. 0 means the square root of the feature count
    pub active_var_count: usize,
    pub compute_var_importance: bool,
}

impl Default for TrainingParameters {
    fn default() -> Self {
        Self {
            max_depth: 25,
            min_sample_count: 10,
            max_tree_count: 100,
            active_var_count: 0,
            compute_var_importance: false,
        }
    }
}

/// Dense row-major matrix with one row per sample and one column per feature
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMatrix {
    values: Vec<f64>,
    columns: usize,
}

impl SampleMatrix {
    pub fn new(columns: usize) -> Self {
        Self {
            values: vec![],
            columns,
        }
    }

    /// Creates an empty matrix with memory reserved for `rows` rows
    pub fn with_capacity(rows: usize, columns: usize) -> Result<Self> {
        let mut values = Vec::new();
        values.try_reserve_exact(rows.saturating_mul(columns))?;
        Ok(Self { values, columns })
    }

    /// # Panics
    ///
    /// If `row` does not have exactly one value per column
    pub fn push_row(&mut self, row: &[f64]) {
        assert_eq!(self.columns, row.len(), "row length must match the column count");
        self.values.extend_from_slice(row);
    }

    pub fn rows(&self) -> usize {
        if self.columns == 0 {
            0
        } else {
            self.values.len() / self.columns
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.columns..(row + 1) * self.columns]
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.values[row * self.columns + column]
    }
}

/// An ensemble classifier that can be trained on a [`SampleMatrix`]. Labels are integer class codes
pub trait EnsembleModel: Send + Sync {
    /// Trains the model from scratch. Cancellation through `monitor` aborts the training with
    /// [`MascError::TrainingAborted`] and leaves the previous state of the model untouched
    fn fit(
        &mut self,
        samples: &SampleMatrix,
        labels: &[i32],
        params: &TrainingParameters,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()>;

    fn is_trained(&self) -> bool;

    fn predict(&self, row: &[f64]) -> Result<i32>;

    /// Number of votes per class, for every class the model knows
    fn predict_votes(&self, row: &[f64]) -> Result<Vec<(i32, usize)>>;

    fn tree_count(&self) -> usize;

    /// Importance of every feature, if it was computed during training
    fn variable_importance(&self) -> Option<&[f64]>;

    fn save(&self, path: &Path) -> Result<()>;
}

/// Reads the classification labels of `cloud`. Unlabeled points are NaN
fn labels(cloud: &PointCloud) -> Result<&[f64]> {
    cloud
        .find_field_ignore_case(fields::CLASSIFICATION)
        .and_then(|id| cloud.field(id))
        .map(|field| field.values())
        .ok_or_else(|| {
            MascError::MissingField(format!(
                "cloud {} has no {} field",
                cloud.name(),
                fields::CLASSIFICATION
            ))
        })
}

fn read_columns<'a>(cloud: &'a PointCloud, sources: &[FeatureSource]) -> Result<Vec<Cow<'a, [f64]>>> {
    if sources.is_empty() {
        return Err(MascError::Config("no feature sources given".into()));
    }
    sources.iter().map(|source| source.values(cloud)).collect()
}

/// Builds the sample matrix of the labeled points of `cloud` (restricted to `subset` if given). Returns the matrix,
/// the labels and the point index of every row
fn labeled_samples(
    cloud: &PointCloud,
    sources: &[FeatureSource],
    subset: Option<&[usize]>,
) -> Result<(SampleMatrix, Vec<i32>, Vec<usize>)> {
    let columns = read_columns(cloud, sources)?;
    let labels = labels(cloud)?;
    let out_of_range = subset.and_then(|subset| subset.iter().find(|&&index| index >= cloud.len()));
    if let Some(index) = out_of_range {
        return Err(MascError::Config(format!(
            "point index {} is out of range for cloud {} with {} points",
            index,
            cloud.name(),
            cloud.len()
        )));
    }
    let indices = match subset {
        Some(subset) => subset
            .iter()
            .copied()
            .filter(|&index| !labels[index].is_nan())
            .collect::<Vec<_>>(),
        None => (0..cloud.len())
            .filter(|&index| !labels[index].is_nan())
            .collect(),
    };

    let mut samples = SampleMatrix::with_capacity(indices.len(), columns.len())?;
    let mut row = vec![0.0; columns.len()];
    for &index in &indices {
        for (value, column) in row.iter_mut().zip(&columns) {
            *value = column[index];
        }
        samples.push_row(&row);
    }
    let labels = indices
        .iter()
        .map(|&index| labels[index].round() as i32)
        .collect();
    Ok((samples, labels, indices))
}

/// Trains `model` on the labeled points of `cloud`, or on the labeled points among `subset` if given. Points
/// without a label (NaN) are ignored. The training runs as one task on the current rayon thread pool
///
/// # Errors
///
/// [`MascError::MissingField`] if a source or the classification field is missing, [`MascError::Config`] if there
/// is nothing to train on or `subset` holds an index outside of `cloud`, [`MascError::TrainingAborted`] on
/// cancellation and [`MascError::Model`] if the model is not trained afterwards
pub fn train(
    model: &mut dyn EnsembleModel,
    cloud: &PointCloud,
    sources: &[FeatureSource],
    params: &TrainingParameters,
    subset: Option<&[usize]>,
    monitor: &dyn ProgressMonitor,
) -> Result<()> {
    let (samples, labels, _) = labeled_samples(cloud, sources, subset)?;
    if samples.rows() == 0 {
        return Err(MascError::Config(format!(
            "cloud {} has no labeled training points",
            cloud.name()
        )));
    }
    info!(
        "Training classifier on {} points of {} with {} features",
        samples.rows(),
        cloud.name(),
        sources.len()
    );

    let mut outcome = None;
    rayon::scope(|scope| {
        scope.spawn(|_| {
            outcome = Some(panic::catch_unwind(AssertUnwindSafe(|| {
                model.fit(&samples, &labels, params, monitor)
            })));
        });
    });
    match outcome {
        Some(Ok(result)) => result?,
        _ => return Err(MascError::Internal("model training panicked".into())),
    }

    if !model.is_trained() {
        return Err(MascError::Model("the model was not trained".into()));
    }
    Ok(())
}

/// Result of [`evaluate`]
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub sample_count: usize,
    pub correct: usize,
    /// `correct / sample_count`
    pub ratio: f64,
    pub confusion: ConfusionMatrix,
    /// Index of every evaluated point
    pub indices: Vec<usize>,
    /// Predicted label of every evaluated point
    pub predicted: Vec<i32>,
}

impl Evaluation {
    /// Writes the predicted labels into the field `name` of `cloud`, creating it if necessary. Points that were not
    /// evaluated get NaN
    pub fn write_to(&self, cloud: &mut PointCloud, name: &str) -> Result<FieldId> {
        let id = output_field(cloud, name)?;
        if let Some(field) = cloud.field_mut(id) {
            field.fill(f64::NAN);
            for (&index, &label) in self.indices.iter().zip(&self.predicted) {
                field.set_value(index, label as f64);
            }
            field.compute_min_max();
        }
        Ok(id)
    }
}

fn output_field(cloud: &mut PointCloud, name: &str) -> Result<FieldId> {
    match cloud.field_id(name) {
        Some(id) => Ok(id),
        None => cloud.add_field(name).ok_or_else(|| {
            MascError::Internal(format!("could not create field '{}' on {}", name, cloud.name()))
        }),
    }
}

/// Predicts every labeled point of `cloud` (or of `subset`) and compares the prediction to its label
pub fn evaluate(
    model: &dyn EnsembleModel,
    cloud: &PointCloud,
    sources: &[FeatureSource],
    subset: Option<&[usize]>,
    monitor: &dyn ProgressMonitor,
) -> Result<Evaluation> {
    let (samples, actual, indices) = labeled_samples(cloud, sources, subset)?;
    let progress = Progress::new(monitor, "Evaluating classifier", samples.rows());
    let predicted = (0..samples.rows())
        .into_par_iter()
        .map(|row| {
            if !progress.tick() {
                return Err(MascError::Cancelled);
            }
            model.predict(samples.row(row))
        })
        .collect::<Result<Vec<_>>>()?;

    let correct = actual
        .iter()
        .zip(&predicted)
        .filter(|(actual, predicted)| actual == predicted)
        .count();
    let sample_count = actual.len();
    let ratio = if sample_count == 0 {
        f64::NAN
    } else {
        correct as f64 / sample_count as f64
    };
    info!(
        "Correct guesses: {}/{} ({:.1}%)",
        correct,
        sample_count,
        ratio * 100.0
    );
    Ok(Evaluation {
        sample_count,
        correct,
        ratio,
        confusion: ConfusionMatrix::compute(&actual, &predicted),
        indices,
        predicted,
    })
}

/// Fields written by [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationFields {
    pub labels: FieldId,
    pub confidence: FieldId,
    /// The labels the cloud had before, if any
    pub previous: Option<FieldId>,
}

/// Predicts every point of `cloud` and writes the labels into its classification field. An existing classification
/// field is kept under the name `Classification_prev` (replacing an older one). The confidence of every prediction,
/// i.e. the share of trees that voted for the predicted class, goes into `Classification_confidence`
pub fn classify(
    model: &dyn EnsembleModel,
    cloud: &mut PointCloud,
    sources: &[FeatureSource],
    monitor: &dyn ProgressMonitor,
) -> Result<ClassificationFields> {
    let tree_count = model.tree_count();
    let predictions = {
        let columns = read_columns(cloud, sources)?;
        let progress = Progress::new(monitor, "Classifying", cloud.len());
        (0..cloud.len())
            .into_par_iter()
            .map_init(
                || vec![0.0; columns.len()],
                |row, index| {
                    if !progress.tick() {
                        return Err(MascError::Cancelled);
                    }
                    for (value, column) in row.iter_mut().zip(&columns) {
                        *value = column[index];
                    }
                    let votes = model.predict_votes(row)?;
                    let (label, count) = votes
                        .iter()
                        .copied()
                        .max_by_key(|(label, count)| (*count, std::cmp::Reverse(*label)))
                        .ok_or_else(|| MascError::Model("the model knows no classes".into()))?;
                    Ok((label, count as f64 / tree_count as f64))
                },
            )
            .collect::<Result<Vec<_>>>()?
    };

    let previous_name = format!("{}{}", fields::CLASSIFICATION, fields::PREVIOUS_SUFFIX);
    let previous = match cloud.find_field_ignore_case(fields::CLASSIFICATION) {
        Some(existing) => {
            if let Some(older) = cloud.field_id(&previous_name) {
                cloud.remove_field(older);
            }
            if !cloud.rename_field(existing, previous_name.as_str()) {
                return Err(MascError::Internal(format!(
                    "could not rename field {} of {}",
                    fields::CLASSIFICATION,
                    cloud.name()
                )));
            }
            Some(existing)
        }
        None => None,
    };

    let labels = output_field(cloud, fields::CLASSIFICATION)?;
    let confidence = output_field(cloud, fields::CLASSIFICATION_CONFIDENCE)?;
    write_field(cloud, labels, predictions.iter().map(|(label, _)| *label as f64));
    write_field(cloud, confidence, predictions.iter().map(|(_, confidence)| *confidence));
    cloud.set_displayed_field(labels);
    Ok(ClassificationFields {
        labels,
        confidence,
        previous,
    })
}

fn write_field<I: Iterator<Item = f64>>(cloud: &mut PointCloud, id: FieldId, values: I) {
    if let Some(field) = cloud.field_mut(id) {
        for (target, value) in field.values_mut().iter_mut().zip(values) {
            *target = value;
        }
        field.compute_min_max();
    }
}

/// Importance of every feature source, most important first. `None` if the model did not compute importances
pub fn importance_report(
    model: &dyn EnsembleModel,
    sources: &[FeatureSource],
) -> Option<Vec<(String, f64)>> {
    let importance = model.variable_importance()?;
    if importance.len() != sources.len() {
        warn!(
            "Model has {} importance values but there are {} feature sources",
            importance.len(),
            sources.len()
        );
        return None;
    }
    let mut report = sources
        .iter()
        .map(|source| source.label().to_owned())
        .zip(importance.iter().copied())
        .collect::<Vec<_>>();
    report.sort_by_key(|(_, importance)| std::cmp::Reverse(FloatOrd(*importance)));
    Some(report)
}

/// Path of the feature sources list that belongs to the model stored at `model_path`
pub fn sources_path(model_path: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "classifier".into());
    model_path.with_file_name(format!("{}_sources.txt", stem))
}

/// Stores `model` at `model_path` and its feature sources next to it (see [`sources_path`])
pub fn save_classifier(
    model: &dyn EnsembleModel,
    sources: &[FeatureSource],
    model_path: &Path,
) -> Result<PathBuf> {
    model.save(model_path)?;
    let sources_path = sources_path(model_path);
    write_sources_to_file(sources, &sources_path)?;
    info!(
        "Saved classifier to {} and its sources to {}",
        model_path.display(),
        sources_path.display()
    );
    Ok(sources_path)
}

/// Restores a random forest and its feature sources stored with [`save_classifier`]
pub fn load_classifier(model_path: &Path) -> Result<(RandomForest, Vec<FeatureSource>)> {
    let model = RandomForest::load(model_path)?;
    let sources = read_sources_from_file(sources_path(model_path))?;
    if sources.len() != model.feature_count() {
        return Err(MascError::Model(format!(
            "model expects {} features but {} sources are stored",
            model.feature_count(),
            sources.len()
        )));
    }
    Ok((model, sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CancellationToken, NoProgress};
    use crate::sources::FeatureSourceKind;
    use assert_approx_eq::assert_approx_eq;
    use masc_core::nalgebra::Vector3;

    /// Points on two heights, labeled by height. Every fifth point is unlabeled
    fn labeled_cloud() -> PointCloud {
        let positions = (0..100)
            .map(|i| {
                let z = if i < 50 { 0.0 } else { 10.0 };
                Vector3::new((i % 10) as f64, (i / 10) as f64, z)
            })
            .collect::<Vec<_>>();
        let labels = (0..100)
            .map(|i| match i {
                _ if i % 5 == 4 => f64::NAN,
                _ if i < 50 => 2.0,
                _ => 6.0,
            })
            .collect();
        let mut cloud = PointCloud::from_positions("PC1", positions);
        cloud
            .add_field_with_values(fields::CLASSIFICATION, labels)
            .unwrap();
        cloud
    }

    fn sources() -> Vec<FeatureSource> {
        vec![
            FeatureSource::new(FeatureSourceKind::DimZ, "Z"),
            FeatureSource::new(FeatureSourceKind::DimX, "X"),
        ]
    }

    fn trained(cloud: &PointCloud) -> RandomForest {
        let mut forest = RandomForest::new().with_seed(4);
        let params = TrainingParameters {
            max_tree_count: 15,
            compute_var_importance: true,
            ..Default::default()
        };
        train(&mut forest, cloud, &sources(), &params, None, &NoProgress).unwrap();
        forest
    }

    #[test]
    fn test_sample_matrix() {
        let mut matrix = SampleMatrix::new(3);
        assert_eq!(0, matrix.rows());
        matrix.push_row(&[1.0, 2.0, 3.0]);
        matrix.push_row(&[4.0, 5.0, 6.0]);
        assert_eq!(2, matrix.rows());
        assert_eq!(&[4.0, 5.0, 6.0], matrix.row(1));
        assert_eq!(2.0, matrix.get(0, 1));
    }

    #[test]
    fn test_unlabeled_points_are_skipped() {
        let cloud = labeled_cloud();
        let (samples, labels, indices) = labeled_samples(&cloud, &sources(), None).unwrap();
        assert_eq!(80, samples.rows());
        assert_eq!(80, labels.len());
        assert!(indices.iter().all(|index| index % 5 != 4));

        let (subset_samples, _, subset_indices) =
            labeled_samples(&cloud, &sources(), Some(&[0, 4, 60])).unwrap();
        assert_eq!(2, subset_samples.rows());
        assert_eq!(vec![0, 60], subset_indices);
        assert_eq!(&[10.0, 0.0], subset_samples.row(1));
    }

    #[test]
    fn test_train_and_evaluate() {
        let mut cloud = labeled_cloud();
        let forest = trained(&cloud);
        let evaluation = evaluate(&forest, &cloud, &sources(), None, &NoProgress).unwrap();
        assert_eq!(80, evaluation.sample_count);
        assert_eq!(80, evaluation.correct);
        assert_approx_eq!(1.0, evaluation.ratio);
        assert_eq!(&[2, 6], evaluation.confusion.classes());

        let id = evaluation.write_to(&mut cloud, "Predicted").unwrap();
        let predicted = cloud.field(id).unwrap();
        assert_eq!(2.0, predicted.value(0));
        assert_eq!(6.0, predicted.value(98));
        assert!(predicted.value(4).is_nan());
        assert!(predicted.value(99).is_nan());

        let report = importance_report(&forest, &sources()).unwrap();
        assert_eq!("Z", report[0].0);

        let out_of_range = evaluate(&forest, &cloud, &sources(), Some(&[1, 250]), &NoProgress);
        assert!(matches!(out_of_range, Err(MascError::Config(_))));
    }

    #[test]
    fn test_training_errors() {
        let cloud = labeled_cloud();
        let mut forest = RandomForest::new();
        let params = TrainingParameters::default();
        assert!(matches!(
            train(&mut forest, &cloud, &[], &params, None, &NoProgress),
            Err(MascError::Config(_))
        ));
        assert!(matches!(
            train(&mut forest, &cloud, &sources(), &params, Some(&[4, 9]), &NoProgress),
            Err(MascError::Config(_))
        ));
        let missing = vec![FeatureSource::scalar_field("Intensity")];
        assert!(matches!(
            train(&mut forest, &cloud, &missing, &params, None, &NoProgress),
            Err(MascError::MissingField(_))
        ));

        assert!(matches!(
            train(&mut forest, &cloud, &sources(), &params, Some(&[0, 100]), &NoProgress),
            Err(MascError::Config(_))
        ));

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            train(&mut forest, &cloud, &sources(), &params, None, &token),
            Err(MascError::TrainingAborted)
        ));
    }

    struct PanickingModel;

    impl EnsembleModel for PanickingModel {
        fn fit(
            &mut self,
            _: &SampleMatrix,
            _: &[i32],
            _: &TrainingParameters,
            _: &dyn ProgressMonitor,
        ) -> Result<()> {
            panic!("fit failed")
        }

        fn is_trained(&self) -> bool {
            false
        }

        fn predict(&self, _: &[f64]) -> Result<i32> {
            Ok(0)
        }

        fn predict_votes(&self, _: &[f64]) -> Result<Vec<(i32, usize)>> {
            Ok(vec![])
        }

        fn tree_count(&self) -> usize {
            0
        }

        fn variable_importance(&self) -> Option<&[f64]> {
            None
        }

        fn save(&self, _: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_panicking_training_is_an_internal_error() {
        let cloud = labeled_cloud();
        assert!(matches!(
            train(
                &mut PanickingModel,
                &cloud,
                &sources(),
                &TrainingParameters::default(),
                None,
                &NoProgress
            ),
            Err(MascError::Internal(_))
        ));
    }

    #[test]
    fn test_classify_keeps_previous_labels() {
        let mut cloud = labeled_cloud();
        let forest = trained(&cloud);
        let fields = classify(&forest, &mut cloud, &sources(), &NoProgress).unwrap();

        let previous = cloud.field_by_name("Classification_prev").unwrap();
        assert_eq!(Some(previous.id()), fields.previous);
        assert!(previous.value(4).is_nan());

        let labels = cloud.field(fields.labels).unwrap();
        assert_eq!(fields::CLASSIFICATION, labels.name());
        assert_eq!(2.0, labels.value(4));
        assert_eq!(6.0, labels.value(54));
        let confidence = cloud.field(fields.confidence).unwrap();
        assert!(confidence
            .values()
            .iter()
            .all(|&value| value > 0.5 && value <= 1.0));
        assert_eq!(Some(fields.labels), cloud.displayed_field());

        // Classifying again replaces the older previous labels
        let again = classify(&forest, &mut cloud, &sources(), &NoProgress).unwrap();
        assert_eq!(Some(fields.labels), again.previous);
        assert_eq!(1, cloud.field_names().filter(|name| *name == "Classification_prev").count());
    }

    #[test]
    fn test_save_and_load_classifier() {
        let cloud = labeled_cloud();
        let forest = trained(&cloud);
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let sources_path = save_classifier(&forest, &sources(), &model_path).unwrap();
        assert_eq!(dir.path().join("model_sources.txt"), sources_path);

        let (restored, restored_sources) = load_classifier(&model_path).unwrap();
        assert_eq!(sources(), restored_sources);
        assert_eq!(forest.tree_count(), restored.tree_count());
    }
}
