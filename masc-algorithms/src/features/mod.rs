//! Feature descriptors. A descriptor names one per-point feature of the core points, e.g. the planarity of the
//! neighborhood at a given scale or the median intensity around each point. [`compute_features`] takes every
//! descriptor through the same lifecycle: the validity check, `prepare` (which names and allocates the output
//! field) and `finish`. The values of all scaled features are computed in between, with one neighborhood search
//! per cloud and scale for all descriptors that share it.
//!
//! Output fields are named canonically from the feature type, the scale, the statistic, the cloud labels and the
//! math operator. A field with the canonical name that exists already is reused instead of being recomputed.

mod compute;
mod context;
mod dual_cloud;
mod neighborhood;
mod point;

pub use self::compute::compute_features;
pub use self::context::ContextFeatureType;
pub use self::dual_cloud::DualCloudFeatureType;
pub use self::neighborhood::NeighborhoodFeatureType;
pub use self::point::PointFeatureType;

use std::{fmt::Display, str::FromStr};

use log::debug;
use masc_core::cloud::{CloudId, CloudStore, FieldId};
use serde::{Deserialize, Serialize};

use self::compute::{Evaluator, Job};
use crate::{
    core_points::CorePoints,
    error::{MascError, Result},
    ledger::{FieldBehavior, FieldLedger},
    neighborhood_search::SearchKind,
    sources::FeatureSource,
    stats::Statistic,
};

/// Combines the feature values computed on two clouds into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathOperator {
    None,
    Minus,
    Plus,
    Divide,
    Multiply,
}

impl MathOperator {
    /// Keyword used in feature names, `None` for [`MathOperator::None`]
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            MathOperator::None => None,
            MathOperator::Minus => Some("MINUS"),
            MathOperator::Plus => Some("PLUS"),
            MathOperator::Divide => Some("DIVIDE"),
            MathOperator::Multiply => Some("MULTIPLY"),
        }
    }

    /// Applies this operator. [`MathOperator::None`] returns `a`, a division by zero gives NaN
    /// ```
    /// # use masc_algorithms::features::MathOperator;
    /// assert_eq!(1.5, MathOperator::Minus.apply(2.0, 0.5));
    /// assert!(MathOperator::Divide.apply(2.0, 0.0).is_nan());
    /// ```
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            MathOperator::None => a,
            MathOperator::Minus => a - b,
            MathOperator::Plus => a + b,
            MathOperator::Divide => {
                if b == 0.0 {
                    f64::NAN
                } else {
                    a / b
                }
            }
            MathOperator::Multiply => a * b,
        }
    }
}

impl Default for MathOperator {
    fn default() -> Self {
        MathOperator::None
    }
}

impl FromStr for MathOperator {
    type Err = MascError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(MathOperator::None),
            "MINUS" => Ok(MathOperator::Minus),
            "PLUS" => Ok(MathOperator::Plus),
            "DIVIDE" => Ok(MathOperator::Divide),
            "MULTIPLY" => Ok(MathOperator::Multiply),
            _ => Err(MascError::InvalidFeatureType(format!(
                "unknown operator '{}'",
                s
            ))),
        }
    }
}

/// A cloud together with the role label under which it appears in feature names (e.g. `PC1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CloudRef {
    pub id: CloudId,
    pub label: String,
}

impl CloudRef {
    pub fn new<S: Into<String>>(id: CloudId, label: S) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureState {
    Unprepared,
    Prepared,
    Finalized,
    Failed,
}

/// Parameters shared by all feature types
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureParams {
    /// Cloud in which neighborhoods are searched
    pub cloud1: Option<CloudRef>,
    /// Second cloud, combined with `cloud1` by `op`, or the context cloud of context features
    pub cloud2: Option<CloudRef>,
    /// Neighborhood diameter, NaN for scale-less features
    pub scale: f64,
    /// Number of context points of context features
    pub k: usize,
    pub stat: Option<Statistic>,
    pub op: MathOperator,
}

impl FeatureParams {
    pub fn is_scaled(&self) -> bool {
        !self.scale.is_nan()
    }
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            cloud1: None,
            cloud2: None,
            scale: f64::NAN,
            k: 0,
            stat: None,
            op: MathOperator::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureKind {
    Point(PointFeatureType),
    Neighborhood(NeighborhoodFeatureType),
    Context(ContextFeatureType),
    DualCloud(DualCloudFeatureType),
}

impl FeatureKind {
    /// Resolves a feature keyword. `DIP` and `DIPDIR` exist both as point features (computed from the normals) and
    /// as neighborhood features (computed from the neighborhood itself); a scaled feature without statistic is
    /// the neighborhood variant
    /// ```
    /// # use masc_algorithms::features::*;
    /// assert_eq!(
    ///     FeatureKind::Neighborhood(NeighborhoodFeatureType::Dip),
    ///     FeatureKind::parse("DIP", true, false).unwrap()
    /// );
    /// assert_eq!(
    ///     FeatureKind::Point(PointFeatureType::Dip),
    ///     FeatureKind::parse("DIP", true, true).unwrap()
    /// );
    /// ```
    pub fn parse(keyword: &str, scaled: bool, with_stat: bool) -> Result<Self> {
        let point = keyword.parse().ok().map(FeatureKind::Point);
        let neighborhood = keyword.parse().ok().map(FeatureKind::Neighborhood);
        let (first, second) = if scaled && !with_stat {
            (neighborhood, point)
        } else {
            (point, neighborhood)
        };
        first
            .or(second)
            .or_else(|| keyword.parse().ok().map(FeatureKind::Context))
            .or_else(|| keyword.parse().ok().map(FeatureKind::DualCloud))
            .ok_or_else(|| {
                MascError::InvalidFeatureType(format!("unknown feature '{}'", keyword))
            })
    }
}

impl Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureKind::Point(ty) => write!(f, "{}", ty),
            FeatureKind::Neighborhood(ty) => write!(f, "{}", ty),
            FeatureKind::Context(ty) => write!(f, "{}", ty),
            FeatureKind::DualCloud(ty) => write!(f, "{}", ty),
        }
    }
}

/// Field produced by a prepared descriptor on the core cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Output {
    primary: FieldId,
    /// Values computed on the second cloud, combined into `primary` in `finish`
    secondary: Option<FieldId>,
    /// The field existed before and is reused as is
    cached: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Prepared {
    core_cloud: CloudId,
    source: FeatureSource,
    output: Option<Output>,
}

/// One feature of the core points
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDescriptor {
    kind: FeatureKind,
    params: FeatureParams,
    state: FeatureState,
    prepared: Option<Prepared>,
}

impl FeatureDescriptor {
    /// Creates a scale-less descriptor of the given kind on `cloud1`
    pub fn new(kind: FeatureKind, cloud1: CloudRef) -> Self {
        Self::with_params(
            kind,
            FeatureParams {
                cloud1: Some(cloud1),
                ..Default::default()
            },
        )
    }

    pub fn with_params(kind: FeatureKind, params: FeatureParams) -> Self {
        Self {
            kind,
            params,
            state: FeatureState::Unprepared,
            prepared: None,
        }
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.params.scale = scale;
        self
    }

    pub fn stat(mut self, stat: Statistic) -> Self {
        self.params.stat = Some(stat);
        self
    }

    pub fn k(mut self, k: usize) -> Self {
        self.params.k = k;
        self
    }

    /// Sets the second cloud. Point and neighborhood features combine their values on both clouds with `op`
    pub fn cloud2(mut self, cloud: CloudRef, op: MathOperator) -> Self {
        self.params.cloud2 = Some(cloud);
        self.params.op = op;
        self
    }

    pub fn kind(&self) -> &FeatureKind {
        &self.kind
    }

    pub fn params(&self) -> &FeatureParams {
        &self.params
    }

    pub fn state(&self) -> FeatureState {
        self.state
    }

    /// Returns where the values of this feature can be read from. Available once the descriptor is prepared
    pub fn source(&self) -> Option<&FeatureSource> {
        self.prepared.as_ref().map(|prepared| &prepared.source)
    }

    /// Returns the output field on the core cloud, if this feature has one and is prepared
    pub fn output_field(&self) -> Option<FieldId> {
        self.prepared
            .as_ref()
            .and_then(|prepared| prepared.output)
            .map(|output| output.primary)
    }

    /// Returns `true` if the prepared output field existed before and is reused without recomputation
    pub fn is_cached(&self) -> bool {
        self.prepared
            .as_ref()
            .and_then(|prepared| prepared.output)
            .map_or(false, |output| output.cached)
    }

    fn cloud1(&self) -> Result<&CloudRef> {
        self.params
            .cloud1
            .as_ref()
            .ok_or_else(|| MascError::Config(format!("feature {} has no cloud", self.kind)))
    }

    fn second_cloud(&self) -> Result<&CloudRef> {
        self.params.cloud2.as_ref().ok_or_else(|| {
            MascError::Config(format!("feature {} has no second cloud", self.kind))
        })
    }

    /// Name of the feature computed on the cloud labelled `label` alone
    fn single_cloud_name(&self, label: &str) -> Result<String> {
        let params = &self.params;
        let name = match &self.kind {
            FeatureKind::Point(ty) if params.is_scaled() => {
                let stat = params.stat.ok_or_else(|| {
                    MascError::Config(format!("scaled feature {} needs a statistic", ty))
                })?;
                format!("{}_SC{}_{}_{}", ty, params.scale, stat, label)
            }
            FeatureKind::Point(ty) => format!("{}_{}", ty, label),
            FeatureKind::Neighborhood(ty) => format!("{}_SC{}_{}", ty, params.scale, label),
            FeatureKind::Context(ty) => {
                let context = self.second_cloud()?;
                let scale = if params.is_scaled() {
                    format!("_SC{}", params.scale)
                } else {
                    String::new()
                };
                format!("{}{}_K{}_{}_{}", ty, scale, params.k, label, context.label)
            }
            FeatureKind::DualCloud(ty) => {
                format!("{}_SC{}_{}_{}", ty, params.scale, label, self.second_cloud()?.label)
            }
        };
        Ok(name)
    }

    /// Returns the canonical name of the output field. Equal descriptors always produce the same name
    /// ```
    /// # use masc_algorithms::features::*;
    /// # use masc_algorithms::stats::Statistic;
    /// # use masc_core::cloud::{CloudStore, PointCloud};
    /// # let mut store = CloudStore::new();
    /// # let pc1 = store.insert(PointCloud::default());
    /// # let pc2 = store.insert(PointCloud::default());
    /// let feature = FeatureDescriptor::new(FeatureKind::Point(PointFeatureType::Intensity), CloudRef::new(pc1, "PC1"))
    ///     .scale(2.0)
    ///     .stat(Statistic::Median)
    ///     .cloud2(CloudRef::new(pc2, "PC2"), MathOperator::Minus);
    /// assert_eq!("INT_SC2_MEDIAN_PC1_MINUS_PC2", feature.name().unwrap());
    /// ```
    pub fn name(&self) -> Result<String> {
        let mut name = self.single_cloud_name(&self.cloud1()?.label)?;
        if let Some(op) = self.params.op.keyword() {
            name = format!("{}_{}_{}", name, op, self.second_cloud()?.label);
        }
        Ok(name)
    }

    /// Checks the parameters of this descriptor against the core points, whose origin and derived cloud are the
    /// only clouds on which scale-less features can be read
    ///
    /// # Errors
    ///
    /// [`MascError::Config`] for missing or contradicting parameters
    pub fn check_validity(&self, core: &CorePoints) -> Result<()> {
        let params = &self.params;
        let cloud1 = self.cloud1()?;
        if params.is_scaled() && !(params.scale > 0.0 && params.scale.is_finite()) {
            return Err(MascError::Config(format!(
                "feature {} has an invalid scale {}",
                self.kind, params.scale
            )));
        }
        let two_clouds = matches!(
            self.kind,
            FeatureKind::Context(_) | FeatureKind::DualCloud(_)
        );
        if two_clouds {
            self.second_cloud()?;
            if params.op != MathOperator::None {
                return Err(MascError::Config(format!(
                    "feature {} does not support math operators",
                    self.kind
                )));
            }
        } else if params.op != MathOperator::None {
            self.second_cloud()?;
        } else if params.cloud2.is_some() {
            return Err(MascError::Config(format!(
                "feature {} has a second cloud but no operator",
                self.kind
            )));
        }

        match &self.kind {
            FeatureKind::Point(_) if !params.is_scaled() => {
                let is_core = cloud1.id == core.origin() || Some(cloud1.id) == core.cloud();
                if !is_core {
                    return Err(MascError::Config(format!(
                        "scale-less feature {} can only be computed on the core points",
                        self.kind
                    )));
                }
                if params.op != MathOperator::None {
                    return Err(MascError::Config(format!(
                        "scale-less feature {} can't be combined with a second cloud",
                        self.kind
                    )));
                }
            }
            FeatureKind::Point(_) => {
                if params.stat.is_none() {
                    return Err(MascError::Config(format!(
                        "scaled feature {} needs a statistic",
                        self.kind
                    )));
                }
            }
            FeatureKind::Neighborhood(_) => {
                if !params.is_scaled() {
                    return Err(MascError::Config(format!(
                        "neighborhood feature {} needs a scale",
                        self.kind
                    )));
                }
                if params.stat.is_some() {
                    return Err(MascError::Config(format!(
                        "neighborhood feature {} does not take a statistic",
                        self.kind
                    )));
                }
            }
            FeatureKind::Context(_) => {
                if params.k == 0 && !params.is_scaled() {
                    return Err(MascError::Config(format!(
                        "context feature {} needs a scale or at least one neighbor",
                        self.kind
                    )));
                }
            }
            FeatureKind::DualCloud(_) => {}
        }
        Ok(())
    }

    /// Names the output field and obtains it through `ledger`. Scale-less point features are read or computed
    /// immediately; for scaled features the returned jobs describe the neighborhood computations that fill the
    /// output field. A field with the canonical name that exists already is reused and yields no jobs
    ///
    /// # Errors
    ///
    /// If the descriptor is invalid, was prepared before, or a source field is missing. The descriptor is marked
    /// as [`FeatureState::Failed`] in that case
    pub(crate) fn prepare(
        &mut self,
        store: &mut CloudStore,
        core: &CorePoints,
        ledger: &mut FieldLedger,
    ) -> Result<Vec<Job>> {
        if self.state != FeatureState::Unprepared {
            self.state = FeatureState::Failed;
            return Err(MascError::Internal(format!(
                "feature {} was prepared twice",
                self.kind
            )));
        }
        match self.try_prepare(store, core, ledger) {
            Ok((prepared, jobs)) => {
                self.prepared = Some(prepared);
                self.state = FeatureState::Prepared;
                Ok(jobs)
            }
            Err(err) => {
                self.state = FeatureState::Failed;
                Err(err)
            }
        }
    }

    fn try_prepare(
        &self,
        store: &mut CloudStore,
        core: &CorePoints,
        ledger: &mut FieldLedger,
    ) -> Result<(Prepared, Vec<Job>)> {
        let core_cloud = core
            .cloud()
            .ok_or_else(|| MascError::Internal("core points are not prepared".into()))?;

        if let FeatureKind::DualCloud(ty) = &self.kind {
            return Err(MascError::NotImplemented(format!(
                "dual cloud feature {}",
                ty
            )));
        }

        if let FeatureKind::Point(ty) = &self.kind {
            if !self.params.is_scaled() {
                return self.prepare_scale_less(ty, store, core_cloud, ledger);
            }
        }

        let name = self.name()?;
        let primary = ledger.prepare(store, core_cloud, &name, FieldBehavior::CanRemove);
        let mut prepared = Prepared {
            core_cloud,
            source: FeatureSource::scalar_field(name.as_str()),
            output: Some(Output {
                primary: primary.id,
                secondary: None,
                cached: !primary.created,
            }),
        };
        if !primary.created {
            debug!("Reusing existing scalar field '{}'", name);
            return Ok((prepared, vec![]));
        }

        // Context features look up their neighbors in the context cloud
        let source = match &self.kind {
            FeatureKind::Context(_) => self.second_cloud()?.id,
            _ => self.cloud1()?.id,
        };
        let mut jobs = vec![self.job(store, source, primary.id)?];
        if self.params.op != MathOperator::None {
            let cloud2 = self.second_cloud()?;
            let secondary_name = self.single_cloud_name(&cloud2.label)?;
            let secondary =
                ledger.prepare(store, core_cloud, &secondary_name, FieldBehavior::AlwaysRemove);
            if secondary.created {
                jobs.push(self.job(store, cloud2.id, secondary.id)?);
            }
            if let Some(output) = prepared.output.as_mut() {
                output.secondary = Some(secondary.id);
            }
        }
        Ok((prepared, jobs))
    }

    fn prepare_scale_less(
        &self,
        ty: &PointFeatureType,
        store: &mut CloudStore,
        core_cloud: CloudId,
        ledger: &mut FieldLedger,
    ) -> Result<(Prepared, Vec<Job>)> {
        if let Some(source) = point::direct_source(ty, store.cloud(core_cloud))? {
            let prepared = Prepared {
                core_cloud,
                source,
                output: None,
            };
            return Ok((prepared, vec![]));
        }

        let name = self.name()?;
        // Computed before the field is created, so that a missing source leaves no field behind
        let values = match store.cloud(core_cloud).field_by_name(&name) {
            Some(_) => None,
            None => Some(point::per_point_values(ty, store.cloud(core_cloud))?),
        };
        let field = ledger.prepare(store, core_cloud, &name, FieldBehavior::CanRemove);
        if let (true, Some(values)) = (field.created, values) {
            let target = store
                .cloud_mut(core_cloud)
                .field_mut(field.id)
                .ok_or_else(|| MascError::Internal(format!("field '{}' vanished", name)))?;
            target.values_mut().copy_from_slice(&values);
        }
        let prepared = Prepared {
            core_cloud,
            source: FeatureSource::scalar_field(name),
            output: Some(Output {
                primary: field.id,
                secondary: None,
                cached: !field.created,
            }),
        };
        Ok((prepared, vec![]))
    }

    /// Job that computes this feature with neighborhoods from `source` into `output`
    fn job(&self, store: &CloudStore, source: CloudId, output: FieldId) -> Result<Job> {
        let params = &self.params;
        let radius = params.scale / 2.0;
        let (search, evaluator) = match &self.kind {
            FeatureKind::Point(ty) => {
                let stat = params.stat.ok_or_else(|| {
                    MascError::Config(format!("scaled feature {} needs a statistic", ty))
                })?;
                let values = point::value_source(ty, store.cloud(source))?;
                (
                    SearchKind::Radius(radius),
                    Evaluator::Statistic { stat, values },
                )
            }
            FeatureKind::Neighborhood(ty) => (SearchKind::Radius(radius), Evaluator::Neighborhood(*ty)),
            FeatureKind::Context(ty) => {
                let search = match (params.k, params.is_scaled()) {
                    (0, _) => SearchKind::Radius(radius),
                    (k, true) => SearchKind::Knn {
                        k,
                        max_radius: radius,
                    },
                    (k, false) => SearchKind::Knn {
                        k,
                        max_radius: f64::INFINITY,
                    },
                };
                (search, Evaluator::Context(*ty))
            }
            FeatureKind::DualCloud(ty) => {
                return Err(MascError::NotImplemented(format!(
                    "dual cloud feature {}",
                    ty
                )))
            }
        };
        Ok(Job {
            source,
            search,
            evaluator,
            output,
            descriptor: 0,
        })
    }

    /// Combines the values of both clouds if an operator is set, refreshes the min/max cache of the output field
    /// and makes it the displayed field of the core cloud
    ///
    /// # Errors
    ///
    /// If the descriptor is not prepared or its fields were removed in the meantime
    pub(crate) fn finish(&mut self, store: &mut CloudStore) -> Result<()> {
        let result = self.try_finish(store);
        self.state = match result {
            Ok(_) => FeatureState::Finalized,
            Err(_) => FeatureState::Failed,
        };
        result
    }

    fn try_finish(&self, store: &mut CloudStore) -> Result<()> {
        let prepared = match (&self.prepared, self.state) {
            (Some(prepared), FeatureState::Prepared) => prepared,
            _ => {
                return Err(MascError::Internal(format!(
                    "feature {} was not prepared",
                    self.kind
                )))
            }
        };
        let output = match prepared.output {
            Some(output) => output,
            None => return Ok(()),
        };
        let cloud = store.cloud_mut(prepared.core_cloud);
        let missing = || MascError::Internal(format!("output field of {} was removed", self.kind));

        if let (false, Some(secondary)) = (output.cached, output.secondary) {
            let others = cloud.field(secondary).ok_or_else(missing)?.values().to_vec();
            let op = self.params.op;
            let field = cloud.field_mut(output.primary).ok_or_else(missing)?;
            for (value, other) in field.values_mut().iter_mut().zip(others) {
                *value = op.apply(*value, other);
            }
        }
        cloud
            .field_mut(output.primary)
            .ok_or_else(missing)?
            .compute_min_max();
        cloud.set_displayed_field(output.primary);
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = FeatureState::Failed;
    }
}
