use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use float_ord::FloatOrd;
use log::{debug, info};
use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{EnsembleModel, SampleMatrix, TrainingParameters};
use crate::{
    error::{MascError, Result},
    progress::{Progress, ProgressMonitor},
};

/// Node of a decision tree. Children are addressed by their index in the node array of the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        /// Index into the class list of the forest
        class: usize,
    },
    Split {
        feature: usize,
        /// Samples with `value <= threshold` go left. NaN always goes right
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Checks that every node refers to a known feature or class and that children come after their parent, so
    /// that [`Tree::predict`] always reaches a leaf
    fn validate(&self, tree: usize, feature_count: usize, class_count: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(MascError::Model(format!("stored tree {} has no nodes", tree)));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Leaf { class } if class >= class_count => {
                    return Err(MascError::Model(format!(
                        "node {} of stored tree {} refers to class {} of {}",
                        index, tree, class, class_count
                    )));
                }
                Node::Split { feature, .. } if feature >= feature_count => {
                    return Err(MascError::Model(format!(
                        "node {} of stored tree {} splits on feature {} of {}",
                        index, tree, feature, feature_count
                    )));
                }
                Node::Split { left, right, .. } => {
                    let valid = |child: usize| child > index && child < self.nodes.len();
                    if !valid(left) || !valid(right) {
                        return Err(MascError::Model(format!(
                            "node {} of stored tree {} has invalid children {} and {}",
                            index, tree, left, right
                        )));
                    }
                }
                Node::Leaf { .. } => {}
            }
        }
        Ok(())
    }

    fn predict(&self, row: &[f64]) -> usize {
        let mut current = 0;
        loop {
            match &self.nodes[current] {
                Node::Leaf { class } => return *class,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if goes_left(row[*feature], *threshold) {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

fn goes_left(value: f64, threshold: f64) -> bool {
    value <= threshold
}

/// Gini impurity of a node, weighted with its sample count: `n * (1 - Σ (c/n)²)`
fn weighted_gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let sum_of_squares = counts.iter().map(|&c| (c * c) as f64).sum::<f64>();
    n as f64 - sum_of_squares / n as f64
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Weighted impurity decrease of the split
    decrease: f64,
}

/// Grows a single CART tree on a bootstrap sample
struct TreeBuilder<'a> {
    samples: &'a SampleMatrix,
    labels: &'a [usize],
    class_count: usize,
    max_depth: usize,
    min_sample_count: usize,
    active_var_count: usize,
    rng: StdRng,
    nodes: Vec<Node>,
    importance: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(mut self) -> (Tree, Vec<f64>) {
        let n = self.labels.len();
        let mut bootstrap = (0..n)
            .map(|_| self.rng.gen_range(0..n))
            .collect::<Vec<_>>();
        self.build(&mut bootstrap, 0);
        (Tree { nodes: self.nodes }, self.importance)
    }

    fn class_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.class_count];
        for &index in indices {
            counts[self.labels[index]] += 1;
        }
        counts
    }

    fn build(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let counts = self.class_counts(indices);
        // Ties go to the lowest class
        let majority = counts
            .iter()
            .enumerate()
            .max_by_key(|(class, count)| (**count, std::cmp::Reverse(*class)))
            .map_or(0, |(class, _)| class);
        let node = self.nodes.len();
        self.nodes.push(Node::Leaf { class: majority });

        let is_pure = counts[majority] == indices.len();
        if is_pure || depth >= self.max_depth || indices.len() < self.min_sample_count.max(2) {
            return node;
        }
        let split = match self.best_split(indices, &counts) {
            Some(split) => split,
            None => return node,
        };
        self.importance[split.feature] += split.decrease;

        let samples = self.samples;
        let middle = partition(indices, |&index| {
            goes_left(samples.get(index, split.feature), split.threshold)
        });
        let (left_indices, right_indices) = indices.split_at_mut(middle);
        let left = self.build(left_indices, depth + 1);
        let right = self.build(right_indices, depth + 1);
        self.nodes[node] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node
    }

    fn best_split(&mut self, indices: &[usize], counts: &[usize]) -> Option<SplitCandidate> {
        let parent_impurity = weighted_gini(counts, indices.len());
        let features = sample(&mut self.rng, self.samples.columns(), self.active_var_count);

        let mut best: Option<SplitCandidate> = None;
        let mut sorted = Vec::with_capacity(indices.len());
        for feature in features.iter() {
            sorted.clear();
            // NaN samples stay on the right side for every threshold
            for &index in indices {
                let value = self.samples.get(index, feature);
                if !value.is_nan() {
                    sorted.push((value, self.labels[index]));
                }
            }
            sorted.sort_unstable_by_key(|(value, _)| FloatOrd(*value));

            let mut left_counts = vec![0; self.class_count];
            for position in 0..sorted.len().saturating_sub(1) {
                let (value, label) = sorted[position];
                left_counts[label] += 1;
                let next = sorted[position + 1].0;
                if next <= value {
                    continue;
                }
                let left_len = position + 1;
                let right_counts = counts
                    .iter()
                    .zip(&left_counts)
                    .map(|(total, left)| total - left)
                    .collect::<Vec<_>>();
                let impurity = weighted_gini(&left_counts, left_len)
                    + weighted_gini(&right_counts, indices.len() - left_len);
                let decrease = parent_impurity - impurity;
                if decrease > best.as_ref().map_or(1e-12, |best| best.decrease) {
                    let middle = value + (next - value) / 2.0;
                    best = Some(SplitCandidate {
                        feature,
                        threshold: if middle < next { middle } else { value },
                        decrease,
                    });
                }
            }
        }
        best
    }
}

/// Moves all elements matching `pred` to the front and returns their count
fn partition<T, F: Fn(&T) -> bool>(slice: &mut [T], pred: F) -> usize {
    let mut next = 0;
    for index in 0..slice.len() {
        if pred(&slice[index]) {
            slice.swap(next, index);
            next += 1;
        }
    }
    next
}

/// Random forest of CART trees, grown on bootstrap samples with a random subset of the features per split
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    seed: Option<u64>,
    classes: Vec<i32>,
    feature_count: usize,
    trees: Vec<Tree>,
    importance: Option<Vec<f64>>,
}

impl RandomForest {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes the training reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Labels of the classes this forest was trained on, sorted ascending
    pub fn classes(&self) -> &[i32] {
        &self.classes
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Restores a forest written by [`EnsembleModel::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let forest: RandomForest = serde_json::from_reader(BufReader::new(file))?;
        if !forest.is_trained() {
            return Err(MascError::Model("stored random forest has no trees".into()));
        }
        for (index, tree) in forest.trees.iter().enumerate() {
            tree.validate(index, forest.feature_count, forest.classes.len())?;
        }
        if let Some(importance) = &forest.importance {
            if importance.len() != forest.feature_count {
                return Err(MascError::Model(format!(
                    "stored importance has {} values for {} features",
                    importance.len(),
                    forest.feature_count
                )));
            }
        }
        Ok(forest)
    }

    fn check_row(&self, row: &[f64]) -> Result<()> {
        if !self.is_trained() {
            return Err(MascError::Model("random forest is not trained".into()));
        }
        if row.len() != self.feature_count {
            return Err(MascError::Internal(format!(
                "sample has {} features, the forest was trained with {}",
                row.len(),
                self.feature_count
            )));
        }
        Ok(())
    }

    fn votes(&self, row: &[f64]) -> Vec<usize> {
        let mut votes = vec![0; self.classes.len()];
        for tree in &self.trees {
            votes[tree.predict(row)] += 1;
        }
        votes
    }
}

impl EnsembleModel for RandomForest {
    fn fit(
        &mut self,
        samples: &SampleMatrix,
        labels: &[i32],
        params: &TrainingParameters,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        if samples.rows() != labels.len() {
            return Err(MascError::Internal(format!(
                "{} samples but {} labels",
                samples.rows(),
                labels.len()
            )));
        }
        if samples.rows() == 0 || samples.columns() == 0 {
            return Err(MascError::Model(
                "can't train a random forest without samples or features".into(),
            ));
        }
        if params.max_tree_count == 0 {
            return Err(MascError::Config("the forest needs at least one tree".into()));
        }

        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        let class_indices = labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect::<Vec<_>>();

        let columns = samples.columns();
        let active_var_count = match params.active_var_count {
            0 => ((columns as f64).sqrt().round() as usize).max(1),
            count => count.min(columns),
        };
        let mut seeder = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let tree_seeds = (0..params.max_tree_count)
            .map(|_| seeder.gen::<u64>())
            .collect::<Vec<_>>();
        info!(
            "Training {} trees on {} samples with {} features ({} per split), {} classes",
            params.max_tree_count,
            samples.rows(),
            columns,
            active_var_count,
            classes.len()
        );

        let progress = Progress::new(monitor, "Training random forest", tree_seeds.len());
        let grown = tree_seeds
            .par_iter()
            .map(|&seed| {
                if progress.is_cancelled() {
                    return None;
                }
                let builder = TreeBuilder {
                    samples,
                    labels: &class_indices,
                    class_count: classes.len(),
                    max_depth: params.max_depth,
                    min_sample_count: params.min_sample_count,
                    active_var_count,
                    rng: StdRng::seed_from_u64(seed),
                    nodes: vec![],
                    importance: vec![0.0; columns],
                };
                let grown = builder.grow();
                if progress.tick() {
                    Some(grown)
                } else {
                    None
                }
            })
            .collect::<Option<Vec<_>>>();
        let grown = match grown {
            Some(grown) => grown,
            None => return Err(MascError::TrainingAborted),
        };

        let mut importance = vec![0.0; columns];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, tree_importance) in grown {
            for (total, value) in importance.iter_mut().zip(tree_importance) {
                *total += value;
            }
            trees.push(tree);
        }
        let sum = importance.iter().sum::<f64>();
        if sum > 0.0 {
            importance.iter_mut().for_each(|value| *value /= sum);
        }
        debug!(
            "Grew {} trees with {} nodes in total",
            trees.len(),
            trees.iter().map(|tree| tree.nodes.len()).sum::<usize>()
        );

        self.classes = classes;
        self.feature_count = columns;
        self.trees = trees;
        self.importance = if params.compute_var_importance {
            Some(importance)
        } else {
            None
        };
        Ok(())
    }

    fn is_trained(&self) -> bool {
        !self.trees.is_empty() && !self.classes.is_empty()
    }

    fn predict(&self, row: &[f64]) -> Result<i32> {
        self.check_row(row)?;
        let votes = self.votes(row);
        let winner = votes
            .iter()
            .enumerate()
            .max_by_key(|(class, count)| (**count, std::cmp::Reverse(*class)))
            .map_or(0, |(class, _)| class);
        Ok(self.classes[winner])
    }

    fn predict_votes(&self, row: &[f64]) -> Result<Vec<(i32, usize)>> {
        self.check_row(row)?;
        Ok(self
            .classes
            .iter()
            .copied()
            .zip(self.votes(row))
            .collect())
    }

    fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn variable_importance(&self) -> Option<&[f64]> {
        self.importance.as_deref()
    }

    fn save(&self, path: &Path) -> Result<()> {
        if !self.is_trained() {
            return Err(MascError::Model("can't save an untrained random forest".into()));
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
