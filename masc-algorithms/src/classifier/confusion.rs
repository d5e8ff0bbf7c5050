use std::fmt::Display;

use itertools::Itertools;

/// Confusion matrix of a classification. Rows are actual classes, columns predicted classes
///
/// Predictions of a label that never occurs among the actual labels have no column. They count as misses of the
/// actual class, so they lower its recall and the accuracy, but they don't appear in any precision
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    classes: Vec<i32>,
    counts: Vec<Vec<usize>>,
    /// Number of samples per actual class, including the ones predicted as an unknown class
    row_totals: Vec<usize>,
    total: usize,
}

impl ConfusionMatrix {
    /// Computes the confusion matrix of `predicted` against `actual`. The classes are the distinct values of
    /// `actual`, sorted ascending
    ///
    /// # Panics
    ///
    /// If `actual` and `predicted` differ in length
    /// ```
    /// # use masc_algorithms::classifier::ConfusionMatrix;
    /// let matrix = ConfusionMatrix::compute(&[1, 1, 2, 2], &[1, 2, 2, 2]);
    /// assert_eq!(&[1, 2], matrix.classes());
    /// assert_eq!(0.75, matrix.overall_accuracy());
    /// ```
    pub fn compute(actual: &[i32], predicted: &[i32]) -> Self {
        assert_eq!(
            actual.len(),
            predicted.len(),
            "actual and predicted labels differ in length"
        );
        let classes = actual.iter().copied().sorted().dedup().collect_vec();
        let mut counts = vec![vec![0; classes.len()]; classes.len()];
        let mut row_totals = vec![0; classes.len()];
        for (actual, predicted) in actual.iter().zip(predicted) {
            // Every actual label is a class by construction
            let row = match classes.binary_search(actual) {
                Ok(row) => row,
                Err(_) => continue,
            };
            row_totals[row] += 1;
            if let Ok(column) = classes.binary_search(predicted) {
                counts[row][column] += 1;
            }
        }
        Self {
            classes,
            counts,
            row_totals,
            total: actual.len(),
        }
    }

    pub fn classes(&self) -> &[i32] {
        &self.classes
    }

    /// Number of samples of class `actual` that were predicted as `predicted`. 0 for unknown classes
    pub fn count(&self, actual: i32, predicted: i32) -> usize {
        match (
            self.classes.binary_search(&actual),
            self.classes.binary_search(&predicted),
        ) {
            (Ok(row), Ok(column)) => self.counts[row][column],
            _ => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn index(&self, class: i32) -> Option<usize> {
        self.classes.binary_search(&class).ok()
    }

    fn true_positives(&self, index: usize) -> usize {
        self.counts[index][index]
    }

    /// Fraction of the samples predicted as `class` that actually are of `class`. NaN if nothing was predicted as
    /// `class` or `class` is unknown
    pub fn precision(&self, class: i32) -> f64 {
        match self.index(class) {
            Some(index) => {
                let predicted = self.counts.iter().map(|row| row[index]).sum::<usize>();
                ratio(self.true_positives(index), predicted)
            }
            None => f64::NAN,
        }
    }

    /// Fraction of the samples of `class` that were predicted as `class`. NaN if `class` is unknown
    pub fn recall(&self, class: i32) -> f64 {
        match self.index(class) {
            Some(index) => ratio(self.true_positives(index), self.row_totals[index]),
            None => f64::NAN,
        }
    }

    /// Harmonic mean of precision and recall. NaN if both are zero or either is undefined
    pub fn f1_score(&self, class: i32) -> f64 {
        let precision = self.precision(class);
        let recall = self.recall(class);
        let sum = precision + recall;
        if sum == 0.0 {
            f64::NAN
        } else {
            2.0 * precision * recall / sum
        }
    }

    /// Fraction of all samples that were predicted correctly. NaN for an empty matrix
    pub fn overall_accuracy(&self) -> f64 {
        let correct = (0..self.classes.len())
            .map(|index| self.true_positives(index))
            .sum();
        ratio(correct, self.total)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        f64::NAN
    } else {
        numerator as f64 / denominator as f64
    }
}

impl Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>8}", "")?;
        for class in &self.classes {
            write!(f, "{:>8}", class)?;
        }
        writeln!(f, "{:>10}{:>10}{:>10}", "recall", "precision", "F1")?;
        for (row, class) in self.classes.iter().enumerate() {
            write!(f, "{:>8}", class)?;
            for count in &self.counts[row] {
                write!(f, "{:>8}", count)?;
            }
            writeln!(
                f,
                "{:>10.3}{:>10.3}{:>10.3}",
                self.recall(*class),
                self.precision(*class),
                self.f1_score(*class)
            )?;
        }
        write!(f, "overall accuracy: {:.3}", self.overall_accuracy())
    }
}
