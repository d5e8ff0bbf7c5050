use std::{fmt::Display, str::FromStr};

use float_ord::FloatOrd;
use serde::{Deserialize, Serialize};

use crate::error::{MascError, Result};

/// Statistic that summarizes the scalar values of a neighborhood into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statistic {
    Mean,
    Std,
    Median,
    Mode,
    Skew,
    Range,
}

impl Statistic {
    pub const ALL: [Statistic; 6] = [
        Statistic::Mean,
        Statistic::Std,
        Statistic::Median,
        Statistic::Mode,
        Statistic::Skew,
        Statistic::Range,
    ];

    /// Returns the keyword of this statistic, as used in feature names
    pub fn keyword(&self) -> &'static str {
        match self {
            Statistic::Mean => "MEAN",
            Statistic::Std => "STD",
            Statistic::Median => "MEDIAN",
            Statistic::Mode => "MODE",
            Statistic::Skew => "SKEW",
            Statistic::Range => "RANGE",
        }
    }

    /// Computes this statistic over `values`. NaN values are ignored (and removed from `values`). The order of
    /// `values` is not preserved
    ///
    /// # Errors
    ///
    /// If `values` contains no value that is not NaN
    /// ```
    /// # use masc_algorithms::stats::Statistic;
    /// let mut values = vec![3.0, 1.0, f64::NAN, 2.0, 10.0];
    /// assert_eq!(2.5, Statistic::Median.compute(&mut values).unwrap());
    /// assert_eq!(9.0, Statistic::Range.compute(&mut values).unwrap());
    /// ```
    pub fn compute(&self, values: &mut Vec<f64>) -> Result<f64> {
        values.retain(|v| !v.is_nan());
        if values.is_empty() {
            return Err(MascError::EmptyNeighborhood);
        }
        let value = match self {
            Statistic::Mean => mean_and_std(values).0,
            Statistic::Std => mean_and_std(values).1,
            Statistic::Median => median(values),
            Statistic::Range => range(values),
            Statistic::Mode => WeibullFit::fit(values).mode(),
            Statistic::Skew => WeibullFit::fit(values).skewness(),
        };
        Ok(value)
    }
}

impl Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

impl FromStr for Statistic {
    type Err = MascError;

    fn from_str(s: &str) -> Result<Self> {
        Statistic::ALL
            .iter()
            .copied()
            .find(|stat| stat.keyword().eq_ignore_ascii_case(s))
            .ok_or_else(|| MascError::InvalidFeatureType(format!("unknown statistic '{}'", s)))
    }
}

/// Mean and population standard deviation from a single pass over `values`. The standard deviation is computed as
/// `sqrt(|n*sum(x^2) - sum(x)^2|) / n`, which is never NaN even if round-off makes the radicand negative
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let (sum, sum_of_squares) = values
        .iter()
        .fold((0.0, 0.0), |(sum, squares), v| (sum + v, squares + v * v));
    let n = values.len() as f64;
    let mean = sum / n;
    let std = (n * sum_of_squares - sum * sum).abs().sqrt() / n;
    (mean, std)
}

/// Median by partial selection. For an even number of values, the mean of the two middle values is returned
pub fn median(values: &mut [f64]) -> f64 {
    let mid = values.len() / 2;
    let is_odd = values.len() % 2 == 1;
    let (lower, upper_median, _) = values.select_nth_unstable_by_key(mid, |v| FloatOrd(*v));
    let upper_median = *upper_median;
    if is_odd {
        return upper_median;
    }
    let lower_median = lower
        .iter()
        .copied()
        .max_by_key(|v| FloatOrd(*v))
        .unwrap_or(upper_median);
    (lower_median + upper_median) / 2.0
}

/// Difference between the largest and the smallest value
pub fn range(values: &[f64]) -> f64 {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    max - min
}

/// Three-parameter Weibull distribution fitted to a sample. The location is placed slightly below the sample minimum,
/// shape and scale are maximum likelihood estimates for the shifted sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeibullFit {
    pub shape: f64,
    pub scale: f64,
    pub location: f64,
}

impl WeibullFit {
    const MAX_ITERATIONS: usize = 100;

    /// Fits a Weibull distribution to the non-empty sample `values`. A sample without spread yields a degenerate fit
    /// with infinite shape and zero scale, centered on the sample value
    pub fn fit(values: &[f64]) -> Self {
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
                (min.min(v), max.max(v))
            });
        let spread = max - min;
        if spread <= 0.0 || !spread.is_finite() {
            return Self {
                shape: f64::INFINITY,
                scale: 0.0,
                location: min,
            };
        }

        let location = min - spread / values.len() as f64;
        let largest = max - location;
        // Shape estimation is scale invariant, so the sample is normalized to (0;1] to keep y^k finite
        let normalized = values
            .iter()
            .map(|v| (v - location) / largest)
            .collect::<Vec<_>>();
        let mean_log = normalized.iter().map(|y| y.ln()).sum::<f64>() / normalized.len() as f64;

        let likelihood_slope = |k: f64| -> f64 {
            let (weighted, total) = normalized.iter().fold((0.0, 0.0), |(weighted, total), y| {
                let yk = y.powf(k);
                (weighted + yk * y.ln(), total + yk)
            });
            weighted / total - 1.0 / k - mean_log
        };

        let mut low = 1e-3;
        let mut high = 1.0;
        while likelihood_slope(high) < 0.0 && high < 1e4 {
            low = high;
            high *= 2.0;
        }
        for _ in 0..Self::MAX_ITERATIONS {
            let mid = 0.5 * (low + high);
            if likelihood_slope(mid) < 0.0 {
                low = mid;
            } else {
                high = mid;
            }
            if high - low < 1e-10 * high {
                break;
            }
        }
        let shape = 0.5 * (low + high);
        let mean_power =
            normalized.iter().map(|y| y.powf(shape)).sum::<f64>() / normalized.len() as f64;
        let scale = mean_power.powf(1.0 / shape) * largest;

        Self {
            shape,
            scale,
            location,
        }
    }

    /// Most probable value of the fitted distribution
    pub fn mode(&self) -> f64 {
        if self.scale == 0.0 || self.shape <= 1.0 {
            return self.location;
        }
        let k = self.shape;
        self.location + self.scale * ((k - 1.0) / k).powf(1.0 / k)
    }

    /// Skewness of the fitted distribution. NaN for a degenerate fit
    pub fn skewness(&self) -> f64 {
        if self.scale == 0.0 || !self.shape.is_finite() {
            return f64::NAN;
        }
        let k = self.shape;
        let g1 = gamma(1.0 + 1.0 / k);
        let g2 = gamma(1.0 + 2.0 / k);
        let g3 = gamma(1.0 + 3.0 / k);
        let variance = g2 - g1 * g1;
        (g3 - 3.0 * g1 * variance - g1 * g1 * g1) / variance.powf(1.5)
    }
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Gamma function (Lanczos approximation with reflection for arguments below 0.5)
pub fn gamma(x: f64) -> f64 {
    if x < 0.5 {
        return std::f64::consts::PI / ((std::f64::consts::PI * x).sin() * gamma(1.0 - x));
    }
    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let series = LANCZOS_COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(LANCZOS_COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));
    (2.0 * std::f64::consts::PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * series
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_constant_neighborhood() {
        for stat in Statistic::ALL.iter() {
            let mut values = vec![4.25; 7];
            let value = stat.compute(&mut values).unwrap();
            match stat {
                Statistic::Std | Statistic::Range => assert_eq!(0.0, value, "{}", stat),
                Statistic::Mean | Statistic::Median | Statistic::Mode => {
                    assert_approx_eq!(4.25, value)
                }
                Statistic::Skew => assert!(value.is_nan()),
            }
        }
    }

    #[test]
    fn test_empty_neighborhood() {
        for stat in Statistic::ALL.iter() {
            let mut values = vec![f64::NAN, f64::NAN];
            assert!(matches!(
                stat.compute(&mut values),
                Err(MascError::EmptyNeighborhood)
            ));
        }
    }

    #[test]
    fn test_mean_and_std() {
        let (mean, std) = mean_and_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_approx_eq!(5.0, mean);
        assert_approx_eq!(2.0, std);
    }

    #[test]
    fn test_std_is_never_nan_under_round_off() {
        let (_, std) = mean_and_std(&[1e8 + 0.1; 3]);
        assert!(std >= 0.0);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(3.0, median(&mut [5.0, 3.0, 1.0]));
        assert_eq!(2.5, median(&mut [4.0, 1.0, 3.0, 2.0]));
        assert_eq!(7.0, median(&mut [7.0]));
    }

    #[test]
    fn test_gamma() {
        assert_approx_eq!(1.0, gamma(1.0), 1e-12);
        assert_approx_eq!(24.0, gamma(5.0), 1e-9);
        assert_approx_eq!(std::f64::consts::PI.sqrt(), gamma(0.5), 1e-12);
    }

    #[test]
    fn test_weibull_skewness_of_exponential_shape() {
        let fit = WeibullFit {
            shape: 1.0,
            scale: 2.0,
            location: 0.0,
        };
        assert_approx_eq!(2.0, fit.skewness(), 1e-9);
        assert_eq!(0.0, fit.mode());
    }

    #[test]
    fn test_weibull_fit_recovers_mode_of_symmetric_sample() {
        let values = (0..=100).map(|i| 10.0 + (i as f64 - 50.0) / 50.0).collect::<Vec<_>>();
        let fit = WeibullFit::fit(&values);
        assert!(fit.shape > 1.0);
        let mode = fit.mode();
        assert!(mode > 9.0 && mode < 11.0, "mode {}", mode);
        assert!(fit.skewness().abs() < 1.5);
    }

    #[test]
    fn test_statistic_keywords() {
        assert_eq!(Statistic::Median, "median".parse::<Statistic>().unwrap());
        assert_eq!("SKEW", Statistic::Skew.to_string());
        assert!(matches!(
            "AVG".parse::<Statistic>(),
            Err(MascError::InvalidFeatureType(_))
        ));
    }
}
