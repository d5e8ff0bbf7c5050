use rand::Rng;

use crate::error::{MascError, Result};

/// Random partition of the indices `0..size` into an "in" and an "out" set, e.g. for splitting core points into
/// training and test points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomSubset {
    inside: Vec<usize>,
    outside: Vec<usize>,
}

impl RandomSubset {
    /// Puts `floor(size * ratio)` randomly chosen indices into the "in" set and all others into the "out" set. Only
    /// the smaller of both sets is drawn at random
    ///
    /// # Errors
    ///
    /// [`MascError::Config`] if `ratio` is not in `(0;1)`, [`MascError::Allocation`] if the sets can't be allocated
    /// ```
    /// # use masc_algorithms::classifier::RandomSubset;
    /// # use rand::{rngs::StdRng, SeedableRng};
    /// let subset = RandomSubset::new(10, 0.8, &mut StdRng::seed_from_u64(0)).unwrap();
    /// assert_eq!(8, subset.inside().len());
    /// assert_eq!(2, subset.outside().len());
    /// ```
    pub fn new<R: Rng + ?Sized>(size: usize, ratio: f64, rng: &mut R) -> Result<Self> {
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(MascError::Config(format!(
                "subset ratio must be in (0;1), got {}",
                ratio
            )));
        }
        let in_count = ((size as f64 * ratio).floor() as usize).min(size);
        let out_count = size - in_count;

        // Flip the membership of the smaller set, starting from all points in the larger one
        let draw_inside = in_count <= out_count;
        let flips = in_count.min(out_count);
        let mut membership = Vec::new();
        membership.try_reserve_exact(size)?;
        membership.resize(size, !draw_inside);
        let mut flipped = 0;
        while flipped < flips {
            let index = rng.gen_range(0..size);
            if membership[index] != draw_inside {
                membership[index] = draw_inside;
                flipped += 1;
            }
        }

        let mut inside = Vec::new();
        inside.try_reserve_exact(in_count)?;
        let mut outside = Vec::new();
        outside.try_reserve_exact(out_count)?;
        for (index, is_inside) in membership.into_iter().enumerate() {
            if is_inside {
                inside.push(index);
            } else {
                outside.push(index);
            }
        }
        Ok(Self { inside, outside })
    }

    /// Indices in the "in" set, ascending
    pub fn inside(&self) -> &[usize] {
        &self.inside
    }

    /// Indices in the "out" set, ascending
    pub fn outside(&self) -> &[usize] {
        &self.outside
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_partition_sizes_and_coverage() {
        let mut rng = StdRng::seed_from_u64(42);
        for &size in [0usize, 1, 7, 100, 1001].iter() {
            for &ratio in [0.01, 0.3, 0.5, 0.7, 0.99].iter() {
                let subset = RandomSubset::new(size, ratio, &mut rng).unwrap();
                let expected_in = (size as f64 * ratio).floor() as usize;
                assert_eq!(expected_in, subset.inside().len());
                assert_eq!(size - expected_in, subset.outside().len());

                let mut all = subset
                    .inside()
                    .iter()
                    .chain(subset.outside())
                    .copied()
                    .collect::<Vec<_>>();
                all.sort_unstable();
                assert_eq!((0..size).collect::<Vec<_>>(), all);
            }
        }
    }

    #[test]
    fn test_ratio_out_of_range() {
        let mut rng = StdRng::seed_from_u64(0);
        for &ratio in [0.0, 1.0, 1.5, -0.1, f64::NAN].iter() {
            assert!(matches!(
                RandomSubset::new(10, ratio, &mut rng),
                Err(MascError::Config(_))
            ));
        }
    }

    #[test]
    fn test_seeded_subsets_are_reproducible() {
        let a = RandomSubset::new(50, 0.3, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = RandomSubset::new(50, 0.3, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }
}
