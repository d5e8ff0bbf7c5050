use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use masc_core::{
    index::{Neighbor, Octree, MAX_LEVEL},
    nalgebra::Vector3,
};
use rayon::prelude::*;

use crate::{
    error::{MascError, Result},
    progress::Progress,
};

/// Shape of the neighborhood of a query point
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchKind {
    /// All points within the given radius
    Radius(f64),
    /// The `k` nearest points, optionally limited to `max_radius` (infinite for no limit). Query points with
    /// less than `k` neighbors get no value
    Knn { k: usize, max_radius: f64 },
}

/// Lowest level the adaptive search coarsens to, unless it started below
pub const FLOOR_LEVEL: u8 = 5;

/// Keeps the octree level of a k-nearest-neighbor scan matched to the local point density. The measured size is the
/// population of the octree cell that contains the query point. Too small cells coarsen the level by one, too large
/// ones refine it by one level per halving of the excess
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelController {
    level: u8,
    floor: u8,
    target: f64,
}

impl LevelController {
    const LOWER_BAND: f64 = 1.1;
    const UPPER_BAND: f64 = 2.9;

    pub fn new(initial_level: u8, target: f64) -> Self {
        Self {
            level: initial_level,
            floor: initial_level.min(FLOOR_LEVEL),
            target,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Adjusts the level to the mean cell population measured since the last adjustment and returns the new level
    /// ```
    /// # use masc_algorithms::neighborhood_search::LevelController;
    /// let mut controller = LevelController::new(8, 10.0);
    /// assert_eq!(8, controller.adjust(20.0));
    /// assert_eq!(9, controller.adjust(40.0));
    /// assert_eq!(12, controller.adjust(120.0));
    /// assert_eq!(11, controller.adjust(5.0));
    /// ```
    pub fn adjust(&mut self, mean_population: f64) -> u8 {
        if mean_population < Self::LOWER_BAND * self.target {
            if self.level > self.floor {
                self.level -= 1;
            }
        } else if mean_population > Self::UPPER_BAND * self.target {
            let excess = mean_population / (Self::UPPER_BAND * self.target);
            let steps = excess.log2().ceil().clamp(1.0, MAX_LEVEL as f64) as u8;
            self.level = self.level.saturating_add(steps).min(MAX_LEVEL);
        }
        self.level
    }
}

/// Octree levels used by a neighborhood scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSummary {
    pub initial_level: u8,
    pub final_level: u8,
    pub level_changes: usize,
    /// Mean population of the query cells in the last tenth of a k-nearest-neighbor scan
    pub last_mean_population: Option<f64>,
}

/// Runs a neighborhood search in `octree` around every point of `queries` and hands each neighborhood to
/// `evaluate`, which writes one value per column into its row. The values end up in `outputs` (one column per
/// entry, each as long as `queries`). The scan visits the queries in Morton order, one tenth at a time; each tenth
/// is processed in parallel and the octree level of k-nearest-neighbor searches is adjusted in between.
///
/// Query points with an insufficient neighborhood keep their value in `outputs`, as do all points that were not
/// reached because the operation was cancelled.
///
/// # Errors
///
/// [`MascError::Cancelled`] if `progress` signals cancellation. Values written before are kept
pub(crate) fn search_and_evaluate<S, I, F>(
    octree: &Octree,
    queries: &[Vector3<f64>],
    search: SearchKind,
    outputs: &mut [Vec<f64>],
    progress: &Progress,
    init_scratch: I,
    evaluate: F,
) -> Result<SearchSummary>
where
    S: Send,
    I: Fn() -> S + Sync + Send,
    F: Fn(&mut S, &Vector3<f64>, &[Neighbor], &mut [f64]) + Sync,
{
    let columns = outputs.len();
    if outputs.iter().any(|column| column.len() != queries.len()) {
        return Err(MascError::Internal(
            "output columns must have one value per query point".into(),
        ));
    }

    let (initial_level, mut controller) = match search {
        SearchKind::Radius(radius) => (octree.level_for_radius(radius), None),
        SearchKind::Knn { k, .. } => {
            let level = octree.level_for_population(k.max(3) as f64);
            (level, Some(LevelController::new(level, k as f64)))
        }
    };
    let mut summary = SearchSummary {
        initial_level,
        final_level: initial_level,
        level_changes: 0,
        last_mean_population: None,
    };
    if queries.is_empty() || columns == 0 {
        return Ok(summary);
    }

    let mut order = (0..queries.len()).collect::<Vec<_>>();
    order.sort_by_cached_key(|&idx| octree.morton_code(&queries[idx]));

    let tenth = ((queries.len() + 9) / 10).max(1);
    let mut rows = Vec::new();
    rows.try_reserve_exact(tenth * columns)?;
    rows.resize(tenth * columns, f64::NAN);

    let mut level = initial_level;
    for chunk in order.chunks(tenth) {
        let rows = &mut rows[..chunk.len() * columns];
        rows.fill(f64::NAN);
        let population = AtomicUsize::new(0);
        let measured = AtomicUsize::new(0);

        rows.par_chunks_mut(columns)
            .zip(chunk.par_iter())
            .for_each_init(
                || (Vec::new(), init_scratch()),
                |(neighbors, scratch), (row, &query_index)| {
                    if !progress.tick() {
                        return;
                    }
                    let query = &queries[query_index];
                    match search {
                        SearchKind::Radius(radius) => {
                            octree.radius_search_into(query, radius, level, neighbors);
                            evaluate(scratch, query, neighbors, row);
                        }
                        SearchKind::Knn { k, max_radius } => {
                            octree.knn_into(query, k, level, max_radius, neighbors);
                            population
                                .fetch_add(octree.cell_population(query, level), Ordering::Relaxed);
                            measured.fetch_add(1, Ordering::Relaxed);
                            if neighbors.len() >= k {
                                evaluate(scratch, query, neighbors, row);
                            }
                        }
                    }
                },
            );

        for (row, &query_index) in rows.chunks(columns).zip(chunk.iter()) {
            for (column, value) in outputs.iter_mut().zip(row.iter()) {
                if !value.is_nan() {
                    column[query_index] = *value;
                }
            }
        }

        if progress.is_cancelled() {
            return Err(MascError::Cancelled);
        }

        if let Some(controller) = controller.as_mut() {
            let measured = measured.into_inner();
            if measured > 0 {
                let mean_population = population.into_inner() as f64 / measured as f64;
                summary.last_mean_population = Some(mean_population);
                let new_level = controller.adjust(mean_population);
                if new_level != level {
                    debug!(
                        "Mean cell population {:.1}, switching from octree level {} to {}",
                        mean_population, level, new_level
                    );
                    level = new_level;
                    summary.level_changes += 1;
                }
            }
        }
    }

    summary.final_level = level;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CancellationToken, NoProgress, ProgressMonitor};

    fn grid(size: usize, spacing: f64) -> Vec<Vector3<f64>> {
        let mut positions = vec![];
        for z in 0..size {
            for y in 0..size {
                for x in 0..size {
                    positions.push(Vector3::new(x as f64, y as f64, z as f64) * spacing);
                }
            }
        }
        positions
    }

    fn count_neighbors(
        octree: &Octree,
        queries: &[Vector3<f64>],
        search: SearchKind,
        monitor: &dyn ProgressMonitor,
    ) -> (Result<SearchSummary>, Vec<f64>) {
        let mut outputs = vec![vec![f64::NAN; queries.len()]];
        let progress = Progress::new(monitor, "count", queries.len());
        let result = search_and_evaluate(
            octree,
            queries,
            search,
            &mut outputs,
            &progress,
            || (),
            |_, _, neighbors, row| row[0] = neighbors.len() as f64,
        );
        (result, outputs.pop().unwrap_or_default())
    }

    #[test]
    fn test_knn_on_colinear_points() {
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        ];
        let octree = Octree::build(&positions);
        let search = SearchKind::Knn {
            k: 3,
            max_radius: f64::INFINITY,
        };
        let (result, counts) = count_neighbors(&octree, &positions, search, &NoProgress);
        result.unwrap();
        assert_eq!(vec![3.0, 3.0, 3.0], counts);
    }

    #[test]
    fn test_insufficient_neighbors_give_nan() {
        let positions = grid(3, 1.0);
        let octree = Octree::build(&positions);
        let search = SearchKind::Knn {
            k: 4,
            max_radius: 1.0,
        };
        let (result, counts) = count_neighbors(&octree, &positions, search, &NoProgress);
        result.unwrap();
        // Even the corners have themselves and three face neighbors within a radius of 1
        assert!(counts.iter().all(|c| *c == 4.0));
        let corner_far = Vector3::new(10.0, 10.0, 10.0);
        let (_, far) = count_neighbors(&octree, &[corner_far], search, &NoProgress);
        assert!(far[0].is_nan());
    }

    #[test]
    fn test_radius_search_counts() {
        let positions = grid(5, 1.0);
        let octree = Octree::build(&positions);
        let (result, counts) =
            count_neighbors(&octree, &positions, SearchKind::Radius(1.0), &NoProgress);
        result.unwrap();
        // Center point of the grid and its six face neighbors
        assert_eq!(7.0, counts[62]);
        // Corner
        assert_eq!(4.0, counts[0]);
    }

    #[test]
    fn test_cancellation_keeps_earlier_values() {
        struct CancelAfter(usize);
        impl ProgressMonitor for CancelAfter {
            fn update(&self, processed: usize, _total: usize) -> bool {
                processed <= self.0
            }
        }

        let positions = grid(10, 1.0);
        let octree = Octree::build(&positions);
        let (result, counts) = count_neighbors(
            &octree,
            &positions,
            SearchKind::Radius(0.5),
            &CancelAfter(250),
        );
        assert!(matches!(result, Err(MascError::Cancelled)));
        let written = counts.iter().filter(|c| !c.is_nan()).count();
        assert_eq!(250, written);

        let token = CancellationToken::new();
        token.cancel();
        let (result, counts) =
            count_neighbors(&octree, &positions, SearchKind::Radius(0.5), &token);
        assert!(result.unwrap_err().is_cancellation());
        assert!(counts.iter().all(|c| c.is_nan()));
    }

    #[test]
    fn test_level_refines_when_density_doubles() {
        let mut controller = LevelController::new(8, 10.0);
        assert_eq!(8, controller.adjust(20.0));
        // Local density doubles: the next tenth already runs one level deeper
        assert_eq!(9, controller.adjust(40.0));
        // Back in the band, the level stays
        assert_eq!(9, controller.adjust(15.0));
        assert_eq!(9, controller.adjust(28.0));
    }

    #[test]
    fn test_level_coarsening_stops_at_floor() {
        let mut controller = LevelController::new(7, 10.0);
        for _ in 0..10 {
            controller.adjust(1.0);
        }
        assert_eq!(FLOOR_LEVEL, controller.level());

        let mut shallow = LevelController::new(3, 10.0);
        assert_eq!(3, shallow.adjust(1.0));
        assert_eq!(MAX_LEVEL, shallow.adjust(1e12));
    }

    #[test]
    fn test_knn_scan_stays_near_the_population_level() {
        let positions = grid(20, 0.05);
        let octree = Octree::build(&positions);
        let search = SearchKind::Knn {
            k: 6,
            max_radius: f64::INFINITY,
        };
        let (result, counts) = count_neighbors(&octree, &positions, search, &NoProgress);
        let summary = result.unwrap();
        assert!(counts.iter().all(|c| *c == 6.0));
        let expected = octree.level_for_population(6.0) as i32;
        assert!(
            (summary.final_level as i32 - expected).abs() <= 1,
            "final level {} expected around {}",
            summary.final_level,
            expected
        );
    }

    #[test]
    fn test_knn_scan_keeps_a_level_inside_the_band() {
        // 16 points per axis fall into 2 per axis at level 3, so every cell holds 8 points
        let positions = grid(16, 1.0);
        let octree = Octree::build(&positions);
        let search = SearchKind::Knn {
            k: 6,
            max_radius: f64::INFINITY,
        };
        let (result, counts) = count_neighbors(&octree, &positions, search, &NoProgress);
        let summary = result.unwrap();
        assert!(counts.iter().all(|c| *c == 6.0));
        assert_eq!(3, summary.initial_level);
        assert_eq!(3, summary.final_level);
        assert_eq!(0, summary.level_changes);
        let population = summary.last_mean_population.unwrap();
        assert!(population >= 1.1 * 6.0 && population <= 2.9 * 6.0);
    }

    #[test]
    fn test_knn_scan_does_not_run_to_the_deepest_level() {
        let positions = grid(12, 1.0);
        let octree = Octree::build(&positions);
        let search = SearchKind::Knn {
            k: 6,
            max_radius: f64::INFINITY,
        };
        let (result, counts) = count_neighbors(&octree, &positions, search, &NoProgress);
        let summary = result.unwrap();
        assert!(counts.iter().all(|c| *c == 6.0));
        assert!(summary.final_level <= summary.initial_level + 1);
        // Cells hold more than one point on average, so the level is not too deep
        assert!(summary.last_mean_population.unwrap() > 1.0);
    }
}
