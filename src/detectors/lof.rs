use linfa::dataset::DatasetBase;
use linfa::traits::{Fit, PredictInplace};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix2};
use serde::{Deserialize, Serialize};

use super::{check_records, squared_distance};
use crate::error::{Result, ScoringError};

// Guards the reachability mean against duplicated points
const LRD_EPSILON: f64 = 1e-10;
// Offset of the "auto" contamination setting
const DECISION_OFFSET: f64 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalOutlierFactorParams {
    n_neighbors: usize,
}

impl Default for LocalOutlierFactorParams {
    fn default() -> Self {
        Self { n_neighbors: 20 }
    }
}

impl LocalOutlierFactorParams {
    pub fn n_neighbors(mut self, k: usize) -> Self {
        self.n_neighbors = k;
        self
    }
}

/// Local outlier factor in novelty mode: the training set is kept so new
/// points can be compared against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOutlierFactor {
    train: Array2<f64>,
    k: usize,
    k_distance: Vec<f64>,
    lrd: Vec<f64>,
}

// k nearest training rows of `point`, nearest first, optionally skipping one row
fn k_nearest(
    train: &Array2<f64>,
    point: ArrayView1<f64>,
    k: usize,
    skip: Option<usize>,
) -> Vec<(usize, f64)> {
    let mut distances: Vec<(usize, f64)> = train
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != skip)
        .map(|(i, row)| (i, squared_distance(row, point).sqrt()))
        .collect();
    distances.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    distances.truncate(k);
    distances
}

impl<D: Data<Elem = f64>, T> Fit<ArrayBase<D, Ix2>, T, ScoringError> for LocalOutlierFactorParams {
    type Object = LocalOutlierFactor;

    fn fit(&self, dataset: &DatasetBase<ArrayBase<D, Ix2>, T>) -> Result<Self::Object> {
        let x = dataset.records();
        check_records(x)?;
        if x.nrows() < 2 || self.n_neighbors == 0 {
            return Err(ScoringError::Training(
                "local outlier factor needs at least two rows and one neighbor".to_string(),
            ));
        }

        let train = x.to_owned();
        let k = self.n_neighbors.min(train.nrows() - 1);

        let neighbors: Vec<Vec<(usize, f64)>> = (0..train.nrows())
            .map(|i| k_nearest(&train, train.row(i), k, Some(i)))
            .collect();
        let k_distance: Vec<f64> = neighbors
            .iter()
            .map(|n| n.last().map_or(0.0, |&(_, d)| d))
            .collect();
        let lrd = neighbors
            .iter()
            .map(|n| local_reachability_density(n, &k_distance))
            .collect();

        Ok(LocalOutlierFactor {
            train,
            k,
            k_distance,
            lrd,
        })
    }
}

fn local_reachability_density(neighbors: &[(usize, f64)], k_distance: &[f64]) -> f64 {
    let reach_sum: f64 = neighbors
        .iter()
        .map(|&(o, d)| k_distance[o].max(d))
        .sum();
    let mean_reach = reach_sum / neighbors.len().max(1) as f64;
    1.0 / (mean_reach + LRD_EPSILON)
}

impl LocalOutlierFactor {
    /// LOF of a new point against the training set; about 1 for inliers.
    pub fn outlier_factor(&self, point: ArrayView1<f64>) -> f64 {
        let neighbors = k_nearest(&self.train, point, self.k, None);
        let lrd_point = local_reachability_density(&neighbors, &self.k_distance);
        let ratio_sum: f64 = neighbors.iter().map(|&(o, _)| self.lrd[o] / lrd_point).sum();
        ratio_sum / neighbors.len().max(1) as f64
    }

    pub fn n_neighbors(&self) -> usize {
        self.k
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for LocalOutlierFactor {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<f64>) {
        assert_eq!(x.nrows(), y.len(), "one score slot per row");
        for (score, row) in y.iter_mut().zip(x.rows()) {
            *score = DECISION_OFFSET - self.outlier_factor(row);
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linfa::traits::Predict;
    use ndarray::array;

    fn grid() -> Array2<f64> {
        let mut x = Array2::zeros((25, 2));
        for i in 0..25 {
            x[[i, 0]] = (i % 5) as f64;
            x[[i, 1]] = (i / 5) as f64;
        }
        x
    }

    #[test]
    fn test_far_point_is_flagged_and_grid_point_is_not() {
        let model = LocalOutlierFactorParams::default()
            .n_neighbors(5)
            .fit(&DatasetBase::from(grid()))
            .unwrap();
        let probe = array![[2.0, 2.0], [40.0, 40.0]];
        let scores = model.predict(&probe);
        assert!(scores[0] > 0.0, "inlier score {}", scores[0]);
        assert!(scores[1] < 0.0, "outlier score {}", scores[1]);
    }

    #[test]
    fn test_neighbors_capped_by_training_size() {
        let x = array![[0.0], [1.0], [2.0]];
        let model = LocalOutlierFactorParams::default()
            .fit(&DatasetBase::from(x))
            .unwrap();
        assert_eq!(model.n_neighbors(), 2);
    }

    #[test]
    fn test_duplicates_stay_finite() {
        let x = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let model = LocalOutlierFactorParams::default()
            .fit(&DatasetBase::from(x.clone()))
            .unwrap();
        assert!(model.predict(&x).iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_single_row_is_rejected() {
        let result = LocalOutlierFactorParams::default().fit(&DatasetBase::from(array![[1.0]]));
        assert!(matches!(result, Err(ScoringError::Training(_))));
    }
}
