use linfa::dataset::DatasetBase;
use linfa::traits::{Fit, PredictInplace};
use ndarray::{Array1, ArrayBase, ArrayView1, Data, Ix2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::check_records;
use crate::error::{Result, ScoringError};
use crate::schema::DEFAULT_SEED;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
// Offset of the "auto" contamination setting: decision < 0 means anomaly
const DECISION_OFFSET: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForestParams {
    n_estimators: usize,
    max_samples: usize,
    seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            seed: DEFAULT_SEED,
        }
    }
}

impl IsolationForestParams {
    pub fn n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn max_samples(mut self, n: usize) -> Self {
        self.max_samples = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

// Average path length of an unsuccessful BST search over n points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn build_tree<D: Data<Elem = f64>>(
    x: &ArrayBase<D, Ix2>,
    indices: Vec<usize>,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= max_depth || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    // Only features that still vary inside this node can split it
    let ranges: Vec<(usize, f64, f64)> = (0..x.ncols())
        .filter_map(|feature| {
            let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = x[[i, feature]];
                (lo.min(v), hi.max(v))
            });
            (lo < hi).then_some((feature, lo, hi))
        })
        .collect();
    if ranges.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, lo, hi) = ranges[rng.gen_range(0..ranges.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| x[[i, feature]] < threshold);
    if left.is_empty() || right.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(x, left, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(x, right, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, sample: ArrayView1<f64>) -> f64 {
    let mut node = node;
    let mut depth = 0.0;
    loop {
        match node {
            Node::Leaf { size } => return depth + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                node = if sample[*feature] < *threshold {
                    left
                } else {
                    right
                };
                depth += 1.0;
            }
        }
    }
}

impl<D: Data<Elem = f64>, T> Fit<ArrayBase<D, Ix2>, T, ScoringError> for IsolationForestParams {
    type Object = IsolationForest;

    fn fit(&self, dataset: &DatasetBase<ArrayBase<D, Ix2>, T>) -> Result<Self::Object> {
        let x = dataset.records();
        check_records(x)?;
        if self.n_estimators == 0 || self.max_samples == 0 {
            return Err(ScoringError::Training(
                "isolation forest needs at least one tree and one sample per tree".to_string(),
            ));
        }

        let n = x.nrows();
        let sample_size = self.max_samples.min(n);
        let max_depth = (sample_size as f64).log2().ceil().max(0.0) as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let trees = (0..self.n_estimators)
            .map(|_| {
                let indices = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                build_tree(x, indices, 0, max_depth, &mut rng)
            })
            .collect();

        Ok(IsolationForest { trees, sample_size })
    }
}

impl IsolationForest {
    /// Raw anomaly score in (0, 1]; values near 1 are easy to isolate.
    pub fn anomaly_score(&self, sample: ArrayView1<f64>) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| path_length(tree, sample))
            .sum::<f64>()
            / self.trees.len().max(1) as f64;
        let normalizer = average_path_length(self.sample_size).max(f64::EPSILON);
        2f64.powf(-mean_path / normalizer)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for IsolationForest {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<f64>) {
        assert_eq!(x.nrows(), y.len(), "one score slot per row");
        for (score, row) in y.iter_mut().zip(x.rows()) {
            *score = DECISION_OFFSET - self.anomaly_score(row);
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}
