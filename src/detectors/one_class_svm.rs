//! One-class SVM with an RBF kernel, trained by SMO on the nu-parameterised dual:
//!
//! ```text
//! min 1/2 a'Ka   s.t.   0 <= a_i <= 1,   sum(a) = nu * l
//! ```
//!
//! The decision value is `sum(a_i K(sv_i, x)) - rho`; negative means outside
//! the learned support.
//!
//! The kernel matrix is never materialised. Rows are computed when the solver
//! asks for them and kept in a least-recently-used cache bounded by
//! [`CACHE_BYTES`].

use std::collections::HashMap;
use std::rc::Rc;

use linfa::dataset::DatasetBase;
use linfa::traits::{Fit, PredictInplace};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{check_records, squared_distance};
use crate::error::{Result, ScoringError};

const UPPER_BOUND: f64 = 1.0;
// Floor for a non-positive curvature along the working pair
const TAU: f64 = 1e-12;
/// Memory budget for cached kernel rows.
pub const CACHE_BYTES: usize = 200 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct OneClassSvmParams {
    nu: f64,
    tolerance: f64,
    max_iterations: usize,
    cache_rows: Option<usize>,
}

impl Default for OneClassSvmParams {
    fn default() -> Self {
        Self {
            nu: 0.5,
            tolerance: 1e-3,
            max_iterations: 100_000,
            cache_rows: None,
        }
    }
}

impl OneClassSvmParams {
    pub fn nu(mut self, nu: f64) -> Self {
        self.nu = nu;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Caps the kernel cache at `n` rows instead of deriving it from [`CACHE_BYTES`].
    pub fn cache_rows(mut self, n: usize) -> Self {
        self.cache_rows = Some(n);
        self
    }

    fn cache_capacity(&self, l: usize) -> usize {
        let budget = self
            .cache_rows
            .unwrap_or(CACHE_BYTES / (std::mem::size_of::<f64>() * l.max(1)));
        budget.clamp(2, l.max(2))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneClassSvm {
    support_vectors: Array2<f64>,
    coefficients: Vec<f64>,
    rho: f64,
    gamma: f64,
}

fn rbf(gamma: f64, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    (-gamma * squared_distance(a, b)).exp()
}

// "scale" heuristic: 1 / (n_features * Var(X))
fn scale_gamma<D: Data<Elem = f64>>(x: &ArrayBase<D, Ix2>) -> f64 {
    let n = x.len() as f64;
    let mean = x.sum() / n;
    let variance = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if variance > 0.0 {
        1.0 / (x.ncols() as f64 * variance)
    } else {
        1.0
    }
}

// LRU cache of kernel rows K(x_i, .)
struct KernelCache {
    x: Array2<f64>,
    gamma: f64,
    capacity: usize,
    rows: HashMap<usize, (u64, Rc<Vec<f64>>)>,
    tick: u64,
}

impl KernelCache {
    fn new(x: Array2<f64>, gamma: f64, capacity: usize) -> Self {
        Self {
            x,
            gamma,
            capacity,
            rows: HashMap::with_capacity(capacity),
            tick: 0,
        }
    }

    fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    fn row(&mut self, i: usize) -> Rc<Vec<f64>> {
        self.tick += 1;
        if let Some(entry) = self.rows.get_mut(&i) {
            entry.0 = self.tick;
            return Rc::clone(&entry.1);
        }

        if self.rows.len() >= self.capacity {
            let oldest = self
                .rows
                .iter()
                .min_by_key(|(_, (used, _))| *used)
                .map(|(&k, _)| k);
            if let Some(k) = oldest {
                self.rows.remove(&k);
            }
        }
        let xi = self.x.row(i);
        let row: Rc<Vec<f64>> = Rc::new(
            self.x
                .rows()
                .into_iter()
                .map(|xt| rbf(self.gamma, xi, xt))
                .collect(),
        );
        self.rows.insert(i, (self.tick, Rc::clone(&row)));
        row
    }
}

struct Solver {
    kernel: KernelCache,
    alpha: Vec<f64>,
    gradient: Vec<f64>,
}

impl Solver {
    fn new(mut kernel: KernelCache, nu: f64) -> Self {
        let l = kernel.n_rows();
        let total = nu * l as f64;
        let n_full = (total.floor() as usize).min(l);

        let mut alpha = vec![0.0; l];
        for a in alpha.iter_mut().take(n_full) {
            *a = UPPER_BOUND;
        }
        if n_full < l {
            alpha[n_full] = total - n_full as f64;
        }

        // K is symmetric, so row j doubles as column j
        let mut gradient = vec![0.0; l];
        for (j, &a) in alpha.iter().enumerate().filter(|(_, a)| **a > 0.0) {
            let row = kernel.row(j);
            for (g, k) in gradient.iter_mut().zip(row.iter()) {
                *g += k * a;
            }
        }

        Self {
            kernel,
            alpha,
            gradient,
        }
    }

    // Maximal violating pair: i can grow, j can shrink
    fn select_pair(&self, tolerance: f64) -> Option<(usize, usize)> {
        let mut up = None;
        let mut up_value = f64::NEG_INFINITY;
        let mut low = None;
        let mut low_value = f64::NEG_INFINITY;
        for (t, (&a, &g)) in self.alpha.iter().zip(&self.gradient).enumerate() {
            if a < UPPER_BOUND && -g >= up_value {
                up_value = -g;
                up = Some(t);
            }
            if a > 0.0 && g >= low_value {
                low_value = g;
                low = Some(t);
            }
        }
        match (up, low) {
            (Some(i), Some(j)) if up_value + low_value > tolerance => Some((i, j)),
            _ => None,
        }
    }

    fn update(&mut self, i: usize, j: usize) {
        let row_i = self.kernel.row(i);
        let row_j = self.kernel.row(j);
        let curvature = (row_i[i] + row_j[j] - 2.0 * row_i[j]).max(TAU);
        let delta = (self.gradient[i] - self.gradient[j]) / curvature;
        let (old_i, old_j) = (self.alpha[i], self.alpha[j]);
        let sum = old_i + old_j;

        let mut new_i = old_i - delta;
        let mut new_j = old_j + delta;
        if sum > UPPER_BOUND {
            if new_i > UPPER_BOUND {
                new_i = UPPER_BOUND;
                new_j = sum - UPPER_BOUND;
            }
        } else if new_j < 0.0 {
            new_j = 0.0;
            new_i = sum;
        }
        if sum > UPPER_BOUND {
            if new_j > UPPER_BOUND {
                new_j = UPPER_BOUND;
                new_i = sum - UPPER_BOUND;
            }
        } else if new_i < 0.0 {
            new_i = 0.0;
            new_j = sum;
        }

        let (d_i, d_j) = (new_i - old_i, new_j - old_j);
        self.alpha[i] = new_i;
        self.alpha[j] = new_j;
        for ((g, k_i), k_j) in self.gradient.iter_mut().zip(row_i.iter()).zip(row_j.iter()) {
            *g += k_i * d_i + k_j * d_j;
        }
    }

    fn rho(&self) -> f64 {
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut free_sum = 0.0;
        let mut n_free = 0usize;
        for (&a, &g) in self.alpha.iter().zip(&self.gradient) {
            if a >= UPPER_BOUND {
                lower = lower.max(g);
            } else if a <= 0.0 {
                upper = upper.min(g);
            } else {
                free_sum += g;
                n_free += 1;
            }
        }
        if n_free > 0 {
            free_sum / n_free as f64
        } else {
            (upper + lower) / 2.0
        }
    }
}

impl<D: Data<Elem = f64>, T> Fit<ArrayBase<D, Ix2>, T, ScoringError> for OneClassSvmParams {
    type Object = OneClassSvm;

    fn fit(&self, dataset: &DatasetBase<ArrayBase<D, Ix2>, T>) -> Result<Self::Object> {
        let x = dataset.records();
        check_records(x)?;
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return Err(ScoringError::Training(format!(
                "nu must be in (0, 1], got {}",
                self.nu
            )));
        }

        let l = x.nrows();
        let gamma = scale_gamma(x);
        let kernel = KernelCache::new(x.to_owned(), gamma, self.cache_capacity(l));

        let mut solver = Solver::new(kernel, self.nu);
        let mut iterations = 0;
        while let Some((i, j)) = solver.select_pair(self.tolerance) {
            if iterations >= self.max_iterations {
                warn!(iterations, "one-class SVM reached the iteration limit before converging");
                break;
            }
            solver.update(i, j);
            iterations += 1;
        }
        let rho = solver.rho();

        let support: Vec<usize> = (0..l).filter(|&i| solver.alpha[i] > 0.0).collect();
        let mut support_vectors = Array2::zeros((support.len(), x.ncols()));
        for (row, &i) in support.iter().enumerate() {
            support_vectors.row_mut(row).assign(&x.row(i));
        }
        let coefficients = support.iter().map(|&i| solver.alpha[i]).collect();
        debug!(iterations, support_vectors = support.len(), rho, "one-class SVM fitted");

        Ok(OneClassSvm {
            support_vectors,
            coefficients,
            rho,
            gamma,
        })
    }
}

impl OneClassSvm {
    pub fn decision_value(&self, point: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .rows()
            .into_iter()
            .zip(&self.coefficients)
            .map(|(sv, &a)| a * rbf(self.gamma, sv, point))
            .sum::<f64>()
            - self.rho
    }

    pub fn n_support(&self) -> usize {
        self.coefficients.len()
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for OneClassSvm {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<f64>) {
        assert_eq!(x.nrows(), y.len(), "one score slot per row");
        for (score, row) in y.iter_mut().zip(x.rows()) {
            *score = self.decision_value(row);
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

    fn blob() -> Array2<f64> {
        let mut x = Array2::zeros((30, 2));
        for i in 0..30 {
            let angle = i as f64 * 0.7;
            let radius = 0.2 + (i % 3) as f64 * 0.1;
            x[[i, 0]] = radius * angle.cos();
            x[[i, 1]] = radius * angle.sin();
        }
        x
    }

    #[test]
    fn test_dual_constraints_hold() {
        let model = OneClassSvmParams::default()
            .fit(&DatasetBase::from(blob()))
            .unwrap();
        let total: f64 = model.coefficients.iter().sum();
        assert!((total - 15.0).abs() < 1e-9, "sum of alphas {}", total);
        assert!(model
            .coefficients
            .iter()
            .all(|&a| a > 0.0 && a <= UPPER_BOUND + 1e-12));
        assert!(model.n_support() >= 15);
    }

    #[test]
    fn test_far_point_scores_below_zero() {
        let model = OneClassSvmParams::default()
            .fit(&DatasetBase::from(blob()))
            .unwrap();
        let scores = model.predict(&array![[0.0, 0.0], [5.0, -5.0]]);
        assert!(scores[1] < 0.0, "outlier score {}", scores[1]);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_invalid_nu_is_rejected() {
        let result = OneClassSvmParams::default()
            .nu(0.0)
            .fit(&DatasetBase::from(blob()));
        assert!(matches!(result, Err(ScoringError::Training(_))));
    }

    #[test]
    fn test_small_kernel_cache_gives_the_same_model() {
        let data = DatasetBase::from(blob());
        let roomy = OneClassSvmParams::default().fit(&data).unwrap();
        let tight = OneClassSvmParams::default().cache_rows(2).fit(&data).unwrap();
        assert_eq!(roomy, tight, "Cache size must not change the solution");
    }

    #[test]
    fn test_kernel_cache_stays_within_capacity() {
        let x = blob();
        let gamma = scale_gamma(&x);
        let mut cache = KernelCache::new(x.clone(), gamma, 3);
        for i in (0..30).chain(0..30).rev() {
            let row = cache.row(i);
            assert_eq!(row.len(), 30);
            assert_eq!(row[i], 1.0);
            assert!(cache.rows.len() <= 3, "{} rows cached", cache.rows.len());
        }
        assert_eq!(cache.row(4)[7], rbf(gamma, x.row(7), x.row(4)));

        // The most recently used rows survive an eviction
        cache.row(10);
        cache.row(11);
        cache.row(12);
        cache.row(10);
        cache.row(13);
        assert!(cache.rows.contains_key(&10));
        assert!(!cache.rows.contains_key(&11));
    }

    #[test]
    fn test_cache_budget_scales_with_rows() {
        let params = OneClassSvmParams::default();
        assert_eq!(params.cache_capacity(1_000), 1_000);
        let big = 1_000_000;
        assert_eq!(params.cache_capacity(big), CACHE_BYTES / (8 * big));
        assert!(params.cache_capacity(big) < big);
        assert_eq!(params.clone().cache_rows(0).cache_capacity(10), 2);
    }

    #[test]
    fn test_scale_gamma_of_constant_data() {
        assert_eq!(scale_gamma(&array![[2.0, 2.0], [2.0, 2.0]]), 1.0);
    }
}
