//! Unsupervised anomaly estimators.
//!
//! Each one is a linfa `Fit` params type producing a model that implements
//! `PredictInplace` into decision scores: higher is more normal, below zero
//! is flagged as an anomaly.

mod isolation_forest;
mod lof;
mod one_class_svm;

pub use isolation_forest::{IsolationForest, IsolationForestParams};
pub use lof::{LocalOutlierFactor, LocalOutlierFactorParams};
pub use one_class_svm::{OneClassSvm, OneClassSvmParams};

use linfa::dataset::DatasetBase;
use linfa::traits::{Fit, Predict};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoringError};
use crate::schema::Algorithm;

/// Scores strictly below this are reported as anomalies.
pub const ANOMALY_THRESHOLD: f64 = 0.0;

pub(crate) fn check_records<D: Data<Elem = f64>>(x: &ArrayBase<D, Ix2>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ScoringError::Training(format!(
            "cannot fit on an empty matrix ({} x {})",
            x.nrows(),
            x.ncols()
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ScoringError::Training(
            "feature matrix contains NaN or infinite values".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// A fitted estimator of any supported kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Detector {
    IsolationForest(IsolationForest),
    LocalOutlierFactor(LocalOutlierFactor),
    OneClassSvm(OneClassSvm),
}

impl Detector {
    pub fn fit(algorithm: Algorithm, x: &Array2<f64>, seed: u64) -> Result<Self> {
        let dataset = DatasetBase::from(x.clone());
        let detector = match algorithm {
            Algorithm::IsolationForest => {
                Detector::IsolationForest(IsolationForestParams::default().seed(seed).fit(&dataset)?)
            }
            Algorithm::LocalOutlierFactor => {
                Detector::LocalOutlierFactor(LocalOutlierFactorParams::default().fit(&dataset)?)
            }
            Algorithm::OneClassSvm => {
                Detector::OneClassSvm(OneClassSvmParams::default().fit(&dataset)?)
            }
        };
        Ok(detector)
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Detector::IsolationForest(_) => Algorithm::IsolationForest,
            Detector::LocalOutlierFactor(_) => Algorithm::LocalOutlierFactor,
            Detector::OneClassSvm(_) => Algorithm::OneClassSvm,
        }
    }

    /// One decision score per row.
    pub fn decision_function(&self, x: &Array2<f64>) -> Array1<f64> {
        match self {
            Detector::IsolationForest(model) => model.predict(x),
            Detector::LocalOutlierFactor(model) => model.predict(x),
            Detector::OneClassSvm(model) => model.predict(x),
        }
    }
}
