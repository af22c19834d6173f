//! Feature schema: the frozen description of how a raw record becomes a model input.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::csv_reader::Cell;
use crate::error::{Result, ScoringError};

pub const MODEL_TYPE_ANOMALY: &str = "anomaly_detection";
pub const DEFAULT_SEED: u64 = 42;

/// Columns that drive the per-entity temporal features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureParams {
    pub entity_column: String,
    pub timestamp_column: String,
    pub amount_column: String,
}

impl FeatureParams {
    pub fn columns(&self) -> [&str; 3] {
        [
            &self.entity_column,
            &self.timestamp_column,
            &self.amount_column,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    IsolationForest,
    LocalOutlierFactor,
    OneClassSvm,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::IsolationForest => "isolation_forest",
            Algorithm::LocalOutlierFactor => "local_outlier_factor",
            Algorithm::OneClassSvm => "one_class_svm",
        };
        f.write_str(name)
    }
}

impl FromStr for Algorithm {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "isolation_forest" | "iforest" => Ok(Algorithm::IsolationForest),
            "local_outlier_factor" | "lof" => Ok(Algorithm::LocalOutlierFactor),
            "one_class_svm" | "ocsvm" => Ok(Algorithm::OneClassSvm),
            other => Err(ScoringError::InvalidInput(format!(
                "unknown algorithm '{}'",
                other
            ))),
        }
    }
}

/// What the caller asks the trainer to build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainSpec {
    #[serde(default)]
    pub numerical_features: Vec<String>,
    #[serde(default)]
    pub categorical_features: Vec<String>,
    #[serde(default)]
    pub date_features: Vec<String>,
    #[serde(default)]
    pub feature_engineering: Option<FeatureParams>,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Persisted config of a trained model. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub model_type: String,
    pub algorithm: Algorithm,
    pub numerical_features: Vec<String>,
    pub categorical_features: Vec<String>,
    pub date_features: Vec<String>,
    pub generated_date_features: Vec<String>,
    pub generated_temporal_features: Vec<String>,
    pub feature_engineering: Option<FeatureParams>,
    /// Training mean of the amount column; the 24h baseline for rows with no history
    #[serde(default)]
    pub amount_fallback_mean: f64,
    pub categorical_values: BTreeMap<String, Vec<String>>,
    pub feature_columns: Vec<String>,
    pub n_training_rows: usize,
    pub trained_at: DateTime<Utc>,
}

impl FeatureSchema {
    /// Numeric block order: raw, then date parts, then temporal aggregates.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.numerical_features
            .iter()
            .chain(&self.generated_date_features)
            .chain(&self.generated_temporal_features)
            .cloned()
            .collect()
    }

    /// Every raw column a scoring call may need to supply.
    pub fn raw_inputs(&self) -> Vec<String> {
        let mut inputs: Vec<String> = Vec::new();
        let fe_columns = self
            .feature_engineering
            .iter()
            .flat_map(|p| p.columns().map(str::to_string));
        for name in self
            .numerical_features
            .iter()
            .chain(&self.categorical_features)
            .chain(&self.date_features)
            .cloned()
            .chain(fe_columns)
        {
            if !inputs.contains(&name) {
                inputs.push(name);
            }
        }
        inputs
    }
}

/// Single-record scoring input: declared raw fields plus an explicit pass-through bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordInput {
    pub fields: BTreeMap<String, Cell>,
    #[serde(default)]
    pub extra: BTreeMap<String, Cell>,
}

impl RecordInput {
    /// Rejects any field the schema does not declare as a raw input.
    pub fn validate(&self, schema: &FeatureSchema) -> Result<()> {
        let inputs = schema.raw_inputs();
        if let Some(unknown) = self.fields.keys().find(|k| !inputs.contains(k)) {
            return Err(ScoringError::InvalidInput(format!(
                "field '{}' is not a raw input of this model; put pass-through values in 'extra'",
                unknown
            )));
        }
        Ok(())
    }
}
