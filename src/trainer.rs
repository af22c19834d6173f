use chrono::Utc;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::csv_reader::Table;
use crate::detectors::Detector;
use crate::error::{Result, ScoringError};
use crate::features;
use crate::preprocess::{self, FittedTransform, Origin};
use crate::schema::{FeatureSchema, TrainSpec, DEFAULT_SEED, MODEL_TYPE_ANOMALY};

/// Fitted preprocessing plus fitted estimator, applied as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub transform: FittedTransform,
    pub detector: Detector,
}

impl ModelArtifact {
    /// Decision scores for an already engineered table.
    pub fn decision_function(&self, table: &Table) -> Result<Array1<f64>> {
        let x = self.transform.transform(table)?;
        Ok(self.detector.decision_function(&x))
    }

    /// Fails when `schema` describes different columns than this artifact consumes.
    pub fn check_schema(&self, schema: &FeatureSchema) -> Result<()> {
        let numeric: Vec<String> = self.transform.numeric().iter().map(|s| s.name.clone()).collect();
        if numeric != schema.numeric_columns() {
            return Err(ScoringError::ModelMismatch(format!(
                "artifact scales {:?} but config lists {:?}",
                numeric,
                schema.numeric_columns()
            )));
        }
        if self.transform.output_columns() != schema.feature_columns {
            return Err(ScoringError::ModelMismatch(
                "artifact and config disagree on feature columns".to_string(),
            ));
        }
        Ok(())
    }
}

fn dedup(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

// Rejects requests that cannot produce a model whatever the data holds
fn validate_spec(spec: &TrainSpec) -> Result<()> {
    if spec.numerical_features.is_empty()
        && spec.categorical_features.is_empty()
        && spec.date_features.is_empty()
        && spec.feature_engineering.is_none()
    {
        return Err(ScoringError::Configuration(
            "select at least one feature".to_string(),
        ));
    }
    if let Some(params) = &spec.feature_engineering {
        if params.columns().iter().any(|c| c.trim().is_empty()) {
            return Err(ScoringError::Configuration(
                "feature engineering needs entity, timestamp and amount column names".to_string(),
            ));
        }
    }
    Ok(())
}

/// Fits preprocessing and estimator on the whole table (no split: there is
/// no ground truth to validate against) and describes the result as a
/// [`FeatureSchema`].
pub fn train(table: &Table, spec: &TrainSpec) -> Result<(ModelArtifact, FeatureSchema)> {
    validate_spec(spec)?;
    if table.n_rows() == 0 {
        return Err(ScoringError::Configuration(
            "training data has no rows".to_string(),
        ));
    }
    if let Some(params) = &spec.feature_engineering {
        if let Some(missing) = params.columns().into_iter().find(|c| !table.has_column(c)) {
            return Err(ScoringError::Configuration(format!(
                "feature engineering column '{}' is not in the training data",
                missing
            )));
        }
    }

    let amount_fallback_mean = spec
        .feature_engineering
        .as_ref()
        .and_then(|p| features::temporal::amount_mean(table, p))
        .unwrap_or(0.0);
    let engineered = features::engineer(
        table,
        spec.feature_engineering.as_ref(),
        amount_fallback_mean,
        &spec.date_features,
    )?;
    let generated: Vec<String> = engineered
        .generated_date_features
        .iter()
        .chain(&engineered.generated_temporal_features)
        .cloned()
        .collect();
    let numeric = dedup(
        spec.numerical_features
            .iter()
            .filter(|n| !generated.contains(n))
            .cloned()
            .chain(generated.iter().cloned()),
    );
    let categorical = dedup(spec.categorical_features.iter().cloned());

    let transform = preprocess::build(&engineered.table, &numeric, &categorical, &generated)?;
    let x = transform.transform(&engineered.table)?;
    let seed = spec.seed.unwrap_or(DEFAULT_SEED);
    let detector = Detector::fit(spec.algorithm, &x, seed)?;

    let numerical_features = transform
        .numeric()
        .iter()
        .filter(|s| s.origin == Origin::Raw)
        .map(|s| s.name.clone())
        .collect();
    let schema = FeatureSchema {
        model_type: MODEL_TYPE_ANOMALY.to_string(),
        algorithm: spec.algorithm,
        numerical_features,
        categorical_features: transform.categorical().iter().map(|c| c.name.clone()).collect(),
        date_features: spec.date_features.clone(),
        generated_date_features: engineered.generated_date_features,
        generated_temporal_features: engineered.generated_temporal_features,
        feature_engineering: spec.feature_engineering.clone(),
        amount_fallback_mean,
        categorical_values: transform.vocabularies(),
        feature_columns: transform.output_columns(),
        n_training_rows: table.n_rows(),
        trained_at: Utc::now(),
    };

    info!(
        algorithm = %spec.algorithm,
        rows = x.nrows(),
        columns = x.ncols(),
        seed,
        "anomaly detector trained"
    );
    Ok((ModelArtifact { transform, detector }, schema))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_reader::from_reader;
    use crate::schema::FeatureParams;

    const DATA: &str = "card_id,ts,amt,channel\n\
        a,2024-01-01 09:00:00,10,web\n\
        a,2024-01-01 09:30:00,12,web\n\
        b,2024-01-01 10:00:00,11,pos\n\
        b,2024-01-02 23:00:00,9,pos\n\
        a,2024-01-03 12:00:00,13,web\n";

    #[test]
    fn test_schema_lists_what_the_transform_outputs() {
        let table = from_reader(DATA.as_bytes()).unwrap();
        let spec = TrainSpec {
            numerical_features: vec!["amt".into(), "velocity".into()],
            categorical_features: vec!["channel".into()],
            date_features: vec!["ts".into()],
            feature_engineering: Some(FeatureParams {
                entity_column: "card_id".into(),
                timestamp_column: "ts".into(),
                amount_column: "amt".into(),
            }),
            ..TrainSpec::default()
        };
        let (artifact, schema) = train(&table, &spec).unwrap();

        assert_eq!(schema.numerical_features, vec!["amt"]);
        assert_eq!(schema.generated_date_features.len(), 4);
        assert_eq!(schema.generated_temporal_features.len(), 5);
        assert_eq!(schema.feature_columns, artifact.transform.output_columns());
        assert_eq!(schema.feature_columns.len(), 1 + 4 + 5 + 2);
        assert_eq!(schema.categorical_values["channel"], vec!["pos", "web"]);
        assert_eq!(schema.n_training_rows, 5);
        assert_eq!(schema.amount_fallback_mean, 11.0);
        artifact.check_schema(&schema).unwrap();
    }

    #[test]
    fn test_missing_engineering_column_is_rejected() {
        let table = from_reader(DATA.as_bytes()).unwrap();
        let spec = TrainSpec {
            numerical_features: vec!["amt".into()],
            feature_engineering: Some(FeatureParams {
                entity_column: "card_number".into(),
                timestamp_column: "ts".into(),
                amount_column: "amt".into(),
            }),
            ..TrainSpec::default()
        };
        match train(&table, &spec) {
            Err(ScoringError::Configuration(msg)) => assert!(msg.contains("card_number"), "{}", msg),
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_check_schema_rejects_other_models_config() {
        let table = from_reader(DATA.as_bytes()).unwrap();
        let amount_only = TrainSpec {
            numerical_features: vec!["amt".into()],
            ..TrainSpec::default()
        };
        let with_channel = TrainSpec {
            categorical_features: vec!["channel".into()],
            ..amount_only.clone()
        };
        let (artifact, _) = train(&table, &amount_only).unwrap();
        let (_, other_schema) = train(&table, &with_channel).unwrap();
        assert!(matches!(
            artifact.check_schema(&other_schema),
            Err(ScoringError::ModelMismatch(_))
        ));
    }

    #[test]
    fn test_empty_feature_set_is_rejected() {
        let table = from_reader(DATA.as_bytes()).unwrap();
        let result = train(&table, &TrainSpec::default());
        assert!(matches!(result, Err(ScoringError::Configuration(_))));

        let spec = TrainSpec {
            numerical_features: vec!["not_a_column".into()],
            ..TrainSpec::default()
        };
        assert!(matches!(
            train(&table, &spec),
            Err(ScoringError::Configuration(_))
        ));
    }

    #[test]
    fn test_blank_engineering_column_is_rejected() {
        let table = from_reader(DATA.as_bytes()).unwrap();
        let spec = TrainSpec {
            numerical_features: vec!["amt".into()],
            feature_engineering: Some(FeatureParams {
                entity_column: "card_id".into(),
                timestamp_column: " ".into(),
                amount_column: "amt".into(),
            }),
            ..TrainSpec::default()
        };
        assert!(matches!(
            train(&table, &spec),
            Err(ScoringError::Configuration(_))
        ));
    }
}
