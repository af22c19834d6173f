//! Scoring engine: rebuilds features with the shared derivation code, applies
//! the frozen transform and returns one decision score per input row.
//!
//! A record scored on its own has no history, so its temporal aggregates are
//! the "no history" values (zero count and sum, 86400 s since the last
//! transaction, deviation from the training mean amount). Batch scoring sees
//! each entity's earlier rows.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::csv_reader::Table;
use crate::detectors::ANOMALY_THRESHOLD;
use crate::error::{Result, ScoringError};
use crate::features;
use crate::schema::{FeatureSchema, RecordInput};
use crate::trainer::ModelArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub anomaly_score: f64,
    pub is_anomaly: bool,
}

impl Score {
    pub fn new(anomaly_score: f64) -> Self {
        Self {
            anomaly_score,
            is_anomaly: anomaly_score < ANOMALY_THRESHOLD,
        }
    }
}

/// Scores every row of `table`, in input row order.
pub fn score_table(table: &Table, artifact: &ModelArtifact, schema: &FeatureSchema) -> Result<Vec<Score>> {
    if table.n_rows() == 0 {
        return Ok(Vec::new());
    }

    let engineered = features::engineer(
        table,
        schema.feature_engineering.as_ref(),
        schema.amount_fallback_mean,
        &schema.date_features,
    )?;
    for name in schema
        .generated_date_features
        .iter()
        .chain(&schema.generated_temporal_features)
    {
        if !engineered.table.has_column(name) {
            warn!(feature = %name, "generated feature could not be rebuilt for this input");
        }
    }

    let scores = artifact.decision_function(&engineered.table)?;
    debug!(rows = scores.len(), "scored");
    Ok(scores.iter().map(|&s| Score::new(s)).collect())
}

/// Scores one flat record. Only raw inputs declared by the schema are
/// accepted as fields; pass-through values belong in `extra`.
pub fn score_record(
    record: &RecordInput,
    artifact: &ModelArtifact,
    schema: &FeatureSchema,
) -> Result<Score> {
    record.validate(schema)?;
    if !record.extra.is_empty() {
        debug!(keys = ?record.extra.keys().collect::<Vec<_>>(), "ignoring extra record fields");
    }
    let table = Table::from_record(&record.fields);
    score_table(&table, artifact, schema)?
        .into_iter()
        .next()
        .ok_or_else(|| ScoringError::InvalidInput("record produced no score".to_string()))
}
