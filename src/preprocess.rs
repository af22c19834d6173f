//! Column-wise preprocessing frozen at training time: standard scaling for
//! numeric columns, one-hot encoding for categorical ones.
//!
//! Output layout is positional and fixed: numeric block in declaration order,
//! then each categorical column expanded over its sorted vocabulary.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::csv_reader::{Cell, Table};
use crate::error::{Result, ScoringError};
use crate::features::temporal::neutral_default;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Origin {
    /// Supplied by the caller; absence at scoring time is an error
    Raw,
    /// Derived by feature engineering; absence falls back to `fallback`
    Generated { fallback: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericScaler {
    pub name: String,
    pub mean: f64,
    pub scale: f64,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotColumn {
    pub name: String,
    pub vocabulary: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTransform {
    numeric: Vec<NumericScaler>,
    categorical: Vec<OneHotColumn>,
}

fn numeric_values(cells: &[Cell], column: &str) -> Result<Vec<Option<f64>>> {
    cells
        .iter()
        .enumerate()
        .map(|(row, cell)| {
            if cell.is_missing() {
                return Ok(None);
            }
            cell.as_f64().map(Some).ok_or_else(|| ScoringError::InvalidValue {
                column: column.to_string(),
                row,
                value: cell.category().unwrap_or_default(),
            })
        })
        .collect()
}

// Mean and population standard deviation over the present values
fn fit_scaler(values: &[Option<f64>]) -> (f64, f64) {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return (0.0, 1.0);
    }
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let variance = present.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let scale = if std_dev > 0.0 && std_dev.is_finite() {
        std_dev
    } else {
        1.0
    };
    (mean, scale)
}

/// Fits the transform on the training table.
///
/// Declared features absent from `table` are dropped with a warning; the fit
/// fails with a configuration error only when nothing is left.
pub fn build(
    table: &Table,
    numeric: &[String],
    categorical: &[String],
    generated: &[String],
) -> Result<FittedTransform> {
    let mut scalers = Vec::new();
    for name in numeric {
        let Some(cells) = table.column(name) else {
            warn!(column = %name, "numeric feature not found in table, dropping it");
            continue;
        };
        let values = numeric_values(cells, name)?;
        let (mean, scale) = fit_scaler(&values);
        let origin = if generated.contains(name) {
            Origin::Generated {
                fallback: neutral_default(name),
            }
        } else {
            Origin::Raw
        };
        scalers.push(NumericScaler {
            name: name.clone(),
            mean,
            scale,
            origin,
        });
    }

    let mut encoders = Vec::new();
    for name in categorical {
        let Some(cells) = table.column(name) else {
            warn!(column = %name, "categorical feature not found in table, dropping it");
            continue;
        };
        let vocabulary: BTreeSet<String> = cells.iter().filter_map(Cell::category).collect();
        encoders.push(OneHotColumn {
            name: name.clone(),
            vocabulary: vocabulary.into_iter().collect(),
        });
    }

    if scalers.is_empty() && encoders.is_empty() {
        return Err(ScoringError::Configuration(
            "at least one numeric or categorical feature present in the data must be selected"
                .to_string(),
        ));
    }

    let transform = FittedTransform {
        numeric: scalers,
        categorical: encoders,
    };
    debug!(columns = transform.n_outputs(), "preprocessing fitted");
    Ok(transform)
}

impl FittedTransform {
    pub fn numeric(&self) -> &[NumericScaler] {
        &self.numeric
    }

    pub fn categorical(&self) -> &[OneHotColumn] {
        &self.categorical
    }

    pub fn n_outputs(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|c| c.vocabulary.len())
                .sum::<usize>()
    }

    /// `name` for numeric columns, `name=value` for each one-hot slot.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.numeric.iter().map(|s| s.name.clone()).collect();
        for encoder in &self.categorical {
            for value in &encoder.vocabulary {
                columns.push(format!("{}={}", encoder.name, value));
            }
        }
        columns
    }

    pub fn vocabularies(&self) -> BTreeMap<String, Vec<String>> {
        self.categorical
            .iter()
            .map(|c| (c.name.clone(), c.vocabulary.clone()))
            .collect()
    }

    /// Applies the frozen transform. Unknown categories encode as all zeros.
    pub fn transform(&self, table: &Table) -> Result<Array2<f64>> {
        let n = table.n_rows();
        let mut out = Array2::zeros((n, self.n_outputs()));

        for (j, scaler) in self.numeric.iter().enumerate() {
            let values = match (table.column(&scaler.name), &scaler.origin) {
                (Some(cells), _) => numeric_values(cells, &scaler.name)?,
                (None, Origin::Generated { fallback }) => {
                    warn!(
                        column = %scaler.name,
                        fallback,
                        "generated feature unavailable, using its neutral default"
                    );
                    vec![Some(*fallback); n]
                }
                (None, Origin::Raw) => {
                    return Err(ScoringError::MissingFeature(scaler.name.clone()));
                }
            };
            for (i, value) in values.into_iter().enumerate() {
                // missing cells take the training mean, i.e. 0 after scaling
                out[[i, j]] = value.map_or(0.0, |x| (x - scaler.mean) / scaler.scale);
            }
        }

        let mut offset = self.numeric.len();
        for encoder in &self.categorical {
            let cells = table
                .column(&encoder.name)
                .ok_or_else(|| ScoringError::MissingFeature(encoder.name.clone()))?;
            for (i, cell) in cells.iter().enumerate() {
                let slot = cell
                    .category()
                    .and_then(|key| encoder.vocabulary.iter().position(|v| *v == key));
                if let Some(k) = slot {
                    out[[i, offset + k]] = 1.0;
                }
            }
            offset += encoder.vocabulary.len();
        }

        Ok(out)
    }
}
