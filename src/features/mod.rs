//! Feature derivation shared by training and scoring.
//!
//! Both call paths go through [`engineer`], so a model always sees features
//! built by exactly the same code it was trained on.

pub mod dates;
pub mod temporal;

use tracing::debug;

use crate::csv_reader::Table;
use crate::error::Result;
use crate::schema::FeatureParams;

#[derive(Debug, Clone)]
pub struct Engineered {
    pub table: Table,
    pub generated_date_features: Vec<String>,
    pub generated_temporal_features: Vec<String>,
}

/// Adds temporal aggregates (when `params` is set), then date parts for each
/// date column. Columns that cannot be derived are skipped with a warning.
///
/// `amount_fallback_mean` is the frozen training mean of the amount column
/// (see [`temporal::amount_mean`]).
pub fn engineer(
    table: &Table,
    params: Option<&FeatureParams>,
    amount_fallback_mean: f64,
    date_features: &[String],
) -> Result<Engineered> {
    let (mut table, generated_temporal_features) = match params {
        Some(params) => temporal::generate(table, params, amount_fallback_mean)?,
        None => (table.clone(), Vec::new()),
    };

    let mut generated_date_features = Vec::new();
    for column in date_features {
        generated_date_features.extend(dates::add_date_parts(&mut table, column)?);
    }

    debug!(
        date = generated_date_features.len(),
        temporal = generated_temporal_features.len(),
        "features engineered"
    );
    Ok(Engineered {
        table,
        generated_date_features,
        generated_temporal_features,
    })
}
