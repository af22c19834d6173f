//! Per-entity behavioral features over a time-ordered transaction stream.
//!
//! Every aggregate attached to a row only sees rows of the same entity with a
//! strictly earlier timestamp, so a model trained on these features never
//! learns from information that would not exist at real-time scoring.

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, warn};

use crate::csv_reader::Table;
use crate::error::Result;
use crate::features::dates::parse_column;
use crate::schema::FeatureParams;

pub const IS_NIGHT: &str = "is_night";
pub const TX_COUNT_1H: &str = "card_tx_count_1h";
pub const AMOUNT_SUM_1H: &str = "card_amount_sum_1h";
pub const TIME_SINCE_LAST_TX: &str = "time_since_last_tx_card";
pub const AMOUNT_DEV_24H: &str = "amount_dev_from_24h_mean";

pub const NIGHT_START_HOUR: u32 = 22;
pub const NIGHT_END_HOUR: u32 = 6;
/// Filled in for an entity's first record, which has no predecessor.
pub const NO_HISTORY_SECONDS: f64 = 86_400.0;

const ONE_HOUR_MS: i64 = 3_600_000;
const ONE_DAY_MS: i64 = 24 * ONE_HOUR_MS;

/// Value used when a generated column cannot be reconstructed at scoring time.
pub fn neutral_default(name: &str) -> f64 {
    if name == TIME_SINCE_LAST_TX {
        NO_HISTORY_SECONDS
    } else {
        0.0
    }
}

// Both hour 22 and hour 6 count as night
pub fn is_night_hour(hour: u32) -> bool {
    hour >= NIGHT_START_HOUR || hour <= NIGHT_END_HOUR
}

/// Trailing-window sums over one entity's rows, sorted by time.
struct EntityWindow<'a> {
    millis: &'a [i64],
    // prefix[i] = sum of amounts[..i]
    prefix: Option<Vec<f64>>,
}

impl<'a> EntityWindow<'a> {
    fn new(millis: &'a [i64], amounts: Option<Vec<f64>>) -> Self {
        let prefix = amounts.map(|amounts| {
            let mut prefix = Vec::with_capacity(amounts.len() + 1);
            prefix.push(0.0);
            for a in amounts {
                prefix.push(prefix[prefix.len() - 1] + a);
            }
            prefix
        });
        Self { millis, prefix }
    }

    // First position whose timestamp is >= `from`
    fn lower_bound(&self, from: i64) -> usize {
        self.millis.partition_point(|&t| t < from)
    }

    // Rows in [t - width, t), i.e. strictly earlier than position k
    fn window(&self, k: usize, width_ms: i64) -> (usize, usize) {
        let t = self.millis[k];
        let end = self.lower_bound(t);
        let start = self.lower_bound(t - width_ms).min(end);
        (start, end)
    }

    fn count(&self, k: usize, width_ms: i64) -> usize {
        let (start, end) = self.window(k, width_ms);
        end - start
    }

    fn sum(&self, k: usize, width_ms: i64) -> Option<f64> {
        let (start, end) = self.window(k, width_ms);
        self.prefix.as_ref().map(|p| p[end] - p[start])
    }
}

/// Mean of the amount column, frozen at training time as the 24h baseline for
/// rows without prior history. `None` when the column is absent or not fully numeric.
pub fn amount_mean(table: &Table, params: &FeatureParams) -> Option<f64> {
    let amounts: Vec<f64> = table
        .column(&params.amount_column)?
        .iter()
        .map(|c| c.as_f64())
        .collect::<Option<_>>()?;
    if amounts.is_empty() {
        return None;
    }
    Some(amounts.iter().sum::<f64>() / amounts.len() as f64)
}

/// Adds the temporal features to a copy of `table`.
///
/// Soft-fails (unchanged table, no names) when one of the three configured
/// columns is absent or the timestamp column does not parse. Rows keep their
/// input order; the (entity, timestamp) ordering is only used internally.
/// A row with no same-entity history in the previous 24h deviates from
/// `fallback_mean` rather than from anything in `table`.
pub fn generate(
    table: &Table,
    params: &FeatureParams,
    fallback_mean: f64,
) -> Result<(Table, Vec<String>)> {
    for column in params.columns() {
        if !table.has_column(column) {
            warn!(column, "feature engineering column not found, skipping temporal features");
            return Ok((table.clone(), Vec::new()));
        }
    }

    let n = table.n_rows();
    let entity_cells = table.column(&params.entity_column).unwrap_or_default();
    let stamp_cells = table.column(&params.timestamp_column).unwrap_or_default();
    let amount_cells = table.column(&params.amount_column).unwrap_or_default();

    let Some(stamps) = parse_column(stamp_cells) else {
        warn!(
            column = %params.timestamp_column,
            "timestamp column could not be parsed, skipping temporal features"
        );
        return Ok((table.clone(), Vec::new()));
    };

    let entities: Vec<String> = entity_cells
        .iter()
        .map(|c| c.category().unwrap_or_default())
        .collect();
    let amounts: Option<Vec<f64>> = amount_cells.iter().map(|c| c.as_f64()).collect();
    if amounts.is_none() {
        warn!(
            column = %params.amount_column,
            "amount column has missing or non-numeric values, skipping amount features"
        );
    }

    // Stable: rows with equal (entity, timestamp) keep their input order
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        entities[a]
            .cmp(&entities[b])
            .then_with(|| stamps[a].cmp(&stamps[b]))
    });

    let mut is_night = vec![0.0; n];
    let mut count_1h = vec![0.0; n];
    let mut sum_1h = vec![0.0; n];
    let mut since_last = vec![NO_HISTORY_SECONDS; n];
    let mut deviation = vec![0.0; n];

    for (row, stamp) in stamps.iter().enumerate() {
        if is_night_hour(stamp.hour()) {
            is_night[row] = 1.0;
        }
    }

    let mut group_start = 0;
    while group_start < n {
        let entity = &entities[order[group_start]];
        let group_end = order[group_start..]
            .iter()
            .position(|&row| &entities[row] != entity)
            .map_or(n, |offset| group_start + offset);
        let rows = &order[group_start..group_end];

        let millis: Vec<i64> = rows.iter().map(|&r| to_millis(&stamps[r])).collect();
        let group_amounts = amounts
            .as_ref()
            .map(|a| rows.iter().map(|&r| a[r]).collect::<Vec<f64>>());
        let window = EntityWindow::new(&millis, group_amounts);

        for (k, &row) in rows.iter().enumerate() {
            count_1h[row] = window.count(k, ONE_HOUR_MS) as f64;
            if let Some(sum) = window.sum(k, ONE_HOUR_MS) {
                sum_1h[row] = sum;
            }
            if k > 0 {
                since_last[row] = (millis[k] - millis[k - 1]) as f64 / 1000.0;
            }
            if let (Some(a), Some(sum)) = (amounts.as_ref(), window.sum(k, ONE_DAY_MS)) {
                let prior = window.count(k, ONE_DAY_MS);
                let mean_24h = if prior > 0 {
                    sum / prior as f64
                } else {
                    fallback_mean
                };
                deviation[row] = a[row] - mean_24h;
            }
        }

        group_start = group_end;
    }

    let mut augmented = table.clone();
    let mut generated = Vec::new();
    augmented.push_numeric(IS_NIGHT, is_night)?;
    generated.push(IS_NIGHT.to_string());
    augmented.push_numeric(TX_COUNT_1H, count_1h)?;
    generated.push(TX_COUNT_1H.to_string());
    if amounts.is_some() {
        augmented.push_numeric(AMOUNT_SUM_1H, sum_1h)?;
        generated.push(AMOUNT_SUM_1H.to_string());
    }
    augmented.push_numeric(TIME_SINCE_LAST_TX, since_last)?;
    generated.push(TIME_SINCE_LAST_TX.to_string());
    if amounts.is_some() {
        augmented.push_numeric(AMOUNT_DEV_24H, deviation)?;
        generated.push(AMOUNT_DEV_24H.to_string());
    }

    debug!(rows = n, features = ?generated, "temporal features generated");
    Ok((augmented, generated))
}

fn to_millis(stamp: &DateTime<Utc>) -> i64 {
    stamp.timestamp_millis()
}
