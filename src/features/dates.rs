use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use tracing::warn;

use crate::csv_reader::{Cell, Table};
use crate::error::Result;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Parses one cell as an instant. Naive stamps are taken as UTC,
/// bare integers as epoch seconds.
pub fn parse_timestamp(cell: &Cell) -> Option<DateTime<Utc>> {
    match cell {
        Cell::Number(x) if x.is_finite() && x.fract() == 0.0 => {
            DateTime::from_timestamp(*x as i64, 0)
        }
        Cell::Text(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in DATETIME_FORMATS {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc());
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
            s.parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
        }
        _ => None,
    }
}

/// All-or-nothing: a single unparseable (or empty) cell fails the column.
pub fn parse_column(cells: &[Cell]) -> Option<Vec<DateTime<Utc>>> {
    cells.iter().map(parse_timestamp).collect()
}

pub fn date_part_names(column: &str) -> Vec<String> {
    ["hour", "dayofweek", "month", "day"]
        .iter()
        .map(|part| format!("{}_{}", column, part))
        .collect()
}

/// Adds `{col}_hour`, `{col}_dayofweek` (Monday = 0), `{col}_month` and
/// `{col}_day`. Returns the generated names, empty when the column is
/// absent or does not parse.
pub fn add_date_parts(table: &mut Table, column: &str) -> Result<Vec<String>> {
    let Some(cells) = table.column(column) else {
        warn!(column, "date column not found, skipping date parts");
        return Ok(Vec::new());
    };
    let Some(stamps) = parse_column(cells) else {
        warn!(column, "date column could not be parsed, skipping date parts");
        return Ok(Vec::new());
    };

    let names = date_part_names(column);
    let parts: [Vec<f64>; 4] = [
        stamps.iter().map(|t| t.hour() as f64).collect(),
        stamps
            .iter()
            .map(|t| t.weekday().num_days_from_monday() as f64)
            .collect(),
        stamps.iter().map(|t| t.month() as f64).collect(),
        stamps.iter().map(|t| t.day() as f64).collect(),
    ];
    for (name, values) in names.iter().zip(parts) {
        table.push_numeric(name, values)?;
    }
    Ok(names)
}
