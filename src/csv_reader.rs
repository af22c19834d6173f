use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoringError};

/// One value of an uploaded table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Missing => true,
            Cell::Number(x) => x.is_nan(),
            Cell::Text(s) => {
                let s = s.trim();
                s.is_empty() || s.eq_ignore_ascii_case("nan")
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        if self.is_missing() {
            return None;
        }
        match self {
            Cell::Number(x) => Some(*x),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
            Cell::Missing => None,
        }
    }

    // Key used for one-hot vocabularies. Anything that reads as a number,
    // JSON number or numeric text alike, uses its shortest display form.
    pub fn category(&self) -> Option<String> {
        if self.is_missing() {
            return None;
        }
        match self.as_f64() {
            Some(x) => Some(x.to_string()),
            None => match self {
                Cell::Text(s) => Some(s.trim().to_string()),
                _ => None,
            },
        }
    }

    fn from_field(field: &str) -> Self {
        if field.trim().is_empty() {
            Cell::Missing
        } else {
            Cell::Text(field.to_string())
        }
    }
}

/// Column-major table with ordered, equally long columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Vec<Cell>>,
    n_rows: usize,
}

impl Table {
    pub fn new(n_rows: usize) -> Self {
        Self {
            names: Vec::new(),
            columns: Vec::new(),
            n_rows,
        }
    }

    // Builds a one-row table from a flat key/value record
    pub fn from_record(fields: &BTreeMap<String, Cell>) -> Self {
        let mut table = Table::new(1);
        for (name, cell) in fields {
            table.names.push(name.clone());
            table.columns.push(vec![cell.clone()]);
        }
        table
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Adds a column, replacing any existing column with the same name.
    pub fn push_column(&mut self, name: &str, cells: Vec<Cell>) -> Result<()> {
        if cells.len() != self.n_rows {
            return Err(ScoringError::InvalidInput(format!(
                "column '{}' has {} rows, table has {}",
                name,
                cells.len(),
                self.n_rows
            )));
        }
        match self.names.iter().position(|n| n == name) {
            Some(i) => self.columns[i] = cells,
            None => {
                self.names.push(name.to_string());
                self.columns.push(cells);
            }
        }
        Ok(())
    }

    pub fn push_numeric(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        self.push_column(name, values.into_iter().map(Cell::Number).collect())
    }
}

pub fn from_reader<R: Read>(reader: R) -> Result<Table> {
    let mut rdr = csv::Reader::from_reader(reader);
    let names: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];
    let mut n_rows = 0;
    for record in rdr.records() {
        let record = record?;
        for (column, field) in columns.iter_mut().zip(record.iter()) {
            column.push(Cell::from_field(field));
        }
        n_rows += 1;
    }

    Ok(Table {
        names,
        columns,
        n_rows,
    })
}

pub fn read_csv(file_path: &Path) -> Result<Table> {
    let file = File::open(file_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ScoringError::FileNotFound(file_path.display().to_string())
        }
        _ => ScoringError::Io(e),
    })?;
    from_reader(file)
}

// Header names of an uploaded file, used to drive the training form
pub fn read_columns(file_path: &Path) -> Result<Vec<String>> {
    let file = File::open(file_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ScoringError::FileNotFound(file_path.display().to_string())
        }
        _ => ScoringError::Io(e),
    })?;
    let mut rdr = csv::Reader::from_reader(file);
    Ok(rdr.headers()?.iter().map(|h| h.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "card_id,ts,amt,merchant\n\
                          c1,2024-01-01 10:00:00,12.5,shop\n\
                          c2,2024-01-01 11:00:00,,cafe\n";

    #[test]
    fn test_reads_columns_in_header_order() {
        let table = from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.column_names(), &["card_id", "ts", "amt", "merchant"]);
        assert_eq!(table.column("amt").unwrap()[0].as_f64(), Some(12.5));
        assert!(table.column("amt").unwrap()[1].is_missing());
    }

    #[test]
    fn test_ragged_rows_are_an_error() {
        let result = from_reader("a,b\n1,2\n3\n".as_bytes());
        assert!(matches!(result, Err(ScoringError::Csv(_))));
    }

    #[test]
    fn test_category_keys() {
        assert_eq!(Cell::Number(3.0).category().as_deref(), Some("3"));
        assert_eq!(Cell::Text("3.50".into()).category(), Cell::Number(3.5).category());
        assert_eq!(Cell::Text(" 7 ".into()).category().as_deref(), Some("7"));
        assert_eq!(Cell::Text(" web ".into()).category().as_deref(), Some("web"));
        assert_eq!(Cell::Text("NaN".into()).category(), None);
        assert_eq!(Cell::Missing.category(), None);
    }

    #[test]
    fn test_push_column_replaces_and_checks_length() {
        let mut table = from_reader(SAMPLE.as_bytes()).unwrap();
        table.push_numeric("amt", vec![1.0, 2.0]).unwrap();
        assert_eq!(table.column_names().len(), 4);
        assert_eq!(table.column("amt").unwrap()[1], Cell::Number(2.0));
        assert!(table.push_numeric("x", vec![1.0]).is_err());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = read_csv(Path::new("/nonexistent/upload.csv"));
        assert!(matches!(result, Err(ScoringError::FileNotFound(_))));
    }
}
