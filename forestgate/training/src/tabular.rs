use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use thiserror::Error;

use crate::store::{ArtifactStore, StoreError};

/// Errors raised while reading or reshaping tables.
#[derive(Debug, Error)]
pub enum TableError {
    /// CSV parsing failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Persisting the table failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A row does not have one cell per column.
    #[error("row {row} has {found} cells, expected {expected}")]
    Ragged {
        /// Zero-based data row.
        row: usize,
        /// Header width.
        expected: usize,
        /// Actual width.
        found: usize,
    },
    /// A named column is absent.
    #[error("missing column `{0}`")]
    MissingColumn(String),
}

/// Parses a numeric cell. NaN and infinities count as non-numeric.
#[must_use]
pub fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Rectangular table of raw string cells with a header row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Builds a table, rejecting rows whose width differs from the header.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, TableError> {
        if let Some((row, cells)) = rows
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != columns.len())
        {
            return Err(TableError::Ragged {
                row,
                expected: columns.len(),
                found: cells.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Reads a headed CSV file.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;
        let columns: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
        let mut rows: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_owned).collect());
        }
        Self::new(columns, rows)
    }

    /// Writes the table as CSV through the atomic artifact writer.
    pub fn write_csv(&self, store: &ArtifactStore, path: impl AsRef<Path>) -> Result<(), TableError> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| TableError::Csv(err.into_error().into()))?;
        store.write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Header names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Data rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &str> + '_, TableError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_owned()))?;
        Ok(self.rows.iter().map(move |row| row[idx].as_str()))
    }

    /// New table holding the rows at `indices`, in that order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&idx| self.rows[idx].clone()).collect(),
        }
    }

    /// New table without the named columns. Unknown names are ignored.
    #[must_use]
    pub fn without_columns(&self, names: &[String]) -> Self {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&idx| !names.contains(&self.columns[idx]))
            .collect();
        Self {
            columns: keep.iter().map(|&idx| self.columns[idx].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&idx| row[idx].clone()).collect())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample() -> Table {
        Table::new(
            vec!["id".into(), "Age".into(), "Response".into()],
            vec![
                vec!["1".into(), "44".into(), "1".into()],
                vec!["2".into(), "76".into(), "0".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = Table::new(vec!["a".into()], vec![vec!["1".into(), "2".into()]]).unwrap_err();
        assert!(matches!(err, TableError::Ragged { row: 0, expected: 1, found: 2 }));
    }

    #[test]
    fn csv_survives_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("split/train.csv");
        let table = sample();
        table.write_csv(&ArtifactStore::new(), &path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("id,Age,Response"));
        assert_eq!(Table::read_csv(&path).unwrap(), table);
    }

    #[test]
    fn drops_and_selects() {
        let table = sample().without_columns(&["id".into(), "unknown".into()]);
        assert_eq!(table.columns(), ["Age".to_string(), "Response".to_string()]);
        let picked = table.select_rows(&[1]);
        assert_eq!(picked.column("Age").unwrap().collect::<Vec<_>>(), vec!["76"]);
        assert!(matches!(table.column("id"), Err(TableError::MissingColumn(_))));
    }

    #[test]
    fn only_finite_cells_parse() {
        assert_eq!(parse_finite(" 4.5 "), Some(4.5));
        assert_eq!(parse_finite("-1e3"), Some(-1000.0));
        for raw in ["NaN", "inf", "-infinity", "", "old"] {
            assert_eq!(parse_finite(raw), None, "{raw}");
        }
    }
}
