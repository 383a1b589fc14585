use std::collections::BTreeSet;
use std::path::Path;

use crate::artifact::ArtifactValues;
use crate::error::ArtifactError;
use crate::model::ScalarValue;

/// Header of the row-identifying column.
pub const ID_COLUMN: &str = "file";

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub id: String,
    pub values: ArtifactValues,
}

/// One row per work item, one column per metric seen in any row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CombinedTable {
    columns: Vec<String>,
    rows: Vec<TableRow>,
}

impl CombinedTable {
    /// Rows are sorted by id and columns by name, so equal inputs give equal tables.
    pub fn from_rows(mut rows: Vec<TableRow>) -> Self {
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        let columns: BTreeSet<&String> = rows.iter().flat_map(|r| r.values.keys()).collect();
        CombinedTable {
            columns: columns.into_iter().cloned().collect(),
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `None` when the row is unknown or holds no value for `column`.
    pub fn cell(&self, id: &str, column: &str) -> Option<&ScalarValue> {
        self.rows
            .iter()
            .find(|r| r.id == id)?
            .values
            .get(column)?
            .as_ref()
    }

    /// Wide CSV: id column first, then metrics; nulls are empty cells.
    pub fn write_csv(&self, path: &Path) -> Result<(), ArtifactError> {
        let csv_err = |source| ArtifactError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;

        let header = std::iter::once(ID_COLUMN).chain(self.columns.iter().map(String::as_str));
        writer.write_record(header).map_err(csv_err)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(row.id.clone());
            for column in &self.columns {
                let cell = match row.values.get(column) {
                    Some(Some(v)) => v.to_string(),
                    _ => String::new(),
                };
                record.push(cell);
            }
            writer.write_record(&record).map_err(csv_err)?;
        }

        writer.flush().map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Tests ──
