//! Result row representation.
//!
//! Rows carry one nullable byte cell per column, exactly as decoded from the
//! wire; typed accessors convert on demand. Column metadata is shared across
//! all rows of a result set via `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result, UsageErrorKind};

/// Column names shared by every row in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create column info from an ordered list of names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Name of the column at `index`.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// All column names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One row of a result set: an array of nullable byte cells.
#[derive(Debug, Clone)]
pub struct Row {
    cells: Vec<Option<Vec<u8>>>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a row with shared column metadata.
    pub fn new(columns: Arc<ColumnInfo>, cells: Vec<Option<Vec<u8>>>) -> Self {
        Self { cells, columns }
    }

    /// The shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Number of columns in this row.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True for a zero-column row.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The raw cells of this row.
    pub fn cells(&self) -> &[Option<Vec<u8>>] {
        &self.cells
    }

    /// Consume the row, yielding its raw cells.
    pub fn into_cells(self) -> Vec<Option<Vec<u8>>> {
        self.cells
    }

    /// Raw bytes of the cell at `index`; `None` for SQL NULL.
    pub fn get_bytes(&self, index: usize) -> Result<Option<&[u8]>> {
        self.cells
            .get(index)
            .map(|cell| cell.as_deref())
            .ok_or_else(|| column_range_error(index, self.cells.len()))
    }

    /// Raw bytes of a cell looked up by column name.
    pub fn get_bytes_by_name(&self, name: &str) -> Result<Option<&[u8]>> {
        let index = self
            .columns
            .index_of(name)
            .ok_or_else(|| unknown_column_error(name))?;
        self.get_bytes(index)
    }

    /// Cell as UTF-8 text; `None` for SQL NULL.
    pub fn get_str(&self, index: usize) -> Result<Option<&str>> {
        match self.get_bytes(index)? {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(bytes).map(Some).map_err(|_| {
                Error::usage(
                    UsageErrorKind::TypeConversion,
                    format!("column {index} does not hold valid UTF-8 text"),
                )
            }),
        }
    }

    /// Cell parsed as a signed integer; `None` for SQL NULL.
    pub fn get_i64(&self, index: usize) -> Result<Option<i64>> {
        self.parse_cell(index, "an integer")
    }

    /// Cell parsed as a double; `None` for SQL NULL.
    pub fn get_f64(&self, index: usize) -> Result<Option<f64>> {
        self.parse_cell(index, "a number")
    }

    /// True when the cell at `index` is SQL NULL.
    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.get_bytes(index)?.is_none())
    }

    fn parse_cell<T: std::str::FromStr>(&self, index: usize, wanted: &str) -> Result<Option<T>> {
        match self.get_str(index)? {
            None => Ok(None),
            Some(text) => text.trim().parse::<T>().map(Some).map_err(|_| {
                Error::usage(
                    UsageErrorKind::TypeConversion,
                    format!("column {index} value {text:?} is not {wanted}"),
                )
            }),
        }
    }
}

fn column_range_error(index: usize, len: usize) -> Error {
    Error::usage(
        UsageErrorKind::TypeConversion,
        format!("column index {index} out of range (row has {len} columns)"),
    )
}

fn unknown_column_error(name: &str) -> Error {
    Error::usage(
        UsageErrorKind::TypeConversion,
        format!("no column named {name:?}"),
    )
}
