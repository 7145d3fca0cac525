//! Tabular value types.
//!
//! A [`Table`] owns its [`Row`]s. Rows carry their cells and the file they
//! came from, but no pointer back to the table: operations that need the
//! enclosing table (column sums) receive it as an explicit argument.
//!
//! ```text
//! Table { provenance: sources/acme/2024/Q1/march.xlsx#Sheet1 }
//! ├── Row ["Invoice", "Date", "Amount"]   source = march.xlsx
//! ├── Row ["1001", "3/1/2024", "12.50"]  source = march.xlsx
//! └── Row ["1002", "3/2/2024", "8.00"]   source = march.xlsx
//! ```
//!
//! Tables behave as values: every structural operation returns a new table.

pub mod index;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dsl::coerce::parse_float;
use crate::error::{EvalError, EvalResult, TableError, TableResult};

pub use index::{index_to_letters, letters_to_index, ColumnIndex};

/// Source tag of rows synthesized by the pipeline.
pub const DYNAMIC_SOURCE: &str = "<dynamic>";

// =============================================================================
// Row
// =============================================================================

/// An ordered sequence of string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    cells: Vec<String>,
    source: Arc<str>,
}

impl Row {
    pub fn new(cells: Vec<String>, source: Arc<str>) -> Self {
        Self { cells, source }
    }

    /// A row that does not originate from any file.
    pub fn dynamic(cells: Vec<String>) -> Self {
        Self::new(cells, Arc::from(DYNAMIC_SOURCE))
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<String> {
        self.cells
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(String::as_str)
    }

    /// Overwrite a cell, padding the row with empty cells if it is too short.
    pub fn set(&mut self, index: usize, value: String) {
        if self.cells.len() <= index {
            self.cells.resize(index + 1, String::new());
        }
        self.cells[index] = value;
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_handle(&self) -> Arc<str> {
        Arc::clone(&self.source)
    }

    /// Copy this row's provenance onto new cells.
    pub fn derive(&self, cells: Vec<String>) -> Row {
        Row::new(cells, self.source_handle())
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }
}

// =============================================================================
// Provenance
// =============================================================================

/// Where a table was extracted from.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub file: PathBuf,
    pub group: String,
    pub sheet: String,
}

impl Provenance {
    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

// =============================================================================
// Table
// =============================================================================

/// An ordered sequence of rows with optional provenance.
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: Vec<Row>,
    provenance: Option<Provenance>,
    sums: RefCell<HashMap<usize, f64>>,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows && self.provenance == other.provenance
    }
}

impl Table {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            provenance: None,
            sums: RefCell::new(HashMap::new()),
        }
    }

    /// Build a table of dynamic rows from raw cells.
    pub fn from_cells<I, R, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            rows.into_iter()
                .map(|r| Row::dynamic(r.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    /// A table with the same provenance and the given rows.
    pub fn with_rows(&self, rows: Vec<Row>) -> Table {
        Table {
            rows,
            provenance: self.provenance.clone(),
            sums: RefCell::new(HashMap::new()),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Rows `[start, end)`, clamped to the table.
    pub fn slice(&self, start: usize, end: usize) -> Table {
        let end = end.min(self.rows.len());
        let start = start.min(end);
        self.with_rows(self.rows[start..end].to_vec())
    }

    pub fn filter<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&Row) -> bool,
    {
        self.with_rows(self.rows.iter().filter(|r| keep(r)).cloned().collect())
    }

    /// Map every row; returning `None` drops it.
    pub fn update<F>(&self, mut map: F) -> Table
    where
        F: FnMut(&Row) -> Option<Row>,
    {
        self.with_rows(self.rows.iter().filter_map(|r| map(r)).collect())
    }

    /// Swap rows and columns. Every row must have the same width.
    pub fn transpose(&self) -> TableResult<Table> {
        let Some(first) = self.rows.first() else {
            return Ok(self.with_rows(Vec::new()));
        };

        let width = first.width();
        for (i, row) in self.rows.iter().enumerate() {
            if row.width() != width {
                return Err(TableError::Ragged { row: i, found: row.width(), expected: width });
            }
        }

        let rows = (0..width)
            .map(|c| Row::dynamic(self.rows.iter().map(|r| r.cells[c].clone()).collect()))
            .collect();

        Ok(self.with_rows(rows))
    }

    /// Group rows by a derived key, keeping first-seen key order.
    pub fn divide_by<F>(&self, mut key: F) -> Vec<(String, Vec<Row>)>
    where
        F: FnMut(&Row) -> String,
    {
        let mut order: Vec<(String, Vec<Row>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in &self.rows {
            let k = key(row);
            match positions.get(&k) {
                Some(&i) => order[i].1.push(row.clone()),
                None => {
                    positions.insert(k.clone(), order.len());
                    order.push((k, vec![row.clone()]));
                }
            }
        }

        order
    }

    /// Concatenate tables, preserving their order.
    pub fn stack<I>(tables: I) -> Table
    where
        I: IntoIterator<Item = Table>,
    {
        Table::new(tables.into_iter().flat_map(Table::into_rows).collect())
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
        self.sums.borrow_mut().clear();
    }

    pub fn prepend(&mut self, row: Row) {
        self.rows.insert(0, row);
        self.sums.borrow_mut().clear();
    }

    /// Overwrite one column in place. `values` must align with the rows.
    pub(crate) fn set_column(&mut self, column: usize, values: Vec<String>) {
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.set(column, value);
        }
        self.sums.borrow_mut().remove(&column);
    }

    /// Sum of a column, computed once per table and column.
    pub fn column_sum(&self, column: usize) -> EvalResult<f64> {
        if let Some(sum) = self.sums.borrow().get(&column) {
            return Ok(*sum);
        }

        let mut sum = 0.0;
        for row in &self.rows {
            let cell = row.get(column).unwrap_or("");
            let value = parse_float(cell).ok_or_else(|| EvalError::BadSum(cell.to_string()))?;
            sum += value;
        }

        self.sums.borrow_mut().insert(column, sum);
        Ok(sum)
    }

    /// Column sums computed so far.
    pub fn cached_sums(&self) -> usize {
        self.sums.borrow().len()
    }

    /// Label used in issues and logs.
    pub fn label(&self) -> String {
        match &self.provenance {
            Some(p) => format!("{}#{}", p.file.display(), p.sheet),
            None => DYNAMIC_SOURCE.to_string(),
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.provenance.as_ref().map(|p| p.file.as_path())
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(table: &Table) -> Vec<Vec<String>> {
        table.iter().map(|r| r.cells().to_vec()).collect()
    }

    #[test]
    fn test_slice_clamps() {
        let table = Table::from_cells([["a"], ["b"], ["c"]]);
        assert_eq!(cells(&table.slice(1, 10)), vec![vec!["b"], vec!["c"]]);
        assert!(table.slice(5, 2).is_empty());
    }

    #[test]
    fn test_transpose() {
        let table = Table::from_cells([["a", "b"], ["c", "d"], ["e", "f"]]);
        let t = table.transpose().unwrap();
        assert_eq!(cells(&t), vec![vec!["a", "c", "e"], vec!["b", "d", "f"]]);
    }

    #[test]
    fn test_transpose_ragged() {
        let table = Table::from_cells(vec![vec!["a", "b"], vec!["c"]]);
        assert!(matches!(table.transpose(), Err(TableError::Ragged { row: 1, .. })));
    }

    #[test]
    fn test_divide_by_keeps_first_seen_order() {
        let table = Table::from_cells([["x", "1"], ["y", "2"], ["x", "3"]]);
        let groups = table.divide_by(|r| r.get(0).unwrap_or("").to_string());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "x");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "y");
    }

    #[test]
    fn test_column_sum_is_memoized() {
        let table = Table::from_cells([["1.5"], ["2"], ["3"]]);
        assert_eq!(table.cached_sums(), 0);
        assert_eq!(table.column_sum(0).unwrap(), 6.5);
        assert_eq!(table.cached_sums(), 1);
        assert_eq!(table.column_sum(0).unwrap(), 6.5);
        assert_eq!(table.cached_sums(), 1);

        // A derived table starts with a fresh cache.
        let derived = table.slice(0, 2);
        assert_eq!(derived.cached_sums(), 0);
        assert_eq!(derived.column_sum(0).unwrap(), 3.5);
    }

    #[test]
    fn test_column_sum_rejects_text() {
        let table = Table::from_cells([["1"], ["total"]]);
        assert!(matches!(table.column_sum(0), Err(EvalError::BadSum(v)) if v == "total"));
    }

    #[test]
    fn test_row_set_extends() {
        let mut row = Row::dynamic(vec!["a".into()]);
        row.set(3, "d".into());
        assert_eq!(row.cells(), &["a", "", "", "d"]);
    }

    #[test]
    fn test_stack_preserves_order() {
        let a = Table::from_cells([["1"], ["2"]]);
        let b = Table::from_cells([["3"]]);
        let stacked = Table::stack([a, b]);
        assert_eq!(cells(&stacked), vec![vec!["1"], vec!["2"], vec!["3"]]);
    }
}
