//! Table operations.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::coerce::{format_number, parse_number};
use super::row::one_or_many;
use super::{run_chain, Action, Outcome, RowContext, RowOperation};
use crate::context::Context;
use crate::error::{EvalError, EvalResult};
use crate::parser::write_matrix;
use crate::state::State;
use crate::stats::Issue;
use crate::table::{ColumnIndex, Row, Table};

/// A whole-table step of a preprocess or postprocess chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableOperation {
    /// Cut the table at the first row whose column is listed in `is`.
    Chop {
        column: ColumnIndex,
        is: Vec<String>,
        #[serde(default)]
        keep: Keep,
        #[serde(default)]
        otherwise: Otherwise,
    },

    /// Merge rows sharing the `match` columns, summing `combine` columns.
    Coalesce {
        #[serde(rename = "match")]
        match_columns: Vec<ColumnIndex>,
        #[serde(default)]
        combine: Vec<ColumnIndex>,
    },

    /// Write the table to a debug file.
    Debug {
        #[serde(default = "default_debug_name")]
        name: String,
    },

    /// Keep rows whose criteria evaluate to `"true"`.
    Filter {
        criteria: Vec<RowOperation>,
    },

    /// Keep or drop columns named in the first row.
    Header {
        names: Vec<String>,
        action: Action,
    },

    /// Fill matching cells down from the previous row.
    Percolate {
        columns: Vec<ColumnIndex>,
        #[serde(default = "default_percolate_matches")]
        matches: Vec<String>,
    },

    /// Keep or drop rows by the value of a column.
    Select {
        column: ColumnIndex,
        #[serde(default, deserialize_with = "one_or_many")]
        is: Vec<String>,
        #[serde(default)]
        isnt: Vec<String>,
        #[serde(default)]
        action: Action,
    },

    /// Overwrite a column.
    Set {
        column: ColumnIndex,
        to: Vec<RowOperation>,
    },

    /// Remove rows from the top and bottom.
    Trim {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bottom: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keep {
    Top,
    #[default]
    Bottom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Otherwise {
    #[default]
    Drop,
    Take,
}

fn default_debug_name() -> String {
    "default".to_string()
}

fn default_percolate_matches() -> Vec<String> {
    vec![String::new()]
}

/// Result of a table step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Done(Table),
    /// Some rows are waiting on these questions.
    Pending(Vec<String>),
}

/// What a table operation can see.
pub struct TableContext<'a> {
    pub context: &'a Context,
    pub state: &'a mut State,
    /// Name of the running transformer, for issues.
    pub transformer: &'a str,
    pub issues: &'a mut Vec<Issue>,
}

impl TableContext<'_> {
    fn ignore(&mut self, row: &Row, reason: String) {
        self.issues.push(Issue::IgnoredRow {
            transformer: self.transformer.to_string(),
            source: row.source().to_string(),
            row: row.cells().to_vec(),
            reason,
        });
    }
}

/// Apply a chain of table operations in order.
pub fn run_table_chain(chain: &[TableOperation], table: Table, cx: &mut TableContext<'_>) -> EvalResult<Step> {
    let mut current = table;
    for operation in chain {
        match operation.apply(current, cx)? {
            Step::Done(next) => current = next,
            pending => return Ok(pending),
        }
    }
    Ok(Step::Done(current))
}

fn cell(row: &Row, column: ColumnIndex) -> &str {
    row.get(column.get()).unwrap_or("")
}

// =============================================================================
// Evaluation
// =============================================================================

impl TableOperation {
    pub fn apply(&self, table: Table, cx: &mut TableContext<'_>) -> EvalResult<Step> {
        match self {
            TableOperation::Chop { column, is, keep, otherwise } => {
                Ok(Step::Done(self.apply_chop(table, *column, is, *keep, *otherwise)))
            }
            TableOperation::Coalesce { match_columns, combine } => {
                self.apply_coalesce(table, match_columns, combine).map(Step::Done)
            }
            TableOperation::Debug { name } => self.apply_debug(table, name, cx).map(Step::Done),
            TableOperation::Filter { criteria } => self.apply_filter(table, criteria, cx),
            TableOperation::Header { names, action } => Ok(Step::Done(self.apply_header(table, names, *action))),
            TableOperation::Percolate { columns, matches } => {
                Ok(Step::Done(self.apply_percolate(table, columns, matches)))
            }
            TableOperation::Select { column, is, isnt, action } => {
                let matched = |row: &Row| {
                    let value = cell(row, *column);
                    is.iter().any(|v| v == value) || (!isnt.is_empty() && !isnt.iter().any(|v| v == value))
                };
                Ok(Step::Done(table.filter(|row| action.keeps(matched(row)))))
            }
            TableOperation::Set { column, to } => self.apply_set(table, *column, to, cx),
            TableOperation::Trim { top, bottom } => {
                let start = top.unwrap_or(0);
                let end = table.len().saturating_sub(bottom.unwrap_or(0));
                Ok(Step::Done(table.slice(start, end)))
            }
        }
    }

    fn apply_chop(&self, table: Table, column: ColumnIndex, is: &[String], keep: Keep, otherwise: Otherwise) -> Table {
        let found = table
            .iter()
            .position(|row| row.get(column.get()).is_some_and(|v| is.iter().any(|i| i == v.trim())));

        match (found, keep) {
            (None, _) if otherwise == Otherwise::Take => table,
            (None, _) => table.with_rows(Vec::new()),
            (Some(index), Keep::Top) => table.slice(0, index),
            (Some(index), Keep::Bottom) => table.slice(index, table.len()),
        }
    }

    fn apply_coalesce(&self, table: Table, match_columns: &[ColumnIndex], combine: &[ColumnIndex]) -> EvalResult<Table> {
        let groups = table.divide_by(|row| {
            let key: Vec<Option<&str>> = match_columns.iter().map(|c| row.get(c.get())).collect();
            serde_json::to_string(&key).unwrap_or_default()
        });

        let mut rows = Vec::with_capacity(groups.len());
        for (_, group) in groups {
            // Non-combined columns come from the last row of the group.
            let Some(last) = group.last() else { continue };
            let mut merged = last.clone();
            for column in combine {
                let mut sum = 0.0;
                for row in &group {
                    let value = cell(row, *column);
                    sum += parse_number(value).ok_or_else(|| EvalError::NotANumber {
                        operation: "coalesce",
                        value: value.to_string(),
                    })?;
                }
                merged.set(column.get(), format_number(sum));
            }
            rows.push(merged);
        }

        Ok(table.with_rows(rows))
    }

    fn apply_debug(&self, table: Table, name: &str, cx: &mut TableContext<'_>) -> EvalResult<Table> {
        let text = write_matrix(table.iter().map(|r| r.cells().to_vec()))
            .map_err(|e| EvalError::Debug(e.to_string()))?;
        if !cx.state.first_dump(cx.transformer, name, &text) {
            return Ok(table);
        }

        let path = cx.context.layout.debug(name, &cx.context.time);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EvalError::Debug(e.to_string()))?;
        }
        std::fs::write(&path, text).map_err(|e| EvalError::Debug(e.to_string()))?;
        debug!(path = %path.display(), rows = table.len(), "debug table written");
        Ok(table)
    }

    fn apply_filter(&self, table: Table, criteria: &[RowOperation], cx: &mut TableContext<'_>) -> EvalResult<Step> {
        let mut kept = Vec::new();
        let mut pending = Vec::new();

        for row in table.iter() {
            let mut row_cx = RowContext { context: cx.context, state: &mut *cx.state, table: &table, row };
            match run_chain(criteria, &mut row_cx)? {
                Outcome::Value(v) if v == "true" => kept.push(row.clone()),
                Outcome::Value(_) => {}
                Outcome::Drop(reason) => cx.ignore(row, reason),
                Outcome::Pending(hash) => pending.push(hash),
            }
        }

        if !pending.is_empty() {
            return Ok(Step::Pending(pending));
        }
        Ok(Step::Done(table.with_rows(kept)))
    }

    fn apply_header(&self, table: Table, names: &[String], action: Action) -> Table {
        let Some(header) = table.get(0) else { return table };

        match action {
            Action::Keep => {
                let indices: Vec<usize> = names
                    .iter()
                    .filter_map(|name| header.cells().iter().position(|c| c == name))
                    .collect();
                table.update(|row| {
                    Some(row.derive(indices.iter().map(|&i| row.get(i).unwrap_or("").to_string()).collect()))
                })
            }
            Action::Drop => {
                let removed: HashSet<usize> = header
                    .cells()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| names.contains(c))
                    .map(|(i, _)| i)
                    .collect();
                table.update(|row| {
                    Some(row.derive(
                        row.cells()
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| !removed.contains(i))
                            .map(|(_, c)| c.clone())
                            .collect(),
                    ))
                })
            }
        }
    }

    fn apply_percolate(&self, table: Table, columns: &[ColumnIndex], matches: &[String]) -> Table {
        let mut previous: Option<Row> = None;
        table.update(|row| {
            let mut updated = row.clone();
            if let Some(prev) = &previous {
                for column in columns {
                    let index = column.get();
                    let fill = row.get(index).is_some_and(|v| matches.iter().any(|m| m == v));
                    if let (true, Some(above)) = (fill, prev.get(index)) {
                        updated.set(index, above.to_string());
                    }
                }
            }
            previous = Some(updated.clone());
            Some(updated)
        })
    }

    fn apply_set(
        &self,
        mut table: Table,
        column: ColumnIndex,
        to: &[RowOperation],
        cx: &mut TableContext<'_>,
    ) -> EvalResult<Step> {
        let mut values: Vec<Option<String>> = Vec::with_capacity(table.len());
        let mut pending = Vec::new();

        for row in table.iter() {
            let mut row_cx = RowContext { context: cx.context, state: &mut *cx.state, table: &table, row };
            match run_chain(to, &mut row_cx)? {
                Outcome::Value(v) => values.push(Some(v)),
                Outcome::Drop(reason) => {
                    cx.ignore(row, reason);
                    values.push(None);
                }
                Outcome::Pending(hash) => {
                    pending.push(hash);
                    values.push(None);
                }
            }
        }

        if !pending.is_empty() {
            return Ok(Step::Pending(pending));
        }

        if values.iter().all(Option::is_some) {
            table.set_column(column.get(), values.into_iter().flatten().collect());
            return Ok(Step::Done(table));
        }

        let rows = table
            .iter()
            .zip(values)
            .filter_map(|(row, value)| {
                value.map(|v| {
                    let mut updated = row.clone();
                    updated.set(column.get(), v);
                    updated
                })
            })
            .collect();
        Ok(Step::Done(table.with_rows(rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;
    use crate::context::{Filter, Time};
    use tempfile::tempdir;

    fn context(root: &std::path::Path) -> Context {
        Context::new(Time { year: 2024, quarter: 1 }, Filter::default(), Layout::new(root))
    }

    fn run(json: &str, table: Table) -> (Step, Vec<Issue>) {
        let dir = tempdir().unwrap();
        let context = context(dir.path());
        let mut state = State::new();
        let mut issues = Vec::new();
        let chain: Vec<TableOperation> = serde_json::from_str(json).unwrap();
        let mut cx = TableContext { context: &context, state: &mut state, transformer: "test", issues: &mut issues };
        let step = run_table_chain(&chain, table, &mut cx).unwrap();
        (step, issues)
    }

    fn cells(step: Step) -> Vec<Vec<String>> {
        match step {
            Step::Done(table) => table.iter().map(|r| r.cells().to_vec()).collect(),
            Step::Pending(h) => panic!("unexpected pending {:?}", h),
        }
    }

    #[test]
    fn test_trim_top_and_bottom() {
        let table = Table::from_cells([["h"], ["1"], ["2"], ["total"]]);
        let (step, _) = run(r#"[{"type":"trim","top":1,"bottom":1}]"#, table);
        assert_eq!(cells(step), vec![vec!["1"], vec!["2"]]);

        let (step, _) = run(r#"[{"type":"trim","bottom":10}]"#, Table::from_cells([["1"]]));
        assert!(cells(step).is_empty());
    }

    #[test]
    fn test_chop() {
        let table = Table::from_cells([["A"], ["B"], ["STOP"], ["C"]]);
        let top = r#"[{"type":"chop","column":0,"is":["STOP"],"keep":"top","otherwise":"drop"}]"#;
        assert_eq!(cells(run(top, table.clone()).0), vec![vec!["A"], vec!["B"]]);

        let bottom = r#"[{"type":"chop","column":0,"is":["STOP"]}]"#;
        assert_eq!(cells(run(bottom, table).0), vec![vec!["STOP"], vec!["C"]]);

        let none = Table::from_cells([["A"], ["B"]]);
        assert!(cells(run(top, none.clone()).0).is_empty());
        let take = r#"[{"type":"chop","column":0,"is":["STOP"],"otherwise":"take"}]"#;
        assert_eq!(cells(run(take, none).0).len(), 2);
    }

    #[test]
    fn test_select_is_and_isnt() {
        let table = Table::from_cells([["a", "1"], ["b", "0.00"], ["c", "2"]]);
        let drop = r#"[{"type":"select","column":"B","is":"0.00","action":"drop"}]"#;
        assert_eq!(cells(run(drop, table.clone()).0).len(), 2);

        let keep = r#"[{"type":"select","column":0,"is":["a","c"]}]"#;
        assert_eq!(cells(run(keep, table.clone()).0), vec![vec!["a", "1"], vec!["c", "2"]]);

        let isnt = r#"[{"type":"select","column":0,"isnt":["a"]}]"#;
        assert_eq!(cells(run(isnt, table).0).len(), 2);
    }

    #[test]
    fn test_header_keep_and_drop() {
        let table = Table::from_cells([["id", "name", "amount"], ["1", "x", "5"]]);
        let keep = r#"[{"type":"header","names":["amount","id","missing"],"action":"keep"}]"#;
        assert_eq!(cells(run(keep, table.clone()).0), vec![vec!["amount", "id"], vec!["5", "1"]]);

        let drop = r#"[{"type":"header","names":["name"],"action":"drop"}]"#;
        assert_eq!(cells(run(drop, table).0), vec![vec!["id", "amount"], vec!["1", "5"]]);
    }

    #[test]
    fn test_coalesce_sums_and_keeps_last_row() {
        let table = Table::from_cells([
            ["INV1", "first", "1.5"],
            ["INV2", "only", "4"],
            ["INV1", "second", "2"],
        ]);
        let json = r#"[{"type":"coalesce","match":[0],"combine":["C"]}]"#;
        // The non-combined column takes the last row of each group. This
        // mirrors historical output rather than a business rule.
        assert_eq!(
            cells(run(json, table).0),
            vec![vec!["INV1", "second", "3.5"], vec!["INV2", "only", "4"]]
        );
    }

    #[test]
    fn test_percolate() {
        let table = Table::from_cells([["1"], [""], [""], ["2"]]);
        let (step, _) = run(r#"[{"type":"percolate","columns":[0]}]"#, table);
        assert_eq!(cells(step), vec![vec!["1"], vec!["1"], vec!["1"], vec!["2"]]);
    }

    #[test]
    fn test_filter_and_set() {
        let table = Table::from_cells([["Y", "1"], ["N", "2"], ["Y", "3"]]);
        let filter = r#"[{"type":"filter","criteria":[
            {"type":"column","index":0},{"type":"equals","with":[{"type":"literal","value":"Y"}]}
        ]}]"#;
        assert_eq!(cells(run(filter, table.clone()).0), vec![vec!["Y", "1"], vec!["Y", "3"]]);

        let set = r#"[{"type":"set","column":3,"to":[{"type":"sum","column":1}]}]"#;
        let out = cells(run(set, table).0);
        assert_eq!(out[0], vec!["Y", "1", "", "6"]);
        assert_eq!(out[2][3], "6");
    }

    #[test]
    fn test_set_pending_on_unknown_reference() {
        let table = Table::from_cells([["Bob"], ["Bob"], ["Al"]]);
        let json = r#"[{"type":"set","column":1,"to":[
            {"type":"column","index":0},
            {"type":"reference","table":"customers","match":"customerName","take":"fuseId","group":"acme"}
        ]}]"#;
        match run(json, table).0 {
            Step::Pending(hashes) => assert_eq!(hashes.len(), 3),
            other => panic!("expected pending, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_writes_file() {
        let dir = tempdir().unwrap();
        let context = context(dir.path());
        let mut state = State::new();
        let mut issues = Vec::new();
        let mut cx = TableContext { context: &context, state: &mut state, transformer: "t", issues: &mut issues };
        let op = TableOperation::Debug { name: "peek".into() };

        let table = Table::from_cells([["a", "b"]]);
        assert_eq!(op.apply(table.clone(), &mut cx).unwrap(), Step::Done(table));

        let written = crate::store::gather(&dir.path().join("utility/2024/Q1/debug/peek"), &["csv"]);
        assert_eq!(written.len(), 1);
        assert_eq!(std::fs::read_to_string(&written[0]).unwrap(), "a,b\n");
    }

    #[test]
    fn test_debug_skips_repeated_dump() {
        let dir = tempdir().unwrap();
        let context = context(dir.path());
        let mut state = State::new();
        let mut issues = Vec::new();
        let mut cx = TableContext { context: &context, state: &mut state, transformer: "t", issues: &mut issues };
        let op = TableOperation::Debug { name: "peek".into() };

        op.apply(Table::from_cells([["a", "b"]]), &mut cx).unwrap();
        op.apply(Table::from_cells([["a", "b"]]), &mut cx).unwrap();
        op.apply(Table::from_cells([["c", "d"]]), &mut cx).unwrap();

        let written = crate::store::gather(&dir.path().join("utility/2024/Q1/debug/peek"), &["csv"]);
        assert_eq!(written.len(), 2);
    }
}
