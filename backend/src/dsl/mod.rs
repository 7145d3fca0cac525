//! Declarative operation language.
//!
//! This module provides:
//! - `row`: per-cell operations, chained into properties, filters and setters
//! - `table`: whole-table operations, chained into preprocess/postprocess
//! - `coerce`: number, currency and date conversion shared by both
//!
//! ## Evaluation
//!
//! ```text
//!        ""  ──▶ column(B) ──▶ trim ──▶ reference(...) ──▶ coerce(usd) ──▶ Value("12.50")
//!                                          │
//!                                          ├─ miss, ignored ──▶ Drop(reason)
//!                                          └─ miss, unanswered ──▶ Pending(hash)
//! ```
//!
//! A chain starts from the empty string. `Drop` and `Pending` stop the chain;
//! fatal problems are [`EvalError`]s.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::EvalResult;
use crate::state::State;
use crate::table::{Row, Table};

pub mod coerce;
pub mod row;
pub mod table;

pub use row::{Coerce, MetaKind, RowOperation, SearchMatch};
pub use table::{Step, TableContext, TableOperation};

/// Result of evaluating a row operation or chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(String),
    /// The row is excluded, with the reason.
    Drop(String),
    /// Waiting on the question with this hash.
    Pending(String),
}

impl Outcome {
    pub fn value(&self) -> Option<&str> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Whether matching items are kept or removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Keep,
    Drop,
}

impl Action {
    pub fn keeps(self, matched: bool) -> bool {
        matched == (self == Action::Keep)
    }
}

/// What a row operation can see.
pub struct RowContext<'a> {
    pub context: &'a Context,
    pub state: &'a mut State,
    /// The table the row belongs to, for table-scoped aggregates.
    pub table: &'a Table,
    pub row: &'a Row,
}

/// Evaluate a chain from the empty string.
pub fn run_chain(chain: &[RowOperation], cx: &mut RowContext<'_>) -> EvalResult<Outcome> {
    let mut value = String::new();
    for operation in chain {
        match operation.apply(value, cx)? {
            Outcome::Value(next) => value = next,
            stop => return Ok(stop),
        }
    }
    Ok(Outcome::Value(value))
}

/// Reference card of every operation.
pub fn operations_description() -> String {
    r#"Row operations (properties, filter criteria, set values):

| Operation | Description | Parameters |
|-----------|-------------|------------|
| column | Cell of the current row | index: number or letters ("A", "AB") |
| literal | Constant value | value |
| counter | Run-wide sequence, starts at 0 | - |
| meta | Context value | value: quarter.lastday, quarter.number, row.source |
| trim | Strip surrounding whitespace | - |
| character | Keep or drop listed characters | select, action: keep/drop |
| replace | Replace characters, a regex match, or the whole value | characters, substring, all, put, put_meta |
| coerce | Convert the value | as: number (otherwise), usd (round: up/down/default), date (parse, year: keep/assume, format) |
| abs, sign | Absolute value, sign | - |
| add, subtract, multiply, divide | Combine with a sub-chain | with: [operations] |
| equals | "true" if equal to a sub-chain | with: [operations] |
| concat | Append a sub-chain | with: [operations], separator |
| sum | Sum of a column over the table | column |
| reference | Look up a reference table, ask when unknown | table, match, take, group |
| utility | Look up a utility table, fail when unknown | table, match, take, group |
| search | Multi-field reference lookup | table, matches: {field: {definition, optional, primary}}, take |

Table operations (preprocess, postprocess):

| Operation | Description | Parameters |
|-----------|-------------|------------|
| trim | Remove rows from the top and bottom | top, bottom |
| chop | Cut at the first row whose column is in a list | column, is, keep: top/bottom, otherwise: drop/take |
| select | Keep or drop rows by column value | column, is, isnt, action |
| header | Keep or drop columns by header name | names, action |
| coalesce | Merge rows sharing key columns | match, combine |
| percolate | Fill values down from the previous row | columns, matches |
| filter | Keep rows whose criteria evaluate to "true" | criteria: [operations] |
| set | Overwrite a column | column, to: [operations] |
| debug | Write the table to a debug file | name |

Example property:
[
  {"type": "column", "index": "C"},
  {"type": "trim"},
  {"type": "reference", "table": "customers", "match": "customerName", "take": "fuseId", "group": "acme"}
]"#
    .to_string()
}
