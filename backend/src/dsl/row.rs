//! Row operations.

use regex::{NoExpand, Regex};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::coerce::{
    coerce_date, coerce_number, coerce_usd, format_number, parse_float, parse_number, Rounding,
    YearPolicy,
};
use super::{run_chain, Action, Outcome, RowContext};
use crate::error::{EvalError, EvalResult};
use crate::resolve::{format_suggestion, Question, Record, Resolution};
use crate::state::COUNTER;
use crate::table::ColumnIndex;

/// A single step of a row chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowOperation {
    /// Absolute value.
    Abs,

    Add {
        with: Vec<RowOperation>,
    },

    /// Keep or drop the characters listed in `select`.
    Character {
        select: String,
        #[serde(default)]
        action: Action,
    },

    Coerce(Coerce),

    /// Cell of the current row.
    Column {
        index: ColumnIndex,
    },

    Concat {
        with: Vec<RowOperation>,
        #[serde(default)]
        separator: String,
    },

    /// Run-wide sequence number.
    Counter,

    Divide {
        with: Vec<RowOperation>,
    },

    /// `"true"` when the value equals the sub-chain.
    Equals {
        with: Vec<RowOperation>,
    },

    Literal {
        #[serde(deserialize_with = "string_or_number")]
        value: String,
    },

    Meta {
        value: MetaKind,
    },

    Multiply {
        with: Vec<RowOperation>,
    },

    /// Look the value up in a reference table; ask when it is unknown.
    Reference {
        table: String,
        #[serde(rename = "match")]
        match_field: String,
        take: String,
        group: String,
    },

    /// Applied in order: listed characters, regex substring, whole value.
    Replace {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        characters: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        substring: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        all: Option<String>,
        #[serde(default)]
        put: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        put_meta: Option<MetaKind>,
    },

    /// Look up a record agreeing with several computed fields.
    Search {
        table: String,
        #[serde(default)]
        matches: BTreeMap<String, SearchMatch>,
        take: String,
    },

    /// -1, 0 or 1.
    Sign,

    Subtract {
        with: Vec<RowOperation>,
    },

    /// Sum of a column over the enclosing table.
    Sum {
        column: ColumnIndex,
    },

    Trim,

    /// Look the value up in a utility table; a miss is fatal.
    Utility {
        table: String,
        #[serde(rename = "match")]
        match_field: String,
        take: String,
        group: String,
    },
}

/// Conversion selected by `as`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "as", rename_all = "snake_case")]
pub enum Coerce {
    Date {
        #[serde(default)]
        year: YearPolicy,
        #[serde(default, deserialize_with = "one_or_many")]
        parse: Vec<String>,
        #[serde(default = "default_date_format")]
        format: String,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<String>,
    },
    Usd {
        #[serde(default)]
        round: Rounding,
    },
}

fn default_date_format() -> String {
    "M/D/YYYY".to_string()
}

/// Values drawn from the run context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaKind {
    #[serde(rename = "quarter.lastday")]
    QuarterLastDay,
    #[serde(rename = "quarter.number")]
    QuarterNumber,
    #[serde(rename = "row.source")]
    RowSource,
}

/// One field of a `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Answers to questions may leave this field as a wildcard.
    #[serde(default)]
    pub optional: bool,
    /// Suggestions are drawn from this field.
    #[serde(default)]
    pub primary: bool,
    pub definition: Vec<RowOperation>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
        Bool(bool),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => format_number(n),
        Raw::Bool(b) => b.to_string(),
    })
}

pub(crate) fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(s) => vec![s],
        Raw::Many(v) => v,
    })
}

impl MetaKind {
    pub fn resolve(self, cx: &RowContext<'_>) -> String {
        match self {
            MetaKind::QuarterLastDay => cx.context.time.last_day().format("%m/%d/%Y").to_string(),
            MetaKind::QuarterNumber => cx.context.time.quarter.to_string(),
            MetaKind::RowSource => Path::new(cx.row.source())
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| cx.row.source().to_string()),
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

impl RowOperation {
    /// Apply this operation to the accumulated value.
    pub fn apply(&self, value: String, cx: &mut RowContext<'_>) -> EvalResult<Outcome> {
        match self {
            RowOperation::Abs => self.apply_abs(&value),
            RowOperation::Add { with } => self.apply_arithmetic(&value, with, cx, "add", |a, b| a + b),
            RowOperation::Character { select, action } => Ok(self.apply_character(&value, select, *action)),
            RowOperation::Coerce(coerce) => coerce.apply(&value, cx),
            RowOperation::Column { index } => self.apply_column(*index, cx),
            RowOperation::Concat { with, separator } => self.apply_concat(value, with, separator, cx),
            RowOperation::Counter => Ok(Outcome::Value(
                cx.state.counter.get_then_increment(COUNTER).to_string(),
            )),
            RowOperation::Divide { with } => self.apply_arithmetic(&value, with, cx, "divide", |a, b| a / b),
            RowOperation::Equals { with } => self.apply_equals(&value, with, cx),
            RowOperation::Literal { value } => Ok(Outcome::Value(value.clone())),
            RowOperation::Meta { value } => Ok(Outcome::Value(value.resolve(cx))),
            RowOperation::Multiply { with } => {
                self.apply_arithmetic(&value, with, cx, "multiply", |a, b| a * b)
            }
            RowOperation::Reference { table, match_field, take, group } => {
                let mut known = Record::new();
                known.insert(match_field.clone(), value);
                known.insert("group".to_string(), group.clone());
                resolve_search(table, known, take, Vec::new(), Some(match_field.as_str()), cx)
            }
            RowOperation::Replace { characters, substring, all, put, put_meta } => self.apply_replace(
                value,
                characters.as_deref(),
                substring.as_deref(),
                all.as_deref(),
                put,
                *put_meta,
                cx,
            ),
            RowOperation::Search { table, matches, take } => self.apply_search(table, matches, take, cx),
            RowOperation::Sign => self.apply_sign(&value),
            RowOperation::Subtract { with } => {
                self.apply_arithmetic(&value, with, cx, "subtract", |a, b| a - b)
            }
            RowOperation::Sum { column } => {
                let sum = cx.table.column_sum(column.get())?;
                Ok(Outcome::Value(format_number(sum)))
            }
            RowOperation::Trim => Ok(Outcome::Value(value.trim().to_string())),
            RowOperation::Utility { table, match_field, take, group } => {
                self.apply_utility(value, table, match_field, take, group, cx)
            }
        }
    }

    fn apply_abs(&self, value: &str) -> EvalResult<Outcome> {
        let n = parse_float(value)
            .ok_or_else(|| EvalError::NotANumber { operation: "abs", value: value.to_string() })?;
        Ok(Outcome::Value(format_number(n.abs())))
    }

    fn apply_sign(&self, value: &str) -> EvalResult<Outcome> {
        let n = parse_float(value)
            .ok_or_else(|| EvalError::NotANumber { operation: "sign", value: value.to_string() })?;
        let sign = if n == 0.0 { 0.0 } else { n.signum() };
        Ok(Outcome::Value(format_number(sign)))
    }

    fn apply_arithmetic(
        &self,
        value: &str,
        with: &[RowOperation],
        cx: &mut RowContext<'_>,
        operation: &'static str,
        combine: fn(f64, f64) -> f64,
    ) -> EvalResult<Outcome> {
        let other = match run_chain(with, cx)? {
            Outcome::Value(v) => v,
            stop => return Ok(stop),
        };

        let a = parse_number(value)
            .ok_or_else(|| EvalError::NotANumber { operation, value: value.to_string() })?;
        let b = parse_number(&other)
            .ok_or_else(|| EvalError::NotANumber { operation, value: other.clone() })?;

        let result = combine(a, b);
        if result.is_nan() {
            return Err(EvalError::NotANumber { operation, value: format!("{} and {}", value, other) });
        }
        Ok(Outcome::Value(format_number(result)))
    }

    fn apply_character(&self, value: &str, select: &str, action: Action) -> Outcome {
        Outcome::Value(value.chars().filter(|c| action.keeps(select.contains(*c))).collect())
    }

    fn apply_column(&self, index: ColumnIndex, cx: &RowContext<'_>) -> EvalResult<Outcome> {
        cx.row
            .get(index.get())
            .map(|cell| Outcome::Value(cell.to_string()))
            .ok_or(EvalError::MissingColumn(index.get() + 1))
    }

    fn apply_concat(
        &self,
        value: String,
        with: &[RowOperation],
        separator: &str,
        cx: &mut RowContext<'_>,
    ) -> EvalResult<Outcome> {
        Ok(match run_chain(with, cx)? {
            Outcome::Value(other) => Outcome::Value(format!("{}{}{}", value, separator, other)),
            stop => stop,
        })
    }

    fn apply_equals(&self, value: &str, with: &[RowOperation], cx: &mut RowContext<'_>) -> EvalResult<Outcome> {
        Ok(match run_chain(with, cx)? {
            Outcome::Value(other) => Outcome::Value((value == other).to_string()),
            stop => stop,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_replace(
        &self,
        value: String,
        characters: Option<&str>,
        substring: Option<&str>,
        all: Option<&str>,
        put: &str,
        put_meta: Option<MetaKind>,
        cx: &RowContext<'_>,
    ) -> EvalResult<Outcome> {
        let put = match put_meta {
            Some(kind) => kind.resolve(cx),
            None => put.to_string(),
        };

        let mut result = value;

        if let Some(characters) = characters {
            for c in characters.chars() {
                result = result.replacen(c, &put, 1);
            }
        }

        if let Some(pattern) = substring {
            let regex = Regex::new(pattern).map_err(|e| EvalError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
            result = regex.replace(&result, NoExpand(&put)).to_string();
        }

        if all.is_some_and(|all| result == all) {
            result = put;
        }

        Ok(Outcome::Value(result))
    }

    fn apply_search(
        &self,
        table: &str,
        matches: &BTreeMap<String, SearchMatch>,
        take: &str,
        cx: &mut RowContext<'_>,
    ) -> EvalResult<Outcome> {
        let mut known = Record::new();
        for (field, m) in matches {
            match run_chain(&m.definition, cx)? {
                Outcome::Value(v) => {
                    known.insert(field.clone(), v);
                }
                stop => return Ok(stop),
            }
        }

        let optional = matches.iter().filter(|(_, m)| m.optional).map(|(f, _)| f.clone()).collect();
        let primary = matches.iter().find(|(_, m)| m.primary).map(|(f, _)| f.as_str());
        resolve_search(table, known, take, optional, primary, cx)
    }

    fn apply_utility(
        &self,
        value: String,
        table: &str,
        match_field: &str,
        take: &str,
        group: &str,
        cx: &RowContext<'_>,
    ) -> EvalResult<Outcome> {
        let mut known = Record::new();
        known.insert(match_field.to_string(), value.clone());
        known.insert("group".to_string(), group.to_string());

        cx.state
            .utilities
            .get(table)
            .and_then(|t| t.ask_value(&known, take))
            .map(|v| Outcome::Value(v.to_string()))
            .ok_or_else(|| EvalError::UtilityMiss {
                table: table.to_string(),
                field: match_field.to_string(),
                value,
            })
    }
}

/// Find `take` for `known`, falling back to earlier answers, then asking.
fn resolve_search(
    table: &str,
    known: Record,
    take: &str,
    optional: Vec<String>,
    primary: Option<&str>,
    cx: &mut RowContext<'_>,
) -> EvalResult<Outcome> {
    let reference = cx.state.references.get(table);
    if let Some(found) = reference.and_then(|t| t.ask_value(&known, take)) {
        return Ok(Outcome::Value(found.to_string()));
    }

    let hash = Question::hash_of(&known, take);
    match cx.state.tracker.resolution(&hash) {
        Some(Resolution::Answered(value)) => return Ok(Outcome::Value(value)),
        Some(Resolution::Ignored) => {
            let described: Vec<String> = known.iter().map(|(k, v)| format!("{}='{}'", k, v)).collect();
            return Ok(Outcome::Drop(format!(
                "No '{}' in '{}' for {}; the question was ignored.",
                take,
                table,
                described.join(", ")
            )));
        }
        None => {}
    }

    let suggestions = match (primary, reference) {
        (Some(field), Some(reference)) => {
            let query = known.get(field).map(String::as_str).unwrap_or("");
            reference.suggest(field, query, take).iter().map(format_suggestion).collect()
        }
        _ => Vec::new(),
    };

    cx.state.tracker.ask(Question {
        hash: hash.clone(),
        table: table.to_string(),
        unknown: take.to_string(),
        known,
        optional,
        suggestions,
    });
    Ok(Outcome::Pending(hash))
}

impl Coerce {
    pub fn apply(&self, value: &str, cx: &RowContext<'_>) -> EvalResult<Outcome> {
        match self {
            Coerce::Date { year, parse, format } => {
                coerce_date(value, parse, *year, format, cx.context.time.year)
                    .map(Outcome::Value)
                    .ok_or_else(|| EvalError::UnknownDate(value.to_string()))
            }
            Coerce::Number { otherwise } => Ok(Outcome::Value(coerce_number(value, otherwise.as_deref()))),
            Coerce::Usd { round } => Ok(Outcome::Value(coerce_usd(value, *round))),
        }
    }
}
