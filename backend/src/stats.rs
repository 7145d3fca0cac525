//! Run report: soft issues, timings and accuracy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::store::Rebate;

/// A problem that did not stop the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Issue {
    /// No source matched any file.
    NoSource { transformer: String },
    /// A matched file yielded no sheets.
    EmptySource { transformer: String, source: String },
    /// A sheet was empty after preprocessing.
    EmptySheet { transformer: String, source: String, sheet: String },
    /// A row was excluded by a dropped value.
    IgnoredRow {
        transformer: String,
        source: String,
        row: Vec<String>,
        reason: String,
    },
    /// A transformer failed part way; whatever it already wrote is kept.
    FailedTransformer { transformer: String, reason: String },
    /// A definition file was rejected and left out of the run.
    InvalidTransformer { file: String, reason: String },
}

impl Issue {
    pub fn kind(&self) -> &'static str {
        match self {
            Issue::NoSource { .. } => "no_source",
            Issue::EmptySource { .. } => "empty_source",
            Issue::EmptySheet { .. } => "empty_sheet",
            Issue::IgnoredRow { .. } => "ignored_row",
            Issue::FailedTransformer { .. } => "failed_transformer",
            Issue::InvalidTransformer { .. } => "invalid_transformer",
        }
    }
}

/// Wall-clock span of one transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Performance {
    pub fn millis(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

/// Comparison of one supplier's output against the truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub name: String,
    #[serde(rename = "match")]
    pub matched: usize,
    /// Expected but not produced.
    pub take: Vec<Rebate>,
    /// Produced but not expected.
    pub drop: Vec<Rebate>,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub issues: Vec<Issue>,
    pub performance: Vec<Performance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrepancy: Option<Vec<Discrepancy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl RunReport {
    /// Issue counts by kind, in first-seen order.
    pub fn issue_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for issue in &self.issues {
            match counts.iter_mut().find(|(k, _)| *k == issue.kind()) {
                Some((_, n)) => *n += 1,
                None => counts.push((issue.kind(), 1)),
            }
        }
        counts
    }
}
