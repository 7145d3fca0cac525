//! Interactive resolution of unknown reference values.
//!
//! When a `reference` or `search` lookup finds no record, evaluation does not
//! block. It registers a [`Question`] with the [`Tracker`] and returns
//! `Outcome::Pending(hash)`. The runner publishes the question, waits for an
//! [`Answer`] (or an ignore), and re-executes the transformer.
//!
//! ```text
//!   search ──miss──▶ Tracker::ask ──▶ Pending(hash) ──▶ Runner
//!                                                        │ publish question
//!                                                        ▼
//!   search ◀──hit── store + Tracker ◀── answer/ignore ◀── client
//! ```
//!
//! Questions are deduplicated by content hash: asking the same
//! `{known, unknown}` pair twice while it is pending yields one question.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub mod suggest;

pub use suggest::{format_suggestion, Suggestion};

/// A reference record: field name to value.
pub type Record = BTreeMap<String, String>;

/// Field value meaning "matches anything".
pub const WILDCARD: &str = "*";

/// A lookup that needs a human answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub hash: String,
    pub table: String,
    pub unknown: String,
    pub known: Record,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl Question {
    /// Content hash of a lookup.
    pub fn hash_of(known: &Record, unknown: &str) -> String {
        serde_json::to_string(&(known, unknown)).unwrap_or_else(|_| format!("{:?}/{}", known, unknown))
    }
}

/// A reply to a question. A missing `answer` ignores the question.
///
/// `answer` is the complete record to store: the known fields (any of them
/// may be replaced by `*`) plus the unknown field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub hash: String,
    #[serde(default)]
    pub answer: Option<Record>,
}

impl Answer {
    pub fn ignore(hash: impl Into<String>) -> Self {
        Self { hash: hash.into(), answer: None }
    }

    pub fn with_record(hash: impl Into<String>, record: Record) -> Self {
        Self { hash: hash.into(), answer: Some(record) }
    }
}

/// How a question was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Answered(String),
    Ignored,
}

/// Run-scoped registry of questions.
#[derive(Debug, Default)]
pub struct Tracker {
    pending: Vec<Question>,
    announced: HashSet<String>,
    resolved: HashMap<String, Resolution>,
    ignore_all: bool,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// How an earlier question with this hash was settled, if it was.
    pub fn resolution(&self, hash: &str) -> Option<Resolution> {
        match self.resolved.get(hash) {
            Some(r) => Some(r.clone()),
            None if self.ignore_all => Some(Resolution::Ignored),
            None => None,
        }
    }

    /// Register a question. Returns `false` if one with the same hash is
    /// already pending.
    pub fn ask(&mut self, question: Question) -> bool {
        if self.is_pending(&question.hash) {
            return false;
        }
        self.pending.push(question);
        true
    }

    pub fn is_pending(&self, hash: &str) -> bool {
        self.pending.iter().any(|q| q.hash == hash)
    }

    pub fn get(&self, hash: &str) -> Option<&Question> {
        self.pending.iter().find(|q| q.hash == hash)
    }

    pub fn pending(&self) -> &[Question] {
        &self.pending
    }

    /// Questions not yet handed out by a previous call.
    pub fn take_new(&mut self) -> Vec<Question> {
        let fresh: Vec<Question> = self
            .pending
            .iter()
            .filter(|q| !self.announced.contains(&q.hash))
            .cloned()
            .collect();
        self.announced.extend(fresh.iter().map(|q| q.hash.clone()));
        fresh
    }

    fn settle(&mut self, hash: &str, resolution: Resolution) -> Option<Question> {
        let position = self.pending.iter().position(|q| q.hash == hash)?;
        self.resolved.insert(hash.to_string(), resolution);
        Some(self.pending.remove(position))
    }

    /// Resolve a pending question with a value for its unknown field.
    pub fn answer(&mut self, hash: &str, value: String) -> Option<Question> {
        self.settle(hash, Resolution::Answered(value))
    }

    /// Resolve a pending question to a dropped row.
    pub fn ignore(&mut self, hash: &str) -> Option<Question> {
        self.settle(hash, Resolution::Ignored)
    }

    /// Drop every pending and future question for the rest of the run.
    pub fn ignore_all(&mut self) -> Vec<Question> {
        self.ignore_all = true;
        let pending = std::mem::take(&mut self.pending);
        for q in &pending {
            self.resolved.insert(q.hash.clone(), Resolution::Ignored);
        }
        pending
    }

    pub fn ignoring_all(&self) -> bool {
        self.ignore_all
    }

    /// Whether every hash in `hashes` has been settled.
    pub fn all_settled<'a, I>(&self, hashes: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        hashes.into_iter().all(|h| self.resolution(h).is_some())
    }
}
