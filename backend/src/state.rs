//! Mutable state owned by the runner and lent to every evaluation.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tracing::debug;

use crate::config::Layout;
use crate::context::Time;
use crate::error::StoreResult;
use crate::resolve::{Answer, Question, Record, Tracker};
use crate::store::{Counter, FileBackedStore, Rebate, RebateFile, ReferenceTable};

/// Counter name used by the `counter` row operation.
pub const COUNTER: &str = "counter";

#[derive(Debug, Default)]
pub struct State {
    pub counter: Counter,
    pub tracker: Tracker,
    /// Reference tables shared across quarters.
    pub references: FileBackedStore<ReferenceTable>,
    /// Utility tables of the active quarter.
    pub utilities: FileBackedStore<ReferenceTable>,
    /// Rebate files written by this run.
    pub rebates: FileBackedStore<RebateFile>,
    /// Fingerprints of debug tables already dumped this run.
    debug_dumps: HashSet<u64>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything from a previous run.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add a record to a reference table, creating the table if needed.
    pub fn append_reference(&mut self, layout: &Layout, table: &str, record: Record) {
        self.references
            .get_or_insert_with(table, layout.reference(table), || ReferenceTable::new(table))
            .append(record);
    }

    /// Add records to a utility table of the given quarter.
    pub fn append_utility<I>(&mut self, layout: &Layout, time: &Time, table: &str, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        let target = self
            .utilities
            .get_or_insert_with(table, layout.utility(table, time), || ReferenceTable::new(table));
        for record in records {
            target.append(record);
        }
    }

    /// Append rebates to the file at `path`.
    pub fn append_rebates(&mut self, path: PathBuf, rebates: Vec<Rebate>) {
        let key = path.display().to_string();
        self.rebates
            .get_or_insert_with(&key, path.clone(), || RebateFile::new(&path))
            .extend(rebates);
    }

    /// Record a debug dump. False when the same dump was already written,
    /// as happens when a suspended transformer runs again.
    pub fn first_dump(&mut self, transformer: &str, name: &str, content: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        (transformer, name, content).hash(&mut hasher);
        self.debug_dumps.insert(hasher.finish())
    }

    /// Every rebate produced so far.
    pub fn produced(&self) -> Vec<Rebate> {
        self.rebates.iter().flat_map(|f| f.rebates().iter().cloned()).collect()
    }

    /// Apply an answer to its pending question.
    ///
    /// A record without the unknown field counts as an ignore. Returns the
    /// settled question, or `None` if nothing with that hash was pending.
    pub fn apply_answer(&mut self, layout: &Layout, answer: Answer) -> Option<Question> {
        let question = self.tracker.get(&answer.hash)?.clone();

        let value = answer
            .answer
            .as_ref()
            .and_then(|record| record.get(&question.unknown).cloned());

        match (answer.answer, value) {
            (Some(record), Some(value)) => {
                debug!(table = %question.table, value = %value, "answer recorded");
                self.append_reference(layout, &question.table, record);
                self.tracker.answer(&question.hash, value)
            }
            _ => self.tracker.ignore(&question.hash),
        }
    }

    /// Persist every changed store.
    pub async fn save(&mut self) -> StoreResult<usize> {
        let mut written = self.references.save().await?;
        written += self.utilities.save().await?;
        written += self.rebates.save().await?;
        Ok(written)
    }
}
