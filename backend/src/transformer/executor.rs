//! Running one transformer against the run state.
//!
//! A run either completes or suspends. Suspension happens when any row is
//! waiting on a question: the counter is rolled back, nothing reaches a
//! destination, and the runner re-executes the whole transformer once the
//! questions are settled.
//!
//! An evaluation error either aborts the run ([`EvalError::is_fatal`]) or
//! fails just this transformer, recorded as a `failed_transformer` issue.

use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::AdvancedTransformer;
use crate::context::Context;
use crate::dsl::table::run_table_chain;
use crate::dsl::{run_chain, Outcome, RowContext, Step, TableContext};
use crate::error::{EvalError, RunError, RunResult};
use crate::state::State;
use crate::stats::{Issue, Performance, RunReport};
use crate::table::{Row, Table};

/// How a transformer run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Run {
    Done,
    /// Waiting on these question hashes.
    Suspended(Vec<String>),
}

struct Pending(BTreeSet<String>);

impl Pending {
    fn new() -> Self {
        Self(BTreeSet::new())
    }

    fn insert(&mut self, hash: String) {
        self.0.insert(hash);
    }

    fn extend(&mut self, hashes: Vec<String>) {
        self.0.extend(hashes);
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_run(self) -> Run {
        Run::Suspended(self.0.into_iter().collect())
    }
}

/// Execute a transformer. Issues and timings are added to `report` only when
/// the run completes.
pub fn execute(
    transformer: &AdvancedTransformer,
    context: &Context,
    state: &mut State,
    report: &mut RunReport,
) -> RunResult<Run> {
    let start = Utc::now();
    let counter = state.counter.clone();
    let mut issues = Vec::new();

    let outcome = match run_stages(transformer, context, state, &mut issues) {
        Ok(outcome) => outcome,
        Err(source) if source.is_fatal() => {
            return Err(RunError::Transformer { name: transformer.name.clone(), source });
        }
        Err(e) => {
            warn!(transformer = %transformer.name, error = %e, "transformer failed");
            issues.push(Issue::FailedTransformer { transformer: transformer.name.clone(), reason: e.to_string() });
            Stage::Finished
        }
    };

    match outcome {
        Stage::Suspended(pending) => {
            debug!(transformer = %transformer.name, questions = pending.0.len(), "transformer suspended");
            state.counter = counter;
            Ok(pending.into_run())
        }
        Stage::Finished => {
            report.issues.extend(issues);
            report.performance.push(Performance { name: transformer.name.clone(), start, end: Utc::now() });
            Ok(Run::Done)
        }
    }
}

enum Stage {
    Finished,
    Suspended(Pending),
}

fn run_stages(
    transformer: &AdvancedTransformer,
    context: &Context,
    state: &mut State,
    issues: &mut Vec<Issue>,
) -> Result<Stage, EvalError> {
    let name = transformer.name.as_str();

    // 1. Sources.
    let mut tables = Vec::new();
    for source in &transformer.sources {
        match source.run(&context.layout, &context.time, name, issues) {
            Ok(extracted) => tables.extend(extracted),
            Err(e) => {
                warn!(transformer = %name, error = %e, "source failed");
                issues.push(Issue::FailedTransformer { transformer: name.to_string(), reason: e.to_string() });
                return Ok(Stage::Finished);
            }
        }
    }

    if tables.is_empty() {
        issues.push(Issue::NoSource { transformer: name.to_string() });
        return Ok(Stage::Finished);
    }

    // 2. Preprocess each table on its own.
    let mut pending = Pending::new();
    let mut preprocessed = Vec::with_capacity(tables.len());
    for table in tables {
        let provenance = table.provenance().cloned();
        let mut cx = TableContext { context, state: &mut *state, transformer: name, issues: &mut *issues };
        match run_table_chain(&transformer.preprocess, table, &mut cx)? {
            Step::Pending(hashes) => pending.extend(hashes),
            Step::Done(table) if table.is_empty() => issues.push(Issue::EmptySheet {
                transformer: name.to_string(),
                source: provenance.as_ref().map(|p| p.file.display().to_string()).unwrap_or_default(),
                sheet: provenance.map(|p| p.sheet).unwrap_or_default(),
            }),
            Step::Done(table) => preprocessed.push(table),
        }
    }
    if !pending.is_empty() {
        return Ok(Stage::Suspended(pending));
    }

    let total = Table::stack(preprocessed);

    // 3. Properties. A row with any dropped property is left out entirely.
    let mut rows = Vec::with_capacity(total.len());
    for row in total.iter() {
        let mut cells = Vec::with_capacity(transformer.properties.len());
        for property in &transformer.properties {
            let mut cx = RowContext { context, state: &mut *state, table: &total, row };
            match run_chain(&property.definition, &mut cx)? {
                Outcome::Value(value) => cells.push(value),
                Outcome::Drop(reason) => {
                    issues.push(Issue::IgnoredRow {
                        transformer: name.to_string(),
                        source: row.source().to_string(),
                        row: row.cells().to_vec(),
                        reason,
                    });
                    break;
                }
                Outcome::Pending(hash) => {
                    pending.insert(hash);
                    break;
                }
            }
        }
        if cells.len() == transformer.properties.len() {
            rows.push(row.derive(cells));
        }
    }
    if !pending.is_empty() {
        return Ok(Stage::Suspended(pending));
    }

    // 4. Header row of property names.
    let mut extracted = total.with_rows(rows);
    extracted.prepend(Row::dynamic(transformer.properties.iter().map(|p| p.name.clone()).collect()));

    // 5. Postprocess.
    let mut cx = TableContext { context, state: &mut *state, transformer: name, issues: &mut *issues };
    let finished = match run_table_chain(&transformer.postprocess, extracted, &mut cx)? {
        Step::Done(table) => table,
        Step::Pending(hashes) => {
            pending.extend(hashes);
            return Ok(Stage::Suspended(pending));
        }
    };

    // 6. Destinations.
    for destination in &transformer.destination {
        destination.run(&finished, context, state)?;
    }

    debug!(transformer = %name, rows = finished.len().saturating_sub(1), "transformer finished");
    Ok(Stage::Finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;
    use crate::context::{Filter, Time};
    use crate::resolve::Answer;
    use crate::transformer::load_transformer;
    use tempfile::tempdir;

    fn write_source(root: &std::path::Path, content: &str) {
        let folder = Layout::new(root).sources("acme", &Time { year: 2024, quarter: 1 });
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("march.csv"), content).unwrap();
    }

    fn context(root: &std::path::Path) -> Context {
        Context::new(Time { year: 2024, quarter: 1 }, Filter::default(), Layout::new(root))
    }

    #[test]
    fn test_extracts_properties_with_header() {
        let dir = tempdir().unwrap();
        write_source(dir.path(), "h1,h2\n3,x\n4,y\n");
        let transformer = load_transformer(
            r#"{
                "type": "advanced", "name": "acme",
                "sources": [{ "type": "excel", "group": "acme" }],
                "preprocess": [{ "type": "trim", "top": 1 }],
                "properties": [{ "name": "amount", "definition": [
                    { "type": "column", "index": 0 }, { "type": "coerce", "as": "number" }
                ] }],
                "destination": [{ "type": "utility", "name": "amounts" }]
            }"#,
        )
        .unwrap();

        let context = context(dir.path());
        let mut state = State::new();
        let mut report = RunReport::default();
        assert_eq!(execute(&transformer, &context, &mut state, &mut report).unwrap(), Run::Done);

        let table = state.utilities.get("amounts").unwrap();
        let values: Vec<&str> = table.records().iter().map(|r| r["amount"].as_str()).collect();
        assert_eq!(values, vec!["3", "4"]);
        assert_eq!(report.performance.len(), 1);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_no_source_issue() {
        let dir = tempdir().unwrap();
        let transformer = load_transformer(
            r#"{"type":"advanced","name":"acme","sources":[{"type":"excel","group":"acme"}],"properties":[]}"#,
        )
        .unwrap();

        let mut state = State::new();
        let mut report = RunReport::default();
        execute(&transformer, &context(dir.path()), &mut state, &mut report).unwrap();
        assert_eq!(report.issues, vec![Issue::NoSource { transformer: "acme".into() }]);
    }

    #[test]
    fn test_empty_sheet_issue() {
        let dir = tempdir().unwrap();
        write_source(dir.path(), "only\n");
        let transformer = load_transformer(
            r#"{"type":"advanced","name":"acme","sources":[{"type":"excel","group":"acme"}],
                "preprocess":[{"type":"trim","top":1}],"properties":[]}"#,
        )
        .unwrap();

        let mut state = State::new();
        let mut report = RunReport::default();
        execute(&transformer, &context(dir.path()), &mut state, &mut report).unwrap();
        assert!(matches!(&report.issues[0], Issue::EmptySheet { sheet, .. } if sheet == "march"));
    }

    #[test]
    fn test_rebate_destination_from_one_property() {
        let dir = tempdir().unwrap();
        write_source(dir.path(), "h1,h2\n3,x\n4,y\n");
        let transformer = load_transformer(
            r#"{
                "type": "advanced", "name": "acme",
                "sources": [{ "type": "excel", "group": "acme" }],
                "preprocess": [{ "type": "trim", "top": 1 }],
                "properties": [{ "name": "purchaseAmount", "definition": [
                    { "type": "column", "index": 0 }, { "type": "coerce", "as": "number" }
                ] }],
                "destination": [{ "type": "rebate", "name": "acme" }]
            }"#,
        )
        .unwrap();

        let mut state = State::new();
        let mut report = RunReport::default();
        assert_eq!(execute(&transformer, &context(dir.path()), &mut state, &mut report).unwrap(), Run::Done);

        let amounts: Vec<f64> = state.produced().iter().map(|r| r.purchase_amount).collect();
        assert_eq!(amounts, vec![3.0, 4.0]);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_fatal_error_names_transformer() {
        let dir = tempdir().unwrap();
        write_source(dir.path(), "a\n");
        let transformer = load_transformer(
            r#"{"type":"advanced","name":"acme","sources":[{"type":"excel","group":"acme"}],
                "properties":[{"name":"x","definition":[{"type":"literal","value":"someday"},{"type":"coerce","as":"date"}]}]}"#,
        )
        .unwrap();

        let mut state = State::new();
        let err = execute(&transformer, &context(dir.path()), &mut state, &mut RunReport::default()).unwrap_err();
        assert_eq!(err.to_string(), "acme: Date 'someday' is in an unknown format.");
    }

    #[test]
    fn test_failed_transformer_is_soft() {
        let dir = tempdir().unwrap();
        write_source(dir.path(), "a\n");
        let transformer = load_transformer(
            r#"{"type":"advanced","name":"acme","sources":[{"type":"excel","group":"acme"}],
                "properties":[{"name":"x","definition":[{"type":"column","index":4}]}]}"#,
        )
        .unwrap();

        let mut state = State::new();
        let mut report = RunReport::default();
        assert_eq!(execute(&transformer, &context(dir.path()), &mut state, &mut report).unwrap(), Run::Done);
        assert_eq!(
            report.issues,
            vec![Issue::FailedTransformer { transformer: "acme".into(), reason: "There is no data in column '5'.".into() }]
        );
        assert_eq!(report.performance.len(), 1);
    }

    #[test]
    fn test_failed_transformer_keeps_earlier_output() {
        let dir = tempdir().unwrap();
        write_source(dir.path(), "a\n");
        let transformer = load_transformer(
            r#"{"type":"advanced","name":"acme","sources":[{"type":"excel","group":"acme"}],
                "properties":[{"name":"rebateAmount","definition":[{"type":"column","index":0}]}],
                "destination":[{"type":"utility","name":"seen"},{"type":"rebate","name":"acme"}]}"#,
        )
        .unwrap();

        let mut state = State::new();
        let mut report = RunReport::default();
        execute(&transformer, &context(dir.path()), &mut state, &mut report).unwrap();

        assert!(matches!(&report.issues[0], Issue::FailedTransformer { reason, .. } if reason.contains("not a valid rebate")));
        assert_eq!(state.utilities.get("seen").unwrap().records()[0]["rebateAmount"], "a");
        assert!(state.produced().is_empty());
    }

    #[test]
    fn test_suspends_then_resumes() {
        let dir = tempdir().unwrap();
        write_source(dir.path(), "Bob\nBob\nAl\n");
        let transformer = load_transformer(
            r#"{"type":"advanced","name":"acme","sources":[{"type":"excel","group":"acme"}],
                "properties":[
                    {"name":"n","definition":[{"type":"counter"}]},
                    {"name":"id","definition":[
                        {"type":"column","index":0},
                        {"type":"reference","table":"customers","match":"customerName","take":"fuseId","group":"acme"}
                    ]}
                ],
                "destination":[{"type":"utility","name":"out"}]}"#,
        )
        .unwrap();

        let context = context(dir.path());
        let mut state = State::new();
        let mut report = RunReport::default();

        let Run::Suspended(hashes) = execute(&transformer, &context, &mut state, &mut report).unwrap() else {
            panic!("expected suspension");
        };
        assert_eq!(hashes.len(), 2);
        assert_eq!(state.tracker.pending().len(), 2);
        assert_eq!(state.counter.peek(crate::state::COUNTER), 0);
        assert!(report.performance.is_empty());

        for question in state.tracker.pending().to_vec() {
            let answer = if question.known["customerName"] == "Bob" {
                let mut record = question.known.clone();
                record.insert("fuseId".into(), "F-1".into());
                Answer::with_record(&question.hash, record)
            } else {
                Answer::ignore(&question.hash)
            };
            state.apply_answer(&context.layout, answer);
        }

        assert_eq!(execute(&transformer, &context, &mut state, &mut report).unwrap(), Run::Done);
        let out = state.utilities.get("out").unwrap();
        assert_eq!(out.records().len(), 2);
        assert_eq!(out.records()[0]["n"], "0");
        assert_eq!(out.records()[1]["id"], "F-1");
        assert!(matches!(&report.issues[0], Issue::IgnoredRow { row, .. } if row == &vec!["Al".to_string()]));
    }
}
