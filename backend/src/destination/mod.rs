//! Destinations: where a transformer's final table goes.
//!
//! Both kinds read row 0 as field names and every other row as a record.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Context;
use crate::error::{EvalError, EvalResult};
use crate::resolve::Record;
use crate::state::State;
use crate::store::Rebate;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    /// Append rebates to `rebates/{year}/Q{q}/{name}.csv`.
    Rebate { name: String },
    /// Append records to the utility table `name`.
    Utility { name: String },
}

/// Rows after the header as field maps.
pub fn records(table: &Table) -> Vec<Record> {
    let Some(header) = table.get(0) else { return Vec::new() };

    table
        .iter()
        .skip(1)
        .map(|row| {
            header
                .cells()
                .iter()
                .enumerate()
                .map(|(i, field)| (field.clone(), row.get(i).unwrap_or("").to_string()))
                .collect()
        })
        .collect()
}

impl Destination {
    pub fn run(&self, table: &Table, context: &Context, state: &mut State) -> EvalResult<()> {
        match self {
            Destination::Rebate { name } => {
                let rebates = records(table)
                    .iter()
                    .enumerate()
                    .map(|(i, record)| {
                        Rebate::from_record(record).map_err(|message| EvalError::InvalidRebate { row: i + 1, message })
                    })
                    .collect::<EvalResult<Vec<_>>>()?;

                debug!(destination = %name, rebates = rebates.len(), "rebates written");
                state.append_rebates(context.layout.rebate(name, &context.time), rebates);
            }
            Destination::Utility { name } => {
                let records = records(table);
                debug!(destination = %name, records = records.len(), "utility rows written");
                state.append_utility(&context.layout, &context.time, name, records);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;
    use crate::context::{Filter, Time};
    use crate::store::REBATE_FIELDS;

    fn context() -> Context {
        Context::new(Time { year: 2024, quarter: 2 }, Filter::default(), Layout::new("/data"))
    }

    #[test]
    fn test_records_pad_short_rows() {
        let table = Table::from_cells(vec![vec!["a", "b"], vec!["1"]]);
        let records = records(&table);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["a"], "1");
        assert_eq!(records[0]["b"], "");
    }

    #[test]
    fn test_rebate_destination() {
        let mut state = State::new();
        let table = Table::from_cells([
            REBATE_FIELDS.to_vec(),
            vec!["0", "1/2/2024", "SUP", "M1", "Dist", "100", "5.5", "42", "1/2/2024"],
        ]);

        Destination::Rebate { name: "acme".into() }
            .run(&table, &context(), &mut state)
            .unwrap();

        let produced = state.produced();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].rebate_amount, 5.5);
        assert!(state.rebates.get("/data/rebates/2024/Q2/acme.csv").is_some());
    }

    #[test]
    fn test_rebate_destination_fills_missing_fields() {
        let mut state = State::new();
        let table = Table::from_cells([["purchaseAmount"], ["3"], ["4"]]);
        Destination::Rebate { name: "acme".into() }
            .run(&table, &context(), &mut state)
            .unwrap();

        let amounts: Vec<f64> = state.produced().iter().map(|r| r.purchase_amount).collect();
        assert_eq!(amounts, vec![3.0, 4.0]);
    }

    #[test]
    fn test_rebate_destination_rejects_bad_amount() {
        let mut state = State::new();
        let table = Table::from_cells([["rebateAmount"], ["1"], ["abc"]]);
        let result = Destination::Rebate { name: "acme".into() }.run(&table, &context(), &mut state);
        assert!(matches!(result, Err(EvalError::InvalidRebate { row: 2, .. })));
    }

    #[test]
    fn test_utility_destination() {
        let mut state = State::new();
        let table = Table::from_cells([["group", "code", "rate"], ["acme", "X", "0.5"]]);

        Destination::Utility { name: "rates".into() }
            .run(&table, &context(), &mut state)
            .unwrap();

        let mut known = Record::new();
        known.insert("group".into(), "acme".into());
        known.insert("code".into(), "X".into());
        assert_eq!(state.utilities.get("rates").unwrap().ask_value(&known, "rate"), Some("0.5"));
    }
}
