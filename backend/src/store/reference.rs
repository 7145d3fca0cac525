//! Reference and utility tables.
//!
//! A table is an append-only list of records persisted as a CSV file whose
//! first row names the fields. A stored `*` matches any queried value.

use std::path::Path;

use super::StoreItem;
use crate::error::{StoreError, StoreResult};
use crate::parser::{parse_bytes_auto, write_matrix};
use crate::resolve::{suggest, Record, Suggestion, WILDCARD};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceTable {
    name: String,
    columns: Vec<String>,
    records: Vec<Record>,
}

impl ReferenceTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), columns: Vec::new(), records: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// First record agreeing with every `known` field.
    pub fn ask(&self, known: &Record) -> Option<&Record> {
        self.records.iter().find(|record| {
            known.iter().all(|(field, value)| {
                record
                    .get(field)
                    .is_some_and(|stored| stored == value || stored == WILDCARD)
            })
        })
    }

    /// Value of `take` in the first record agreeing with `known`.
    pub fn ask_value(&self, known: &Record, take: &str) -> Option<&str> {
        self.ask(known).and_then(|r| r.get(take)).map(String::as_str)
    }

    /// Records whose `field` resembles `query`.
    pub fn suggest(&self, field: &str, query: &str, take: &str) -> Vec<Suggestion> {
        suggest::suggest(&self.records, field, query, take)
    }

    /// Add a record, widening the column set if it introduces new fields.
    pub fn append(&mut self, record: Record) {
        for field in record.keys() {
            if !self.columns.contains(field) {
                self.columns.push(field.clone());
            }
        }
        self.records.push(record);
    }
}

impl StoreItem for ReferenceTable {
    fn hash(&self) -> String {
        self.name.clone()
    }

    fn deserialize(path: &Path, bytes: &[u8]) -> StoreResult<Self> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::Invalid {
                path: path.display().to_string(),
                message: "missing file name".into(),
            })?;

        let parsed = parse_bytes_auto(bytes).map_err(|e| StoreError::Invalid {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut rows = parsed.rows.into_iter();
        let columns: Vec<String> = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        let records = rows
            .map(|cells| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| (column.clone(), cells.get(i).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect();

        Ok(Self { name, columns, records })
    }

    fn serialize(&self) -> StoreResult<Vec<u8>> {
        let header = self.columns.clone();
        let body = self.records.iter().map(|record| {
            self.columns
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or_default())
                .collect::<Vec<_>>()
        });
        let text = write_matrix(std::iter::once(header).chain(body)).map_err(|e| StoreError::Invalid {
            path: self.name.clone(),
            message: e.to_string(),
        })?;
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn customers() -> ReferenceTable {
        ReferenceTable::deserialize(
            Path::new("tables/customers.csv"),
            b"customerName,fuseId,group\nBob's Diner,F-1,acme\nAlice Cafe,F-2,*\n",
        )
        .unwrap()
    }

    #[test]
    fn test_deserialize_names_table_after_file() {
        let table = customers();
        assert_eq!(table.name(), "customers");
        assert_eq!(table.columns(), &["customerName", "fuseId", "group"]);
        assert_eq!(table.records().len(), 2);
    }

    #[test]
    fn test_exact_and_wildcard_match() {
        let table = customers();
        let q = record(&[("customerName", "Bob's Diner"), ("group", "acme")]);
        assert_eq!(table.ask_value(&q, "fuseId"), Some("F-1"));

        let q = record(&[("customerName", "Bob's Diner"), ("group", "other")]);
        assert_eq!(table.ask_value(&q, "fuseId"), None);

        // group is "*" on Alice's record.
        let q = record(&[("customerName", "Alice Cafe"), ("group", "anything")]);
        assert_eq!(table.ask_value(&q, "fuseId"), Some("F-2"));
    }

    #[test]
    fn test_append_and_serialize() {
        let mut table = ReferenceTable::new("deposit");
        table.append(record(&[("file", "march.xlsx"), ("amount", "1,000.00")]));
        let text = String::from_utf8(table.serialize().unwrap()).unwrap();
        assert_eq!(text, "amount,file\n\"1,000.00\",march.xlsx\n");

        let back = ReferenceTable::deserialize(Path::new("deposit.csv"), text.as_bytes()).unwrap();
        assert_eq!(back, table);
    }
}
