//! Rebate records and the CSV files that hold them.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

use super::StoreItem;
use crate::dsl::coerce::{format_number, parse_number};
use crate::error::{StoreError, StoreResult};
use crate::parser::{decode_content, detect_encoding};
use crate::resolve::Record;

/// Output field names, in column order.
pub const REBATE_FIELDS: [&str; 9] = [
    "purchaseId",
    "transactionDate",
    "supplierId",
    "memberId",
    "distributorName",
    "purchaseAmount",
    "rebateAmount",
    "invoiceId",
    "invoiceDate",
];

/// One normalized output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Rebate {
    pub purchase_id: String,
    pub transaction_date: String,
    pub supplier_id: String,
    pub member_id: String,
    pub distributor_name: String,
    #[serde(serialize_with = "write_amount", deserialize_with = "read_amount")]
    pub purchase_amount: f64,
    #[serde(serialize_with = "write_amount", deserialize_with = "read_amount")]
    pub rebate_amount: f64,
    pub invoice_id: String,
    pub invoice_date: String,
}

fn write_amount<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_number(*value))
}

fn read_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => parse_number(&s)
            .ok_or_else(|| de::Error::custom(format!("'{}' is not a number", s))),
    }
}

impl Rebate {
    /// Build a rebate from a field map. Absent fields are blank and absent
    /// amounts are 0; a present amount must be a number.
    pub fn from_record(record: &Record) -> Result<Self, String> {
        let field = |name: &str| record.get(name).cloned().unwrap_or_default();
        let amount = |name: &str| {
            let raw = field(name);
            parse_number(&raw).ok_or_else(|| format!("Rebate field '{}' is not a number: '{}'.", name, raw))
        };

        Ok(Self {
            purchase_id: field("purchaseId"),
            transaction_date: field("transactionDate"),
            supplier_id: field("supplierId"),
            member_id: field("memberId"),
            distributor_name: field("distributorName"),
            purchase_amount: amount("purchaseAmount")?,
            rebate_amount: amount("rebateAmount")?,
            invoice_id: field("invoiceId"),
            invoice_date: field("invoiceDate"),
        })
    }
}

/// A CSV file of rebates, identified by its path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RebateFile {
    key: String,
    rebates: Vec<Rebate>,
}

impl RebateFile {
    pub fn new(path: &Path) -> Self {
        Self { key: path.display().to_string(), rebates: Vec::new() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn rebates(&self) -> &[Rebate] {
        &self.rebates
    }

    pub fn extend<I: IntoIterator<Item = Rebate>>(&mut self, rebates: I) {
        self.rebates.extend(rebates);
    }
}

/// Render rebates as CSV, header first.
pub fn rebates_to_csv<'a, I>(rebates: I) -> StoreResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a Rebate>,
{
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(REBATE_FIELDS)?;
    for rebate in rebates {
        writer.serialize(rebate)?;
    }
    writer
        .into_inner()
        .map_err(|e| StoreError::Invalid { path: "rebates".into(), message: e.to_string() })
}

impl StoreItem for RebateFile {
    fn hash(&self) -> String {
        self.key.clone()
    }

    fn deserialize(path: &Path, bytes: &[u8]) -> StoreResult<Self> {
        let content = decode_content(bytes, &detect_encoding(bytes));
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(content.as_bytes());

        let mut rebates = Vec::new();
        for record in reader.deserialize::<Rebate>() {
            rebates.push(record.map_err(|e| StoreError::Invalid {
                path: path.display().to_string(),
                message: e.to_string(),
            })?);
        }

        Ok(Self { key: path.display().to_string(), rebates })
    }

    fn serialize(&self) -> StoreResult<Vec<u8>> {
        rebates_to_csv(&self.rebates)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn rebate(invoice: &str, amount: f64) -> Rebate {
        Rebate {
            purchase_id: "0".into(),
            transaction_date: "3/1/2024".into(),
            supplier_id: "SUP".into(),
            member_id: "F-1".into(),
            distributor_name: "Sysco".into(),
            purchase_amount: 100.0,
            rebate_amount: amount,
            invoice_id: invoice.into(),
            invoice_date: "3/1/2024".into(),
        }
    }

    #[test]
    fn test_csv_round_trip() {
        let mut file = RebateFile::new(Path::new("rebates/2024/Q1/acme.csv"));
        file.extend(vec![rebate("1001", 2.5), rebate("1002", 0.0)]);

        let bytes = file.serialize().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("purchaseId,transactionDate,supplierId"));
        assert!(text.contains(",100,2.5,1001,"));

        let back = RebateFile::deserialize(Path::new("rebates/2024/Q1/acme.csv"), &bytes).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn test_unknown_columns_rejected() {
        let text = "purchaseId,extra\n1,2\n";
        assert!(RebateFile::deserialize(Path::new("x.csv"), text.as_bytes()).is_err());
    }

    #[test]
    fn test_from_record() {
        let mut record: Record = REBATE_FIELDS.iter().map(|f| (f.to_string(), "1".to_string())).collect();
        let rebate = Rebate::from_record(&record).unwrap();
        assert_eq!(rebate.rebate_amount, 1.0);

        record.insert("rebateAmount".into(), "abc".into());
        assert!(Rebate::from_record(&record).unwrap_err().contains("rebateAmount"));

    }

    #[test]
    fn test_from_record_defaults_absent_fields() {
        let mut record = Record::new();
        record.insert("purchaseAmount".into(), "3".into());

        let rebate = Rebate::from_record(&record).unwrap();
        assert_eq!(rebate.purchase_amount, 3.0);
        assert_eq!(rebate.rebate_amount, 0.0);
        assert_eq!(rebate.invoice_id, "");
        assert_eq!(rebate.purchase_id, "");
    }
}
