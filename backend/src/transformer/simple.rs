//! The simple authoring form and its compiler.
//!
//! A simple transformer describes where each rebate field lives in a
//! supplier's sheet. Compilation is deterministic and column order is fixed:
//!
//! | # | Property | Chain |
//! |---|----------|-------|
//! | 0 | purchaseId | counter |
//! | 1 | transactionDate | column, coerce date |
//! | 2 | supplierId | literal |
//! | 3 | memberId | column, reference customers |
//! | 4 | distributorName | literal, or column + reference distributors |
//! | 5 | purchaseAmount | column, coerce usd |
//! | 6 | rebateAmount | column, (× file total ÷ rebate total), × multiplier, coerce usd |
//! | 7 | invoiceId | column, digits only, coerce number (99999) |
//! | 8 | invoiceDate | column, coerce date |
//!
//! Unconfigured fields other than purchaseId are left out.

use serde::{Deserialize, Serialize};

use super::{AdvancedTransformer, Property};
use crate::destination::Destination;
use crate::dsl::coerce::{format_number, Rounding, YearPolicy};
use crate::dsl::{Action, Coerce, MetaKind, RowOperation, TableOperation};
use crate::error::{TransformerError, TransformerResult};
use crate::source::Source;
use crate::table::ColumnIndex;

/// Scratch column holding the deposit total of a row's file.
pub const FILE_TOTAL_COLUMN: usize = 50;
/// Scratch column holding the rebate column total of a row's table.
pub const REBATE_TOTAL_COLUMN: usize = 51;
/// Output column of `rebateAmount`.
const REBATE_AMOUNT_COLUMN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleTransformer {
    pub name: String,
    pub group: String,
    pub source: SimpleSource,
    pub properties: SimpleProperties,
    pub options: SimpleOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleSource {
    #[serde(default)]
    pub sheets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub trim: TrimRows,
}

/// Header and footer rows to remove from every sheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimRows {
    #[serde(default)]
    pub top: usize,
    #[serde(default)]
    pub bottom: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleProperties {
    #[serde(default)]
    pub purchase_id: PurchaseId,
    #[serde(default)]
    pub transaction_date: DateField,
    #[serde(default)]
    pub supplier_id: ValueField,
    #[serde(default)]
    pub member_id: ColumnField,
    #[serde(default)]
    pub distributor_name: DistributorField,
    #[serde(default)]
    pub purchase_amount: ColumnField,
    #[serde(default)]
    pub rebate_amount: RebateField,
    #[serde(default)]
    pub invoice_id: ColumnField,
    #[serde(default)]
    pub invoice_date: DateField,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseId {
    #[default]
    Counter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<ColumnIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<ColumnIndex>,
    /// Format tried before the common ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebateField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<ColumnIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributorField {
    Value {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Column {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<ColumnIndex>,
    },
}

impl Default for DistributorField {
    fn default() -> Self {
        DistributorField::Value { value: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleOptions {
    #[serde(default)]
    pub canadian_rebate: bool,
    #[serde(default)]
    pub remove_null_rebates: bool,
    /// JSON array of table operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_preprocessing: Option<String>,
    /// JSON array of table operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_postprocessing: Option<String>,
}

// =============================================================================
// Compilation
// =============================================================================

fn column(index: ColumnIndex) -> RowOperation {
    RowOperation::Column { index }
}

fn literal(value: impl Into<String>) -> RowOperation {
    RowOperation::Literal { value: value.into() }
}

fn coerce_date(parse: &Option<String>) -> RowOperation {
    RowOperation::Coerce(Coerce::Date {
        year: YearPolicy::Keep,
        parse: parse.iter().cloned().collect(),
        format: "M/D/YYYY".to_string(),
    })
}

fn coerce_usd() -> RowOperation {
    RowOperation::Coerce(Coerce::Usd { round: Rounding::Default })
}

fn reference(table: &str, match_field: &str, take: &str, group: &str) -> RowOperation {
    RowOperation::Reference {
        table: table.to_string(),
        match_field: match_field.to_string(),
        take: take.to_string(),
        group: group.to_string(),
    }
}

fn property(name: &str, definition: Vec<RowOperation>) -> Property {
    Property { name: name.to_string(), definition }
}

impl SimpleTransformer {
    fn extra_operations(&self, json: &Option<String>, what: &str) -> TransformerResult<Vec<TableOperation>> {
        match json.as_deref().map(str::trim) {
            None | Some("") => Ok(Vec::new()),
            Some(text) => serde_json::from_str(text).map_err(|e| TransformerError::Compile {
                name: self.name.clone(),
                message: format!("invalid {}: {}", what, e),
            }),
        }
    }

    fn canadian(&self) -> Option<ColumnIndex> {
        self.properties.rebate_amount.column.filter(|_| self.options.canadian_rebate)
    }

    fn preprocess(&self) -> TransformerResult<Vec<TableOperation>> {
        let mut operations = Vec::new();

        let TrimRows { top, bottom } = self.source.trim;
        if top > 0 || bottom > 0 {
            operations.push(TableOperation::Trim { top: Some(top), bottom: Some(bottom) });
        }

        operations.extend(self.extra_operations(&self.options.additional_preprocessing, "additional_preprocessing")?);

        if let Some(rebate) = self.canadian() {
            operations.push(TableOperation::Set {
                column: ColumnIndex(FILE_TOTAL_COLUMN),
                to: vec![
                    RowOperation::Meta { value: MetaKind::RowSource },
                    reference("deposit", "file", "amount", &self.group),
                ],
            });
            operations.push(TableOperation::Set {
                column: ColumnIndex(REBATE_TOTAL_COLUMN),
                to: vec![RowOperation::Sum { column: rebate }],
            });
        }

        Ok(operations)
    }

    fn properties(&self) -> Vec<Property> {
        let p = &self.properties;
        let group = &self.group;
        let mut properties = vec![property("purchaseId", vec![RowOperation::Counter])];

        if let Some(index) = p.transaction_date.column {
            properties.push(property("transactionDate", vec![column(index), coerce_date(&p.transaction_date.parse)]));
        }

        if let Some(value) = &p.supplier_id.value {
            properties.push(property("supplierId", vec![literal(value.clone())]));
        }

        if let Some(index) = p.member_id.column {
            properties.push(property(
                "memberId",
                vec![column(index), reference("customers", "customerName", "fuseId", group)],
            ));
        }

        match &p.distributor_name {
            DistributorField::Column { column: Some(index) } => properties.push(property(
                "distributorName",
                vec![column(*index), reference("distributors", "fuzzyName", "trueName", group)],
            )),
            DistributorField::Value { value: Some(value) } => {
                properties.push(property("distributorName", vec![literal(value.clone())]))
            }
            _ => {}
        }

        if let Some(index) = p.purchase_amount.column {
            properties.push(property("purchaseAmount", vec![column(index), coerce_usd()]));
        }

        if let Some(index) = p.rebate_amount.column {
            let multiplier = format_number(p.rebate_amount.multiplier.unwrap_or(1.0));
            let mut definition = vec![column(index)];
            if self.options.canadian_rebate {
                definition.push(RowOperation::Multiply { with: vec![column(ColumnIndex(FILE_TOTAL_COLUMN))] });
                definition.push(RowOperation::Divide { with: vec![column(ColumnIndex(REBATE_TOTAL_COLUMN))] });
            }
            definition.push(RowOperation::Multiply { with: vec![literal(multiplier)] });
            definition.push(coerce_usd());
            properties.push(property("rebateAmount", definition));
        }

        if let Some(index) = p.invoice_id.column {
            properties.push(property(
                "invoiceId",
                vec![
                    column(index),
                    RowOperation::Character { select: "1234567890".to_string(), action: Action::Keep },
                    RowOperation::Coerce(Coerce::Number { otherwise: Some("99999".to_string()) }),
                ],
            ));
        }

        if let Some(index) = p.invoice_date.column {
            // Invoice dates share the transaction date's format.
            properties.push(property("invoiceDate", vec![column(index), coerce_date(&p.transaction_date.parse)]));
        }

        properties
    }

    fn postprocess(&self) -> TransformerResult<Vec<TableOperation>> {
        let mut operations =
            self.extra_operations(&self.options.additional_postprocessing, "additional_postprocessing")?;

        if self.options.remove_null_rebates {
            operations.push(TableOperation::Select {
                column: ColumnIndex(REBATE_AMOUNT_COLUMN),
                is: vec!["0.00".to_string()],
                isnt: Vec::new(),
                action: Action::Drop,
            });
        }

        Ok(operations)
    }

    /// Compile into the normalized form.
    pub fn compile(&self) -> TransformerResult<AdvancedTransformer> {
        Ok(AdvancedTransformer {
            name: self.name.clone(),
            tags: vec![self.group.clone()],
            sources: vec![Source::Excel {
                group: self.group.clone(),
                file: self.source.file.clone().unwrap_or_else(|| "*".to_string()),
                sheets: self.source.sheets.clone(),
            }],
            requirements: Vec::new(),
            preprocess: self.preprocess()?,
            properties: self.properties(),
            postprocess: self.postprocess()?,
            destination: vec![Destination::Rebate { name: self.name.clone() }],
        })
    }
}
