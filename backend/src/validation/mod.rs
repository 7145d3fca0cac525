//! JSON Schema validation for transformer definition files.
//!
//! Files are checked against the draft 7 schema embedded from
//! `schemas/transformer.json` before they are deserialized, so a malformed
//! file is reported with every problem at once instead of the first serde
//! error.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use rebater::validation::validate_transformer;
//!
//! let definition = json!({
//!     "type": "advanced",
//!     "name": "acme",
//!     "properties": [{ "name": "purchaseId", "definition": [{ "type": "counter" }] }]
//! });
//! assert!(validate_transformer(&definition).is_ok());
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

static TRANSFORMER_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/transformer.json")).expect("Invalid embedded schema")
});

/// Validate a JSON value against a schema.
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with every error otherwise
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick check: true/false only.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate a transformer definition (advanced or simple).
pub fn validate_transformer(data: &Value) -> Result<(), Vec<String>> {
    validate(&TRANSFORMER_SCHEMA, data)
}

pub fn is_valid_transformer(data: &Value) -> bool {
    is_valid(&TRANSFORMER_SCHEMA, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_advanced() {
        let definition = json!({
            "type": "advanced",
            "name": "acme",
            "sources": [{ "type": "excel", "group": "acme" }],
            "preprocess": [{ "type": "trim", "top": 1 }],
            "properties": [
                { "name": "purchaseId", "definition": [{ "type": "counter" }] },
                { "name": "memberId", "definition": [
                    { "type": "column", "index": "C" },
                    { "type": "reference", "table": "customers", "match": "customerName", "take": "fuseId", "group": "acme" }
                ] }
            ],
            "destination": [{ "type": "rebate", "name": "acme" }]
        });
        assert!(validate_transformer(&definition).is_ok());
    }

    #[test]
    fn test_valid_simple() {
        let definition = json!({
            "type": "simple",
            "name": "acme",
            "group": "acme",
            "source": { "sheets": [], "trim": { "top": 1, "bottom": 0 } },
            "properties": {
                "purchaseId": "counter",
                "transactionDate": { "column": 0 },
                "distributorName": { "type": "value", "value": "Acme" }
            },
            "options": { "canadian_rebate": false, "remove_null_rebates": true }
        });
        assert!(is_valid_transformer(&definition));
    }

    #[test]
    fn test_unknown_operation() {
        let definition = json!({
            "type": "advanced",
            "name": "acme",
            "properties": [{ "name": "x", "definition": [{ "type": "explode" }] }]
        });
        assert!(!is_valid_transformer(&definition));
    }

    #[test]
    fn test_missing_required_parameters() {
        let definition = json!({
            "type": "advanced",
            "name": "acme",
            "properties": [],
            "postprocess": [{ "type": "set", "column": 1 }]
        });
        let errors = validate_transformer(&definition).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_unknown_kind() {
        assert!(!is_valid_transformer(&json!({ "type": "xml", "name": "acme" })));
        assert!(!is_valid_transformer(&json!({ "type": "advanced" })));
    }
}
