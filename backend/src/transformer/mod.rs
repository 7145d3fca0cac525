//! Transformer definitions.
//!
//! A transformer is the unit of work of a run:
//!
//! ```text
//! sources ──▶ preprocess (per table) ──▶ stack ──▶ properties (per row)
//!                                                     │
//!                        destination ◀── postprocess ◀┘ (header prepended)
//! ```
//!
//! Only [`AdvancedTransformer`] is ever executed. The simple authoring form
//! ([`SimpleTransformer`]) compiles into it on load.

pub mod executor;
pub mod file;
pub mod simple;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::destination::Destination;
use crate::dsl::{RowOperation, TableOperation};
use crate::error::{TransformerError, TransformerResult};
use crate::source::Source;
use crate::validation::validate_transformer;

pub use executor::{execute, Run};
pub use file::TransformerFile;
pub use simple::SimpleTransformer;

/// A named row chain producing one output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub definition: Vec<RowOperation>,
}

/// The normalized transformer shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedTransformer {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Names of transformers that must run first.
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub preprocess: Vec<TableOperation>,
    pub properties: Vec<Property>,
    #[serde(default)]
    pub postprocess: Vec<TableOperation>,
    #[serde(default)]
    pub destination: Vec<Destination>,
}

/// A definition file's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformerDefinition {
    Advanced(AdvancedTransformer),
    Simple(SimpleTransformer),
}

impl TransformerDefinition {
    pub fn name(&self) -> &str {
        match self {
            TransformerDefinition::Advanced(t) => &t.name,
            TransformerDefinition::Simple(t) => &t.name,
        }
    }

    /// Normalize into the executable form.
    pub fn compile(&self) -> TransformerResult<AdvancedTransformer> {
        match self {
            TransformerDefinition::Advanced(t) => Ok(t.clone()),
            TransformerDefinition::Simple(t) => t.compile(),
        }
    }
}

/// Validate then deserialize a definition.
pub fn parse_definition(text: &str) -> TransformerResult<TransformerDefinition> {
    let value: Value = serde_json::from_str(text)?;
    validate_transformer(&value).map_err(|errors| TransformerError::Schema { errors })?;
    Ok(serde_json::from_value(value)?)
}

/// Parse and compile a definition in one step.
pub fn load_transformer(text: &str) -> TransformerResult<AdvancedTransformer> {
    parse_definition(text)?.compile()
}

impl AdvancedTransformer {
    /// JSON of the normalized form, tagged `"type": "advanced"`.
    pub fn to_json(&self) -> TransformerResult<String> {
        Ok(serde_json::to_string_pretty(&TransformerDefinition::Advanced(self.clone()))?)
    }
}
