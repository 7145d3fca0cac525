//! # Rebater - declarative rebate transformation engine
//!
//! Rebater turns distributor spreadsheets into normalized rebate records.
//! Each transformer is a JSON definition: sources to read, table operations
//! to clean them, row operations extracting one property each, and
//! destinations to write.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Workbooks  │────▶│   Source    │────▶│  Table/Row  │────▶│ Destination │
//! │  (xlsx/csv) │     │ (calamine)  │     │     DSL     │     │ (rebate CSV)│
//! └─────────────┘     └─────────────┘     └──────┬──────┘     └─────────────┘
//!                                                │ unknown reference
//!                                                ▼
//!                                     ┌────────────────────┐
//!                                     │ Question / Answer  │◀── HTTP / CLI
//!                                     └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rebater::{Runner, Settings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Settings::from_file("rebater.toml").unwrap();
//!     let (runner, handle) = Runner::new(settings);
//!     runner.spawn();
//!     handle.start(None).unwrap();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`table`] - Table and row values, spreadsheet column letters
//! - [`dsl`] - Row and table operations
//! - [`parser`] - CSV decoding with auto-detection
//! - [`source`] / [`destination`] - Where tables come from and go to
//! - [`store`] - File-backed stores
//! - [`resolve`] - Questions, answers and suggestions
//! - [`transformer`] - Definitions, simple-form compiler, executor
//! - [`validation`] - JSON schema validation of definitions
//! - [`runner`] - Run orchestration and accuracy scoring
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod table;

// Settings
pub mod config;
pub mod context;
pub mod logging;

// Parsing and extraction
pub mod parser;
pub mod source;

// Evaluation
pub mod destination;
pub mod dsl;
pub mod resolve;
pub mod state;
pub mod stats;
pub mod store;
pub mod transformer;

// Validation
pub mod validation;

// Orchestration
pub mod runner;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, EvalError, RunError, ServerError, SourceError, StoreError, TableError, TransformerError,
};

// =============================================================================
// Re-exports - Model
// =============================================================================

pub use table::{index_to_letters, letters_to_index, ColumnIndex, Row, Table};

pub use dsl::{operations_description, Outcome, RowOperation, TableOperation};

pub use store::{FileBackedStore, Rebate, RebateFile, ReferenceTable, StoreItem};

pub use resolve::{Answer, Question, Record, Tracker};

// =============================================================================
// Re-exports - Transformers
// =============================================================================

pub use transformer::{
    load_transformer, parse_definition, AdvancedTransformer, SimpleTransformer, TransformerDefinition,
    TransformerFile,
};

pub use validation::{is_valid_transformer, validate_transformer};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, parse_bytes_auto, parse_csv_file_auto, CsvError,
    ParseResult,
};

// =============================================================================
// Re-exports - Running
// =============================================================================

pub use config::{Layout, Settings};
pub use context::{Context, Filter, Time};
pub use runner::{Command, RunEvent, RunStatus, Runner, RunnerHandle};
pub use state::State;
pub use stats::{Discrepancy, Issue, RunReport};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server};
}
