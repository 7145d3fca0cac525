//! Error types for the rebate transformation pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`TableError`] - Structural table errors (ragged transpose, bad column index)
//! - [`EvalError`] - Fatal DSL evaluation errors
//! - [`SourceError`] - Spreadsheet and CSV extraction errors
//! - [`StoreError`] - File-backed store errors
//! - [`TransformerError`] - Transformer definition errors
//! - [`ConfigError`] - Settings errors
//! - [`RunError`] - Top-level run orchestration errors
//! - [`ServerError`] - HTTP server errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::parser::CsvError;

// =============================================================================
// Table Errors
// =============================================================================

/// Errors raised by structural table operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// Transpose requires every row to have the same width.
    #[error("Cannot transpose table: row {row} has {found} cells, expected {expected}")]
    Ragged { row: usize, found: usize, expected: usize },

    /// Spreadsheet column letters could not be decoded.
    #[error("Invalid column index '{0}'")]
    InvalidColumn(String),
}

// =============================================================================
// Evaluation Errors
// =============================================================================

/// Errors raised while evaluating row or table operations.
///
/// Only [`EvalError::is_fatal`] errors abort a run; the rest fail the
/// running transformer. Soft outcomes (a dropped row, a pending question)
/// are not errors; see [`crate::dsl::Outcome`].
#[derive(Debug, Error)]
pub enum EvalError {
    /// A `column` operation pointed past the end of the row.
    #[error("There is no data in column '{0}'.")]
    MissingColumn(usize),

    /// An arithmetic operand was not a number.
    #[error("Value '{value}' is not a number ({operation}).")]
    NotANumber { operation: &'static str, value: String },

    /// A column sum hit a non-numeric cell.
    #[error("Cannot add value '{0}' to sum; it is not a number!")]
    BadSum(String),

    /// No date format matched.
    #[error("Date '{0}' is in an unknown format.")]
    UnknownDate(String),

    /// A utility lookup found nothing.
    #[error("Table '{table}' has no '{field}' for '{value}'.")]
    UtilityMiss { table: String, field: String, value: String },

    /// A `replace` substring was not a valid regex.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A debug table could not be written.
    #[error("Cannot write debug table: {0}")]
    Debug(String),

    /// A destination row does not form a rebate.
    #[error("Row {row} is not a valid rebate: {message}")]
    InvalidRebate { row: usize, message: String },

    /// Structural table error.
    #[error(transparent)]
    Table(#[from] TableError),
}

impl EvalError {
    /// Whether the error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::UnknownDate(_) | EvalError::UtilityMiss { .. } | EvalError::Table(_))
    }
}

// =============================================================================
// Source Errors
// =============================================================================

/// Errors while reading source files.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to read a file or directory.
    #[error("Failed to read source: {0}")]
    Io(#[from] std::io::Error),

    /// Workbook could not be opened or a sheet could not be read.
    #[error("Cannot read workbook '{file}': {message}")]
    Workbook { file: String, message: String },

    /// A CSV source failed to parse.
    #[error("Cannot read CSV source: {0}")]
    Csv(#[from] CsvError),

    /// A sheet or file pattern is not a valid regex.
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the file-backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Two items claim the same identity.
    #[error("Duplicate item '{hash}' ({path})")]
    Duplicate { hash: String, path: String },

    /// Item could not be decoded.
    #[error("Invalid item '{path}': {message}")]
    Invalid { path: String, message: String },

    /// IO error.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV error.
    #[error("Store CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON error.
    #[error("Store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Transformer Errors
// =============================================================================

/// Errors while loading or compiling a transformer definition.
#[derive(Debug, Error)]
pub enum TransformerError {
    /// Schema validation failed.
    #[error("Validation failed: {}", errors.join("; "))]
    Schema { errors: Vec<String> },

    /// JSON error.
    #[error("Invalid transformer JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Simple-form compilation failed.
    #[error("Cannot compile '{name}': {message}")]
    Compile { name: String, message: String },
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error.
    #[error("Cannot read settings: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax or shape error.
    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value.
    #[error("Invalid setting '{field}': {message}")]
    Invalid { field: String, message: String },
}

// =============================================================================
// Run Errors (top-level)
// =============================================================================

/// Errors that abort a run.
///
/// Every variant ends up in [`crate::runner::RunStatus::Error`].
#[derive(Debug, Error)]
pub enum RunError {
    /// Two selected transformers share a name.
    #[error("Duplicate transformer '{0}'.")]
    DuplicateTransformer(String),

    /// A requirement names a transformer outside the selected set.
    #[error("Transformer '{transformer}' requires '{requirement}', which is not available.")]
    MissingDependency { transformer: String, requirement: String },

    /// Requirements form a cycle.
    #[error("Transformer '{0}' is part of a requirement cycle.")]
    Cycle(String),

    /// A transformer hit a fatal evaluation error.
    #[error("{name}: {source}")]
    Transformer {
        name: String,
        #[source]
        source: EvalError,
    },

    /// Store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Source failure.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Settings failure.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The runner worker has shut down.
    #[error("Runner is not available")]
    RunnerGone,

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// IO error while binding or serving.
    #[error("Server IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Result type for DSL evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Result type for source extraction.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for transformer loading.
pub type TransformerResult<T> = Result<T, TransformerError>;

/// Result type for settings.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for runs.
pub type RunResult<T> = Result<T, RunError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
