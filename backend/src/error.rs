//! Error types for the Cardwatch ingestion pipeline.
//!
//! One enum per layer, folded into [`PipelineError`] at the top:
//!
//! - [`UnsupportedFormatError`] - file extension not recognized
//! - [`ParseError`] - CSV / spreadsheet reading errors
//! - [`SchemaError`] - required canonical columns missing
//! - [`ConfigurationError`] - mapping, rule or connection configuration problems
//! - [`PersistenceError`] - relational sink failures
//! - [`PipelineError`] - top-level orchestration errors
//! - [`ServerError`] - HTTP surface errors
//!
//! `From` implementations let `?` cross layer boundaries.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Input Format Errors
// =============================================================================

/// The input file extension is not one of the supported tabular formats.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unsupported file format '{extension}' (expected .csv, .txt, .xlsx, .xlsm, .xls or .ods)")]
pub struct UnsupportedFormatError {
    /// Lowercased extension, empty when the name had none.
    pub extension: String,
}

// =============================================================================
// Parsing Errors
// =============================================================================

/// Errors while turning file bytes into a raw table.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited text could not be parsed.
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook could not be opened or read.
    #[error("Invalid spreadsheet: {0}")]
    Spreadsheet(String),

    /// Delimiter must be a single ASCII character.
    #[error("Invalid delimiter {0:?}: must be a single ASCII character")]
    InvalidDelimiter(char),

    /// Empty file.
    #[error("Input file is empty")]
    EmptyFile,

    /// No headers found.
    #[error("No header row found")]
    NoHeaders,
}

/// Errors from loading a file: either the format is unknown or its content is unreadable.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedFormatError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

// =============================================================================
// Schema Errors
// =============================================================================

/// A required canonical column is absent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Header mapping left mandatory fields unmatched.
    #[error(
        "Missing required columns after standardization: {0:?}. \
         Check the [columns] mapping or the uploaded file headers."
    )]
    MissingAfterStandardization(Vec<String>),

    /// The classifier was handed a batch without the fields it groups on.
    #[error("Risk classification requires columns {0:?}")]
    MissingForClassification(Vec<String>),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Configuration missing, unreadable or invalid.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Config file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Config file could not be read.
    #[error("Cannot read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or shape error.
    #[error("Malformed configuration: {0}")]
    Malformed(#[from] toml::de::Error),

    /// Config could not be rendered back to TOML.
    #[error("Cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is present but unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Persistence Errors
// =============================================================================

/// Failures talking to the relational sink.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Driver, connection or statement failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row could not be mapped back into a transaction.
    #[error("Corrupt stored row: {0}")]
    CorruptRow(String),

    /// Pass-through attributes could not be encoded.
    #[error("Cannot encode extra attributes: {0}")]
    Encode(#[from] serde_json::Error),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level ingestion errors.
///
/// This is the error returned by [`crate::pipeline::ingest_file`] and friends.
/// Every stage failure is fatal: the first one aborts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    UnsupportedFormat(#[from] UnsupportedFormatError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<LoadError> for PipelineError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Unsupported(e) => PipelineError::UnsupportedFormat(e),
            LoadError::Parse(e) => PipelineError::Parse(e),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Persistence(err.into())
    }
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Request body above `server.max_upload_mb`.
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<PersistenceError> for ServerError {
    fn from(err: PersistenceError) -> Self {
        ServerError::Pipeline(err.into())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Result type for persistence operations.
pub type StoreResult<T> = Result<T, PersistenceError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
