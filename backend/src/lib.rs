//! # Cardwatch - card transaction ingestion and risk tiering
//!
//! Cardwatch reads transaction exports with arbitrary headers (CSV or
//! spreadsheet), maps them onto one canonical schema, drops unusable rows,
//! tags each row Normal / Medium Risk / High Risk against the customer's
//! spending baseline, and appends the result to a relational table the
//! dashboard reads.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ CSV / XLSX  │──▶│   Parser    │──▶│ Standardize │──▶│   Clean +   │──▶│    Store    │
//! │ (any header)│   │ (auto-enc)  │   │  (mapping)  │   │  Classify   │   │ (append)    │
//! └─────────────┘   └─────────────┘   └─────────────┘   └─────────────┘   └─────────────┘
//!                                                                               │
//!                                                                   dashboard ◀─┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cardwatch::{ingest_file, AppConfig};
//!
//! let config = AppConfig::load_default(None)?;
//! let report = ingest_file("transactions.csv", &config)?;
//! println!("{} rows classified", report.transactions.len());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Transactions and risk levels
//! - [`config`] - Column mapping, risk rules, database settings
//! - [`parser`] - CSV / spreadsheet loading with auto-detection
//! - [`processing`] - Column standardization and row cleaning
//! - [`analytics`] - Risk classification
//! - [`pipeline`] - End-to-end ingestion
//! - [`store`] - Append-only persistence
//! - [`dashboard`] - Filters, metrics and exports over stored rows
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Ingestion
pub mod analytics;
pub mod parser;
pub mod pipeline;
pub mod processing;

// Persistence and read side
pub mod dashboard;
pub mod store;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{
    ConfigurationError, LoadError, ParseError, PersistenceError, PipelineError, SchemaError,
    ServerError, UnsupportedFormatError,
};

pub use models::{ClassifiedTransaction, RiskLevel, StoredTransaction, Transaction};

pub use config::{AppConfig, ColumnMapping, DatabaseConfig, RiskRules, ServerConfig};

pub use parser::{load_bytes, load_file, FileFormat, RawTable};

pub use processing::{clean, standardize, CanonicalTable, CleanReport, CleanedBatch};

pub use analytics::classify;

pub use pipeline::{
    ingest_and_store, ingest_bytes, ingest_file, ingest_table, store_report, IngestReport,
    SourceInfo,
};

pub use store::{AppendReceipt, TransactionStore};

pub use dashboard::{DashboardSummary, Filter, FilterOptions, Metrics};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
