//! Record shaping ahead of classification.
//!
//! - [`standardizer`] - raw headers onto the canonical schema
//! - [`cleaner`] - type coercion and required-field filtering

pub mod cleaner;
pub mod standardizer;

pub use cleaner::{clean, CleanReport, CleanedBatch, DropReason, DroppedRow};
pub use standardizer::{standardize, CanonicalTable, ColumnResolution};
