//! Column standardization: arbitrary headers onto the canonical schema.
//!
//! ```text
//! Raw headers               Mapping                     Canonical columns
//! ┌──────────────┐          transaction_id: [txn_id]    ┌────────────────┐
//! │ "Txn_ID "    │ ──────▶  customer_id:    [cust_id]   │ transaction_id │
//! │ "cust_id"    │          amount:         [amount]    │ customer_id    │
//! │ "Amount"     │          city:           [city]      │ amount         │
//! └──────────────┘                                      └────────────────┘
//! ```
//!
//! Header names and variants are compared lowercased and trimmed. For each
//! canonical field (mapping order) the first raw column (file order) whose
//! normalized name is a variant wins; unmatched fields stay absent.

use serde::Serialize;
use std::collections::HashSet;

use crate::config::ColumnMapping;
use crate::error::SchemaError;
use crate::models::REQUIRED_FIELDS;
use crate::parser::RawTable;

/// Which raw header fed a canonical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnResolution {
    pub canonical: String,
    pub source: String,
}

/// A record set conforming to the canonical schema (values still untyped text).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTable {
    /// Canonical columns present, in mapping order.
    pub columns: Vec<String>,
    /// Source header of each entry in `columns`.
    pub resolved: Vec<ColumnResolution>,
    /// Rows aligned with `columns`.
    pub rows: Vec<Vec<String>>,
}

impl CanonicalTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Normalize a header or variant for comparison.
pub fn normalize_header(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Map raw columns onto canonical fields.
///
/// Fails with [`SchemaError::MissingAfterStandardization`] when any of
/// `transaction_id`, `customer_id` or `amount` has no matching raw column.
pub fn standardize(raw: &RawTable, mapping: &ColumnMapping) -> Result<CanonicalTable, SchemaError> {
    let normalized: Vec<String> = raw.headers.iter().map(|h| normalize_header(h)).collect();

    // (canonical name, raw column index)
    let mut picks: Vec<(&str, usize)> = Vec::new();
    for field in mapping.fields() {
        let variants: HashSet<String> = field.variants.iter().map(|v| normalize_header(v)).collect();
        if let Some(idx) = normalized.iter().position(|h| variants.contains(h)) {
            picks.push((field.canonical.as_str(), idx));
        }
    }

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|req| !picks.iter().any(|(name, _)| name == *req))
        .map(|req| req.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingAfterStandardization(missing));
    }

    let columns = picks.iter().map(|(name, _)| name.to_string()).collect();
    let resolved = picks
        .iter()
        .map(|(name, idx)| ColumnResolution {
            canonical: name.to_string(),
            source: raw.headers[*idx].clone(),
        })
        .collect();
    let rows = raw
        .rows
        .iter()
        .map(|row| {
            picks
                .iter()
                .map(|(_, idx)| row.get(*idx).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(CanonicalTable {
        columns,
        resolved,
        rows,
    })
}
