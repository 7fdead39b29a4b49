//! Row cleaning: type coercion and required-field filtering.
//!
//! - `transaction_date` → date/time, unparseable becomes missing
//! - `amount` → finite number, unparseable becomes missing
//! - `is_fraud` → bool, defaults to `false` when the column is absent
//! - rows missing `transaction_id` or `amount` are dropped
//!
//! Dropped rows are reported in [`CleanReport`] for logging; the surviving
//! rows are never altered by that report.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

use super::standardizer::CanonicalTable;
use crate::models::{
    Transaction, AMOUNT, CATEGORY, CHANNEL, CITY, CUSTOMER_ID, IS_FRAUD, KNOWN_FIELDS, STATE,
    TRANSACTION_DATE, TRANSACTION_ID,
};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%d-%m-%Y"];

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingTransactionId,
    MissingAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedRow {
    /// Zero-based index in the canonical table.
    pub row: usize,
    pub reason: DropReason,
}

/// Side channel describing what cleaning removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub input_rows: usize,
    pub dropped: Vec<DroppedRow>,
}

impl CleanReport {
    pub fn kept(&self) -> usize {
        self.input_rows - self.dropped.len()
    }
}

/// Cleaned rows plus the schema they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedBatch {
    /// Canonical columns present; always includes `is_fraud`.
    pub columns: Vec<String>,
    pub transactions: Vec<Transaction>,
    pub report: CleanReport,
}

impl CleanedBatch {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// Coerce types and drop rows lacking `transaction_id` or `amount`.
pub fn clean(table: &CanonicalTable) -> CleanedBatch {
    let idx = |name: &str| table.column_index(name);
    let txn_idx = idx(TRANSACTION_ID);
    let amount_idx = idx(AMOUNT);
    let customer_idx = idx(CUSTOMER_ID);
    let date_idx = idx(TRANSACTION_DATE);
    let fraud_idx = idx(IS_FRAUD);
    let city_idx = idx(CITY);
    let state_idx = idx(STATE);
    let category_idx = idx(CATEGORY);
    let channel_idx = idx(CHANNEL);

    let extra_columns: Vec<(usize, &str)> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !KNOWN_FIELDS.contains(&name.as_str()))
        .map(|(i, name)| (i, name.as_str()))
        .collect();

    let mut report = CleanReport {
        input_rows: table.len(),
        dropped: Vec::new(),
    };
    let mut transactions = Vec::with_capacity(table.len());

    for (row_idx, row) in table.rows.iter().enumerate() {
        let cell = |i: Option<usize>| i.and_then(|i| row.get(i)).map(String::as_str);
        // non-blank values pass through untouched, padding included
        let text = |i: Option<usize>| cell(i).filter(|s| !s.trim().is_empty()).map(String::from);

        let Some(transaction_id) = text(txn_idx) else {
            report.dropped.push(DroppedRow {
                row: row_idx,
                reason: DropReason::MissingTransactionId,
            });
            continue;
        };
        let Some(amount) = cell(amount_idx).and_then(parse_amount) else {
            report.dropped.push(DroppedRow {
                row: row_idx,
                reason: DropReason::MissingAmount,
            });
            continue;
        };

        let extra: BTreeMap<String, String> = extra_columns
            .iter()
            .filter_map(|(i, name)| text(Some(*i)).map(|v| (name.to_string(), v)))
            .collect();

        transactions.push(Transaction {
            transaction_id,
            customer_id: text(customer_idx),
            amount,
            transaction_date: cell(date_idx).and_then(parse_datetime),
            is_fraud: cell(fraud_idx).map(parse_fraud_flag).unwrap_or(false),
            city: text(city_idx),
            state: text(state_idx),
            category: text(category_idx),
            channel: text(channel_idx),
            extra,
        });
    }

    let mut columns = table.columns.clone();
    if fraud_idx.is_none() {
        columns.push(IS_FRAUD.to_string());
    }

    CleanedBatch {
        columns,
        transactions,
        report,
    }
}

/// Parse a numeric amount; anything non-finite or non-numeric is missing.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a date or date-time; date-only values land at midnight.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Truthy fraud markers: `1`, `1.0`, `true`, `yes`, `y`.
pub fn parse_fraud_flag(raw: &str) -> bool {
    let value = raw.trim().to_lowercase();
    match value.as_str() {
        "true" | "yes" | "y" => true,
        other => other.parse::<f64>().map(|v| v == 1.0).unwrap_or(false),
    }
}
