//! Domain models for the Cardwatch pipeline.
//!
//! - [`Transaction`] - a cleaned canonical row
//! - [`RiskLevel`] - the three risk tiers
//! - [`ClassifiedTransaction`] - a transaction with its tier
//! - [`StoredTransaction`] - a persisted row with its ingestion tags

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Canonical Field Names
// =============================================================================

pub const TRANSACTION_ID: &str = "transaction_id";
pub const CUSTOMER_ID: &str = "customer_id";
pub const AMOUNT: &str = "amount";
pub const TRANSACTION_DATE: &str = "transaction_date";
pub const IS_FRAUD: &str = "is_fraud";
pub const CITY: &str = "city";
pub const STATE: &str = "state";
pub const CATEGORY: &str = "category";
pub const CHANNEL: &str = "channel";

/// Fields every standardized table must carry.
pub const REQUIRED_FIELDS: [&str; 3] = [TRANSACTION_ID, CUSTOMER_ID, AMOUNT];

/// Canonical fields with a dedicated slot on [`Transaction`].
/// Anything else the mapping declares lands in [`Transaction::extra`].
pub const KNOWN_FIELDS: [&str; 9] = [
    TRANSACTION_ID,
    CUSTOMER_ID,
    AMOUNT,
    TRANSACTION_DATE,
    IS_FRAUD,
    CITY,
    STATE,
    CATEGORY,
    CHANNEL,
];

// =============================================================================
// Risk Level
// =============================================================================

/// Risk tier assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "High Risk")]
    High,
}

impl RiskLevel {
    /// Display order used by every breakdown.
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Normal, RiskLevel::Medium, RiskLevel::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Normal => "Normal",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(RiskLevel::Normal),
            "medium risk" | "medium" => Ok(RiskLevel::Medium),
            "high risk" | "high" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level '{}'", other)),
        }
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// A canonical row after cleaning: required fields are typed and present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub customer_id: Option<String>,
    pub amount: f64,
    pub transaction_date: Option<NaiveDateTime>,
    pub is_fraud: bool,
    pub city: Option<String>,
    pub state: Option<String>,
    pub category: Option<String>,
    pub channel: Option<String>,
    /// Other canonical columns declared by the mapping, passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Transaction {
    /// Minimal transaction, mostly useful for tests and fixtures.
    pub fn new(transaction_id: impl Into<String>, customer_id: Option<&str>, amount: f64) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            customer_id: customer_id.map(String::from),
            amount,
            transaction_date: None,
            is_fraud: false,
            city: None,
            state: None,
            category: None,
            channel: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_fraud(mut self, is_fraud: bool) -> Self {
        self.is_fraud = is_fraud;
        self
    }
}

/// A transaction tagged with its risk tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub risk_level: RiskLevel,
}

/// A row read back from the persisted table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransaction {
    #[serde(flatten)]
    pub record: ClassifiedTransaction,
    pub source_file: String,
    pub batch_id: String,
    pub row_index: i64,
    pub ingested_at: DateTime<Utc>,
}

impl StoredTransaction {
    pub fn transaction(&self) -> &Transaction {
        &self.record.transaction
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.record.risk_level
    }
}
