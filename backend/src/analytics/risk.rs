//! Risk classification against each customer's spending baseline.
//!
//! ```text
//! mean(customer) = sum(amount) / count          over the whole batch
//! unusual        = amount > mean(customer) * multiplier
//!
//!                 is_fraud = false    is_fraud = true
//! unusual = false Normal              Normal
//! unusual = true  Medium Risk         High Risk
//! ```
//!
//! The baseline includes the row being judged. Rows without a customer id
//! have no baseline and are never unusual.

use std::collections::HashMap;

use crate::error::SchemaError;
use crate::models::{ClassifiedTransaction, RiskLevel, Transaction, AMOUNT, CUSTOMER_ID};
use crate::processing::CleanedBatch;

/// Tier for one row given its two signals.
pub fn risk_level(unusual: bool, is_fraud: bool) -> RiskLevel {
    match (unusual, is_fraud) {
        (true, true) => RiskLevel::High,
        (true, false) => RiskLevel::Medium,
        _ => RiskLevel::Normal,
    }
}

/// Mean amount per customer over the given rows.
pub fn customer_means(transactions: &[Transaction]) -> HashMap<&str, f64> {
    let mut totals: HashMap<&str, (f64, usize)> = HashMap::new();
    for txn in transactions {
        if let Some(customer) = txn.customer_id.as_deref() {
            let entry = totals.entry(customer).or_insert((0.0, 0));
            entry.0 += txn.amount;
            entry.1 += 1;
        }
    }

    totals
        .into_iter()
        .map(|(customer, (sum, count))| (customer, sum / count as f64))
        .collect()
}

/// Tag every row of a cleaned batch with its risk tier.
///
/// Output order and length match the input. The batch itself is not modified.
pub fn classify(
    batch: &CleanedBatch,
    multiplier: f64,
) -> Result<Vec<ClassifiedTransaction>, SchemaError> {
    let missing: Vec<String> = [CUSTOMER_ID, AMOUNT]
        .into_iter()
        .filter(|col| !batch.has_column(col))
        .map(String::from)
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingForClassification(missing));
    }

    let means = customer_means(&batch.transactions);

    Ok(batch
        .transactions
        .iter()
        .map(|txn| {
            let unusual = txn
                .customer_id
                .as_deref()
                .and_then(|c| means.get(c))
                .map(|mean| txn.amount > mean * multiplier)
                .unwrap_or(false);

            ClassifiedTransaction {
                transaction: txn.clone(),
                risk_level: risk_level(unusual, txn.is_fraud),
            }
        })
        .collect())
}
