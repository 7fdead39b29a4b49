//! Read-side queries over persisted transactions.
//!
//! Everything here takes the rows explicitly and only counts, sums and
//! filters; risk tiers are read as stored, never recomputed.

use chrono::{Datelike, NaiveDate};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{RiskLevel, StoredTransaction};

// =============================================================================
// Filtering
// =============================================================================

/// Row selection; every set field must match (AND).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub customer: Option<String>,
    pub risk: Option<RiskLevel>,
    pub channel: Option<String>,
    pub city: Option<String>,
    /// Inclusive lower bound on the transaction date.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on the transaction date.
    pub to: Option<NaiveDate>,
    /// Case-insensitive pattern over customer, city and channel.
    pub search: Option<String>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        *self == Filter::default()
    }

    /// Rows matching every selector, in input order.
    pub fn apply(&self, rows: &[StoredTransaction]) -> Vec<StoredTransaction> {
        let search = self.search_pattern();
        rows.iter()
            .filter(|row| self.matches(row, search.as_ref()))
            .cloned()
            .collect()
    }

    fn search_pattern(&self) -> Option<Regex> {
        let text = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        // a term that is not a valid regex is searched literally
        RegexBuilder::new(text)
            .case_insensitive(true)
            .build()
            .or_else(|_| {
                RegexBuilder::new(&regex::escape(text))
                    .case_insensitive(true)
                    .build()
            })
            .ok()
    }

    fn matches(&self, row: &StoredTransaction, search: Option<&Regex>) -> bool {
        let txn = row.transaction();

        if !selected(&self.customer, &txn.customer_id)
            || !selected(&self.channel, &txn.channel)
            || !selected(&self.city, &txn.city)
        {
            return false;
        }
        if let Some(risk) = self.risk {
            if row.risk_level() != risk {
                return false;
            }
        }

        if self.from.is_some() || self.to.is_some() {
            let Some(date) = txn.transaction_date.map(|d| d.date()) else {
                return false;
            };
            if self.from.is_some_and(|from| date < from) || self.to.is_some_and(|to| date > to) {
                return false;
            }
        }

        match search {
            Some(re) => [&txn.customer_id, &txn.city, &txn.channel]
                .into_iter()
                .flatten()
                .any(|value| re.is_match(value)),
            None => true,
        }
    }
}

fn selected(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match wanted.as_deref().filter(|w| !w.is_empty()) {
        Some(wanted) => actual.as_deref() == Some(wanted),
        None => true,
    }
}

/// Distinct values offered by each selector, sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub customers: Vec<String>,
    pub risk_levels: Vec<RiskLevel>,
    pub channels: Vec<String>,
    pub cities: Vec<String>,
}

impl FilterOptions {
    pub fn from_rows(rows: &[StoredTransaction]) -> Self {
        let mut customers = BTreeSet::new();
        let mut risk_levels = BTreeSet::new();
        let mut channels = BTreeSet::new();
        let mut cities = BTreeSet::new();

        for row in rows {
            let txn = row.transaction();
            customers.extend(txn.customer_id.iter().cloned());
            channels.extend(txn.channel.iter().cloned());
            cities.extend(txn.city.iter().cloned());
            risk_levels.insert(row.risk_level());
        }

        Self {
            customers: customers.into_iter().collect(),
            risk_levels: risk_levels.into_iter().collect(),
            channels: channels.into_iter().collect(),
            cities: cities.into_iter().collect(),
        }
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Headline numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub total_transactions: usize,
    pub normal: usize,
    pub medium_risk: usize,
    pub high_risk: usize,
    pub total_amount: f64,
}

impl Metrics {
    pub fn from_rows(rows: &[StoredTransaction]) -> Self {
        let mut metrics = Metrics {
            total_transactions: rows.len(),
            ..Metrics::default()
        };
        for row in rows {
            metrics.total_amount += row.transaction().amount;
            match row.risk_level() {
                RiskLevel::Normal => metrics.normal += 1,
                RiskLevel::Medium => metrics.medium_risk += 1,
                RiskLevel::High => metrics.high_risk += 1,
            }
        }
        metrics
    }
}

/// A labelled count, as charted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Count<K> {
    pub key: K,
    pub count: usize,
}

/// Counts per tier, always Normal, Medium Risk, High Risk.
pub fn risk_distribution(rows: &[StoredTransaction]) -> Vec<Count<RiskLevel>> {
    RiskLevel::ALL
        .iter()
        .map(|level| Count {
            key: *level,
            count: rows.iter().filter(|r| r.risk_level() == *level).count(),
        })
        .collect()
}

/// Counts per transaction year, ascending; undated rows are left out.
pub fn by_year(rows: &[StoredTransaction]) -> Vec<Count<i32>> {
    let mut years: BTreeMap<i32, usize> = BTreeMap::new();
    for date in rows.iter().filter_map(|r| r.transaction().transaction_date) {
        *years.entry(date.year()).or_default() += 1;
    }
    years
        .into_iter()
        .map(|(key, count)| Count { key, count })
        .collect()
}

/// The `n` busiest cities, most transactions first, ties by name.
pub fn top_cities(rows: &[StoredTransaction], n: usize) -> Vec<Count<String>> {
    let mut cities = count_by(rows.iter().filter_map(|r| r.transaction().city.clone()));
    cities.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    cities.truncate(n);
    cities
}

/// Counts per channel, by name.
pub fn by_channel(rows: &[StoredTransaction]) -> Vec<Count<String>> {
    count_by(rows.iter().filter_map(|r| r.transaction().channel.clone()))
}

fn count_by(keys: impl Iterator<Item = String>) -> Vec<Count<String>> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| Count { key, count })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerAmount {
    pub customer_id: String,
    pub amount: f64,
}

/// Amount spent per customer, by customer id.
pub fn amount_by_customer(rows: &[StoredTransaction]) -> Vec<CustomerAmount> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for row in rows {
        if let Some(customer) = row.transaction().customer_id.as_deref() {
            *totals.entry(customer).or_default() += row.transaction().amount;
        }
    }
    totals
        .into_iter()
        .map(|(customer, amount)| CustomerAmount {
            customer_id: customer.to_string(),
            amount,
        })
        .collect()
}

/// The first `n` rows (the store returns newest first).
pub fn recent(rows: &[StoredTransaction], n: usize) -> Vec<StoredTransaction> {
    rows.iter().take(n).cloned().collect()
}

/// Everything the summary view shows.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub options: FilterOptions,
    pub metrics: Metrics,
    pub risk_distribution: Vec<Count<RiskLevel>>,
    pub by_year: Vec<Count<i32>>,
    pub top_cities: Vec<Count<String>>,
    pub by_channel: Vec<Count<String>>,
    pub amount_by_customer: Vec<CustomerAmount>,
}

impl DashboardSummary {
    pub const TOP_CITIES: usize = 10;

    /// Options come from the rows matching the search term alone, so a
    /// selector never hides its own alternatives; everything else comes from
    /// the fully filtered rows.
    pub fn build(all: &[StoredTransaction], filter: &Filter) -> Self {
        let searched = Filter {
            search: filter.search.clone(),
            ..Filter::default()
        }
        .apply(all);
        let rows = filter.apply(&searched);
        Self {
            options: FilterOptions::from_rows(&searched),
            metrics: Metrics::from_rows(&rows),
            risk_distribution: risk_distribution(&rows),
            by_year: by_year(&rows),
            top_cities: top_cities(&rows, Self::TOP_CITIES),
            by_channel: by_channel(&rows),
            amount_by_customer: amount_by_customer(&rows),
        }
    }
}

// =============================================================================
// Export
// =============================================================================

const EXPORT_HEADERS: [&str; 15] = [
    "transaction_id",
    "customer_id",
    "transaction_date",
    "amount",
    "city",
    "state",
    "category",
    "channel",
    "is_fraud",
    "risk_level",
    "source_file",
    "batch_id",
    "row_index",
    "ingested_at",
    "extra",
];

/// Rows as CSV bytes with a header row.
pub fn to_csv(rows: &[StoredTransaction]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADERS)?;

    for row in rows {
        let txn = row.transaction();
        let extra = if txn.extra.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&txn.extra).unwrap_or_default()
        };
        writer.write_record([
            txn.transaction_id.clone(),
            txn.customer_id.clone().unwrap_or_default(),
            txn.transaction_date
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            txn.amount.to_string(),
            txn.city.clone().unwrap_or_default(),
            txn.state.clone().unwrap_or_default(),
            txn.category.clone().unwrap_or_default(),
            txn.channel.clone().unwrap_or_default(),
            u8::from(txn.is_fraud).to_string(),
            row.risk_level().to_string(),
            row.source_file.clone(),
            row.batch_id.clone(),
            row.row_index.to_string(),
            row.ingested_at.to_rfc3339(),
            extra,
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedTransaction, Transaction};
    use chrono::{TimeZone, Utc};

    fn row(id: &str, customer: &str, amount: f64, risk: RiskLevel) -> StoredTransaction {
        StoredTransaction {
            record: ClassifiedTransaction {
                transaction: Transaction::new(id, Some(customer), amount),
                risk_level: risk,
            },
            source_file: "a.csv".into(),
            batch_id: "b1".into(),
            row_index: 0,
            ingested_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn located(mut r: StoredTransaction, city: &str, channel: &str, date: Option<(i32, u32, u32)>) -> StoredTransaction {
        let txn = &mut r.record.transaction;
        txn.city = Some(city.into());
        txn.channel = Some(channel.into());
        txn.transaction_date = date
            .and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
            .and_then(|d| d.and_hms_opt(9, 30, 0));
        r
    }

    fn sample() -> Vec<StoredTransaction> {
        vec![
            located(row("T1", "C1", 100.0, RiskLevel::Normal), "Mumbai", "POS", Some((2023, 3, 1))),
            located(row("T2", "C1", 900.0, RiskLevel::High), "Mumbai", "Online", Some((2024, 1, 15))),
            located(row("T3", "C2", 50.0, RiskLevel::Normal), "Delhi", "ATM", Some((2024, 2, 10))),
            located(row("T4", "C3", 700.0, RiskLevel::Medium), "Pune", "Online", None),
        ]
    }

    fn ids(rows: &[StoredTransaction]) -> Vec<&str> {
        rows.iter().map(|r| r.transaction().transaction_id.as_str()).collect()
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let rows = sample();
        assert!(Filter::default().is_empty());
        assert_eq!(Filter::default().apply(&rows), rows);
    }

    #[test]
    fn test_selectors_compose() {
        let rows = sample();
        let filter = Filter {
            customer: Some("C1".into()),
            channel: Some("Online".into()),
            ..Filter::default()
        };
        assert_eq!(ids(&filter.apply(&rows)), vec!["T2"]);

        let filter = Filter {
            risk: Some(RiskLevel::Normal),
            city: Some("Delhi".into()),
            ..Filter::default()
        };
        assert_eq!(ids(&filter.apply(&rows)), vec!["T3"]);
    }

    #[test]
    fn test_date_range_inclusive() {
        let rows = sample();
        let filter = Filter {
            from: NaiveDate::from_ymd_opt(2024, 1, 15),
            to: NaiveDate::from_ymd_opt(2024, 2, 10),
            ..Filter::default()
        };
        assert_eq!(ids(&filter.apply(&rows)), vec!["T2", "T3"]);
    }

    #[test]
    fn test_search_case_insensitive() {
        let rows = sample();
        let filter = Filter {
            search: Some("mum".into()),
            ..Filter::default()
        };
        assert_eq!(ids(&filter.apply(&rows)), vec!["T1", "T2"]);

        let filter = Filter {
            search: Some("^(atm|pos)$".into()),
            ..Filter::default()
        };
        assert_eq!(ids(&filter.apply(&rows)), vec!["T1", "T3"]);
    }

    #[test]
    fn test_invalid_pattern_searched_literally() {
        let mut rows = sample();
        rows[3].record.transaction.city = Some("Pune (West".into());
        let filter = Filter {
            search: Some("(west".into()),
            ..Filter::default()
        };
        assert_eq!(ids(&filter.apply(&rows)), vec!["T4"]);
    }

    #[test]
    fn test_filter_never_changes_risk() {
        let rows = sample();
        let filtered = Filter {
            search: Some("c".into()),
            ..Filter::default()
        }
        .apply(&rows);
        for r in &filtered {
            let original = rows
                .iter()
                .find(|o| o.transaction().transaction_id == r.transaction().transaction_id)
                .unwrap();
            assert_eq!(r.risk_level(), original.risk_level());
        }
    }

    #[test]
    fn test_filter_options_sorted_distinct() {
        let options = FilterOptions::from_rows(&sample());
        assert_eq!(options.customers, vec!["C1", "C2", "C3"]);
        assert_eq!(options.channels, vec!["ATM", "Online", "POS"]);
        assert_eq!(options.cities, vec!["Delhi", "Mumbai", "Pune"]);
        assert_eq!(
            options.risk_levels,
            vec![RiskLevel::Normal, RiskLevel::Medium, RiskLevel::High]
        );
    }

    #[test]
    fn test_metrics() {
        let metrics = Metrics::from_rows(&sample());
        assert_eq!(metrics.total_transactions, 4);
        assert_eq!(metrics.normal, 2);
        assert_eq!(metrics.medium_risk, 1);
        assert_eq!(metrics.high_risk, 1);
        assert_eq!(metrics.total_amount, 1750.0);
    }

    #[test]
    fn test_breakdowns() {
        let rows = sample();

        let risk: Vec<usize> = risk_distribution(&rows).iter().map(|c| c.count).collect();
        assert_eq!(risk, vec![2, 1, 1]);

        let years: Vec<(i32, usize)> = by_year(&rows).iter().map(|c| (c.key, c.count)).collect();
        assert_eq!(years, vec![(2023, 1), (2024, 2)]);

        let cities: Vec<(String, usize)> = top_cities(&rows, 2)
            .into_iter()
            .map(|c| (c.key, c.count))
            .collect();
        assert_eq!(cities, vec![("Mumbai".to_string(), 2), ("Delhi".to_string(), 1)]);

        let channels: Vec<(String, usize)> = by_channel(&rows)
            .into_iter()
            .map(|c| (c.key, c.count))
            .collect();
        assert_eq!(channels[1], ("Online".to_string(), 2));

        let amounts = amount_by_customer(&rows);
        assert_eq!(amounts[0].customer_id, "C1");
        assert_eq!(amounts[0].amount, 1000.0);
    }

    #[test]
    fn test_recent_takes_head() {
        let rows = sample();
        assert_eq!(ids(&recent(&rows, 2)), vec!["T1", "T2"]);
        assert_eq!(recent(&rows, 10).len(), 4);
    }

    #[test]
    fn test_summary_options_ignore_selectors() {
        let rows = sample();
        let filter = Filter {
            customer: Some("C2".into()),
            ..Filter::default()
        };
        let summary = DashboardSummary::build(&rows, &filter);
        assert_eq!(summary.metrics.total_transactions, 1);
        assert_eq!(summary.options.customers.len(), 3);
    }

    #[test]
    fn test_summary_options_follow_search() {
        let rows = sample();
        let filter = Filter {
            search: Some("mumbai".into()),
            risk: Some(RiskLevel::High),
            ..Filter::default()
        };
        let summary = DashboardSummary::build(&rows, &filter);
        assert_eq!(summary.options.customers, vec!["C1"]);
        assert_eq!(summary.options.cities, vec!["Mumbai"]);
        assert_eq!(summary.options.channels, vec!["Online", "POS"]);
        assert_eq!(summary.metrics.total_transactions, 1);
        assert_eq!(summary.metrics.high_risk, 1);
    }

    #[test]
    fn test_csv_export() {
        let bytes = to_csv(&sample()[..1]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("transaction_id,customer_id,transaction_date,amount"));
        let record = lines.next().unwrap();
        assert!(record.starts_with("T1,C1,2023-03-01 09:30:00,100,Mumbai,,,POS,0,Normal,a.csv"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_filter_from_query_json() {
        let filter: Filter =
            serde_json::from_value(serde_json::json!({"risk": "High Risk", "from": "2024-01-01"})).unwrap();
        assert_eq!(filter.risk, Some(RiskLevel::High));
        assert_eq!(filter.from, NaiveDate::from_ymd_opt(2024, 1, 1));
    }
}
