//! Ingestion orchestrator: file → standardized → cleaned → classified.
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────┐   ┌────────────┐   ┌───────┐
//! │  Parser  │──▶│ Standardizer │──▶│ Cleaner │──▶│ Classifier │──▶│ Store │
//! └──────────┘   └──────────────┘   └─────────┘   └────────────┘   └───────┘
//! ```
//!
//! Stages run strictly in sequence and the first failure aborts the run.
//! Storage is a separate async step so dry runs never need a database.
//!
//! # Example
//!
//! ```rust,ignore
//! use cardwatch::{pipeline, AppConfig, TransactionStore};
//!
//! let config = AppConfig::load_default(None)?;
//! let report = pipeline::ingest_file("transactions.csv", &config)?;
//! let store = TransactionStore::connect(&config.database).await?;
//! let receipt = pipeline::store_report(&store, &report).await?;
//! println!("{} rows in batch {}", receipt.rows, receipt.batch_id);
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::analytics::classify;
use crate::api::logs::{log_detail, log_info, log_success, log_warning};
use crate::config::{AppConfig, ColumnMapping, RiskRules};
use crate::error::{PipelineResult, StoreResult};
use crate::models::{ClassifiedTransaction, RiskLevel};
use crate::parser::{load_bytes, load_file, FileFormat, RawTable};
use crate::processing::{clean, standardize, CleanReport, ColumnResolution, DropReason};
use crate::store::{AppendReceipt, TransactionStore};

/// Where the rows came from and how the file was read.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub format: FileFormat,
    pub encoding: Option<String>,
    pub delimiter: Option<char>,
    pub sheet: Option<String>,
    pub headers: Vec<String>,
    pub row_count: usize,
}

impl SourceInfo {
    fn from_table(raw: &RawTable) -> Self {
        Self {
            format: raw.format,
            encoding: raw.encoding.clone(),
            delimiter: raw.delimiter,
            sheet: raw.sheet.clone(),
            headers: raw.headers.clone(),
            row_count: raw.len(),
        }
    }
}

/// Result of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// File name recorded as `source_file` when stored.
    pub source_name: String,
    pub source: SourceInfo,
    /// Which raw header fed each canonical column.
    pub columns: Vec<ColumnResolution>,
    pub cleaning: CleanReport,
    pub transactions: Vec<ClassifiedTransaction>,
}

impl IngestReport {
    pub fn rows_read(&self) -> usize {
        self.cleaning.input_rows
    }

    pub fn rows_dropped(&self) -> usize {
        self.cleaning.dropped.len()
    }

    /// Row count per tier, every tier present.
    pub fn risk_counts(&self) -> BTreeMap<RiskLevel, usize> {
        let mut counts: BTreeMap<RiskLevel, usize> = RiskLevel::ALL.iter().map(|l| (*l, 0)).collect();
        for row in &self.transactions {
            *counts.entry(row.risk_level).or_default() += 1;
        }
        counts
    }
}

/// Ingest a file from disk; `source_name` is the file name without directories.
pub fn ingest_file<P: AsRef<Path>>(path: P, config: &AppConfig) -> PipelineResult<IngestReport> {
    let path = path.as_ref();
    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    log_info(format!("Reading {}...", path.display()));
    let raw = load_file(path)?;
    ingest_table(raw, &source_name, &config.columns, &config.rules)
}

/// Ingest uploaded bytes; the format comes from `file_name`.
pub fn ingest_bytes(bytes: &[u8], file_name: &str, config: &AppConfig) -> PipelineResult<IngestReport> {
    log_info(format!("Reading {} ({} bytes)...", file_name, bytes.len()));
    let raw = load_bytes(bytes, file_name)?;
    ingest_table(raw, file_name, &config.columns, &config.rules)
}

/// Run Standardizer → Cleaner → Classifier on an already-parsed table.
pub fn ingest_table(
    raw: RawTable,
    source_name: &str,
    mapping: &ColumnMapping,
    rules: &RiskRules,
) -> PipelineResult<IngestReport> {
    let source = SourceInfo::from_table(&raw);
    log_source(&source);

    log_info("Standardizing columns...");
    let table = standardize(&raw, mapping)?;
    for col in &table.resolved {
        log_detail(format!("{} ← {}", col.canonical, col.source));
    }

    log_info("Cleaning rows...");
    let batch = clean(&table);
    log_cleaning(&batch.report);

    log_info(format!(
        "Classifying risk (unusual above {}× customer mean)...",
        rules.unusual_multiplier
    ));
    let transactions = classify(&batch, rules.unusual_multiplier)?;

    let report = IngestReport {
        source_name: source_name.to_string(),
        source,
        columns: table.resolved,
        cleaning: batch.report,
        transactions,
    };

    let summary: Vec<String> = report
        .risk_counts()
        .iter()
        .map(|(level, count)| format!("{}: {}", level, count))
        .collect();
    log_success(format!(
        "{} transactions classified ({})",
        report.transactions.len(),
        summary.join(", ")
    ));

    Ok(report)
}

/// Append a report's rows to the store under its source name.
pub async fn store_report(store: &TransactionStore, report: &IngestReport) -> StoreResult<AppendReceipt> {
    log_info(format!("Saving {} rows to the database...", report.transactions.len()));
    let receipt = store.append(&report.transactions, &report.source_name).await?;
    log_success(format!("Saved batch {} from {}", receipt.batch_id, receipt.source_file));
    Ok(receipt)
}

/// Ingest a file and append the result in one call.
pub async fn ingest_and_store<P: AsRef<Path>>(
    path: P,
    config: &AppConfig,
    store: &TransactionStore,
) -> PipelineResult<(IngestReport, AppendReceipt)> {
    let report = ingest_file(path, config)?;
    let receipt = store_report(store, &report).await?;
    Ok((report, receipt))
}

fn log_source(source: &SourceInfo) {
    match source.format {
        FileFormat::Csv => {
            if let Some(ref encoding) = source.encoding {
                log_success(format!("Detected encoding: {}", encoding));
            }
            if let Some(delimiter) = source.delimiter {
                log_success(format!("Detected separator: '{}'", format_delimiter(delimiter)));
            }
        }
        FileFormat::Spreadsheet(kind) => {
            log_success(format!(
                "Read {:?} worksheet '{}'",
                kind,
                source.sheet.as_deref().unwrap_or("?")
            ));
        }
    }
    log_success(format!(
        "Read {} rows, {} columns",
        source.row_count,
        source.headers.len()
    ));
}

fn log_cleaning(report: &CleanReport) {
    if report.dropped.is_empty() {
        log_success(format!("All {} rows kept", report.input_rows));
        return;
    }

    let count = |reason: DropReason| report.dropped.iter().filter(|d| d.reason == reason).count();
    log_warning(format!(
        "{} of {} rows dropped",
        report.dropped.len(),
        report.input_rows
    ));
    let missing_id = count(DropReason::MissingTransactionId);
    if missing_id > 0 {
        log_detail(format!("{} without transaction_id", missing_id));
    }
    let missing_amount = count(DropReason::MissingAmount);
    if missing_amount > 0 {
        log_detail(format!("{} with missing or non-numeric amount", missing_amount));
    }
}

/// Printable form of a delimiter; tab renders as `\t`.
pub fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, SchemaError};
    use std::io::Write;

    fn config() -> AppConfig {
        AppConfig::default()
    }

    #[test]
    fn test_end_to_end_example() {
        let csv = "\
Txn_ID,Cust_ID,Amount,Fraud_Flag,Location_City
T1,A,100,0,Pune
T2,A,100,0,Pune
T3,A,1000,1,Delhi
";
        let report = ingest_bytes(csv.as_bytes(), "batch.csv", &config()).unwrap();

        let levels: Vec<RiskLevel> = report.transactions.iter().map(|t| t.risk_level).collect();
        assert_eq!(levels, vec![RiskLevel::Normal, RiskLevel::Normal, RiskLevel::High]);
        assert_eq!(report.source_name, "batch.csv");
        assert_eq!(report.rows_read(), 3);
        assert_eq!(report.rows_dropped(), 0);
        assert_eq!(report.transactions[2].transaction.city.as_deref(), Some("Delhi"));
        assert_eq!(report.risk_counts()[&RiskLevel::High], 1);
        assert_eq!(report.risk_counts()[&RiskLevel::Medium], 0);
    }

    #[test]
    fn test_bad_rows_dropped_then_classified() {
        let csv = "txn_id;cust_id;amount\nT1;A;100\n;A;5\nT3;A;oops\nT4;A;100\n";
        let report = ingest_bytes(csv.as_bytes(), "semi.csv", &config()).unwrap();

        assert_eq!(report.source.delimiter, Some(';'));
        assert_eq!(report.rows_read(), 4);
        assert_eq!(report.rows_dropped(), 2);
        let ids: Vec<&str> = report
            .transactions
            .iter()
            .map(|t| t.transaction.transaction_id.as_str())
            .collect();
        assert_eq!(ids, vec!["T1", "T4"]);
    }

    #[test]
    fn test_missing_required_column_aborts() {
        let csv = "txn_id,amount\nT1,100\n";
        let err = ingest_bytes(csv.as_bytes(), "x.csv", &config()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::MissingAfterStandardization(ref cols)) if cols == &["customer_id"]
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = ingest_bytes(b"%PDF", "report.pdf", &config()).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_multiplier_from_rules() {
        let raw = RawTable::from_rows(
            ["transaction_id", "customer_id", "amount"],
            [["T1", "A", "100"], ["T2", "A", "100"], ["T3", "A", "200"]],
        );
        // mean = 133.3; 200 is unusual at 1.2x but not at 2x
        let strict = RiskRules { unusual_multiplier: 1.2 };
        let report = ingest_table(raw.clone(), "t", &config().columns, &strict).unwrap();
        assert_eq!(report.transactions[2].risk_level, RiskLevel::Medium);

        let report = ingest_table(raw, "t", &config().columns, &RiskRules::default()).unwrap();
        assert_eq!(report.transactions[2].risk_level, RiskLevel::Normal);
    }

    fn canonical_table(rows: &[ClassifiedTransaction]) -> RawTable {
        let headers = [
            "transaction_id",
            "customer_id",
            "transaction_date",
            "amount",
            "city",
            "is_fraud",
        ];
        let cells = rows.iter().map(|row| {
            let t = &row.transaction;
            vec![
                t.transaction_id.clone(),
                t.customer_id.clone().unwrap_or_default(),
                t.transaction_date
                    .map(|d| d.format("%Y-%m-%d %H:%M:%S%.f").to_string())
                    .unwrap_or_default(),
                t.amount.to_string(),
                t.city.clone().unwrap_or_default(),
                if t.is_fraud { "1" } else { "0" }.to_string(),
            ]
        });
        RawTable::from_rows(headers, cells)
    }

    #[test]
    fn test_rerun_on_own_output_keeps_tiers() {
        let csv = "\
Txn_ID,Cust_ID,Date,Amount,Fraud_Flag,City
T1,A,2024-01-05 09:30:00.250,100,0,Pune
T2,A,01/06/2024,100,no,Pune
T3,A,2024-01-07,1000,yes,Delhi
T4,B,,40.5,0,
T5,B,2024-02-01 12:00,400,0,Mumbai
T6,,2024-02-02,9999,1,Noida
T7,B,2024-02-03,10,0,Mumbai
";
        let first = ingest_bytes(csv.as_bytes(), "batch.csv", &config()).unwrap();
        let tiers: Vec<RiskLevel> = first.transactions.iter().map(|t| t.risk_level).collect();
        assert!(tiers.contains(&RiskLevel::High));
        assert!(tiers.contains(&RiskLevel::Medium));

        let again = canonical_table(&first.transactions);
        let second = ingest_table(again, "batch.csv", &config().columns, &RiskRules::default()).unwrap();

        let rerun: Vec<RiskLevel> = second.transactions.iter().map(|t| t.risk_level).collect();
        assert_eq!(rerun, tiers);
        assert_eq!(second.rows_dropped(), 0);
        assert_eq!(second.transactions, first.transactions);
    }

    #[test]
    fn test_format_delimiter() {
        assert_eq!(format_delimiter('\t'), "\\t");
        assert_eq!(format_delimiter(';'), ";");
    }

    #[test]
    fn test_ingest_xlsx_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("march.xlsx");
        let bytes = crate::parser::spreadsheet::xlsx_fixture(&[
            &["Txn ID", "Cust_ID", "Amount", "Fraud_Flag", "Location_City"],
            &["TXN001", "A", "100", "0", "Pune"],
            &["TXN002", "A", "100", "0", "Pune"],
            &["TXN003", "A", "1000", "1", "Delhi"],
            &["", "B", "5", "0", "Delhi"],
        ]);
        std::fs::write(&path, bytes).unwrap();

        let report = ingest_file(&path, &config()).unwrap();
        assert_eq!(report.source_name, "march.xlsx");
        assert_eq!(report.source.sheet.as_deref(), Some("Transactions"));
        assert_eq!(report.rows_read(), 4);
        assert_eq!(report.rows_dropped(), 1);
        let levels: Vec<RiskLevel> = report.transactions.iter().map(|t| t.risk_level).collect();
        assert_eq!(levels, vec![RiskLevel::Normal, RiskLevel::Normal, RiskLevel::High]);
        assert_eq!(report.transactions[2].transaction.amount, 1000.0);
    }

    #[test]
    fn test_ingest_file_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("march.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "transaction_id,customer_id,amount").unwrap();
        writeln!(file, "T1,C1,10").unwrap();

        let report = ingest_file(&path, &config()).unwrap();
        assert_eq!(report.source_name, "march.csv");
        assert_eq!(report.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_and_store_tags_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "transaction_id,customer_id,amount\nT1,C1,10\nT2,C1,20\n").unwrap();

        let store = TransactionStore::connect_url("sqlite::memory:", 1).await.unwrap();
        let (report, receipt) = ingest_and_store(&path, &config(), &store).await.unwrap();
        assert_eq!(receipt.rows, report.transactions.len());

        let stored = store.all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r.source_file == "a.csv"));
    }
}
