//! Append-only relational sink for classified transactions.
//!
//! Backed by a `sqlx` Any pool, so the same code talks to MySQL in
//! production and SQLite locally and in tests. Every append is one database
//! transaction tagged with a fresh batch id: it commits whole or not at all,
//! and rows written earlier are never touched.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::collections::{BTreeMap, HashSet};

use crate::config::DatabaseConfig;
use crate::error::{PersistenceError, PipelineResult, StoreResult};
use crate::models::{ClassifiedTransaction, RiskLevel, StoredTransaction, Transaction};

/// Destination table.
pub const TABLE: &str = "transactions_standard";

// `%.f` writes no fraction for whole seconds and reads either form
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS transactions_standard (
    transaction_id VARCHAR(128) NOT NULL,
    customer_id VARCHAR(128),
    transaction_date VARCHAR(32),
    amount DOUBLE PRECISION NOT NULL,
    city VARCHAR(128),
    state VARCHAR(128),
    category VARCHAR(128),
    channel VARCHAR(64),
    is_fraud BIGINT NOT NULL,
    extra TEXT,
    risk_level VARCHAR(16) NOT NULL,
    source_file VARCHAR(255) NOT NULL,
    batch_id VARCHAR(36) NOT NULL,
    row_index BIGINT NOT NULL,
    ingested_at VARCHAR(32) NOT NULL
)
"#;

const INSERT_SQL: &str = r#"
INSERT INTO transactions_standard (
    transaction_id, customer_id, transaction_date, amount, city, state,
    category, channel, is_fraud, extra, risk_level, source_file, batch_id,
    row_index, ingested_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_SQL: &str = r#"
SELECT transaction_id, customer_id, transaction_date, amount, city, state,
       category, channel, is_fraud, extra, risk_level, source_file, batch_id,
       row_index, ingested_at
FROM transactions_standard
ORDER BY ingested_at DESC, batch_id ASC, row_index ASC
"#;

/// What one append wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendReceipt {
    pub batch_id: String,
    pub rows: usize,
    pub source_file: String,
    pub ingested_at: DateTime<Utc>,
}

/// Handle on the persisted transactions table.
#[derive(Debug, Clone)]
pub struct TransactionStore {
    pool: AnyPool,
}

impl TransactionStore {
    /// Connect with the configured parameters and create the table if absent.
    pub async fn connect(config: &DatabaseConfig) -> PipelineResult<Self> {
        let url = config.connection_url()?;
        Ok(Self::connect_url(&url, config.max_connections).await?)
    }

    /// Connect to an explicit URL (`mysql://…`, `sqlite://…`).
    pub async fn connect_url(url: &str, max_connections: u32) -> StoreResult<Self> {
        sqlx::any::install_default_drivers();

        // in-memory SQLite lives as long as its connection, so never recycle
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        tracing::debug!(table = TABLE, "schema ensured");
        Ok(())
    }

    /// Append classified rows in one database transaction.
    ///
    /// Empty input writes nothing and still returns a receipt.
    pub async fn append(
        &self,
        rows: &[ClassifiedTransaction],
        source_file: &str,
    ) -> StoreResult<AppendReceipt> {
        let receipt = AppendReceipt {
            batch_id: uuid::Uuid::new_v4().to_string(),
            rows: rows.len(),
            source_file: source_file.to_string(),
            ingested_at: Utc::now(),
        };
        if rows.is_empty() {
            return Ok(receipt);
        }

        let ingested_at = receipt.ingested_at.format(TIMESTAMP_FORMAT).to_string();
        let mut tx = self.pool.begin().await?;

        for (index, row) in rows.iter().enumerate() {
            let txn = &row.transaction;
            let extra = if txn.extra.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&txn.extra)?)
            };

            sqlx::query(INSERT_SQL)
                .bind(txn.transaction_id.clone())
                .bind(txn.customer_id.clone())
                .bind(txn.transaction_date.map(|d| d.format(DATE_FORMAT).to_string()))
                .bind(txn.amount)
                .bind(txn.city.clone())
                .bind(txn.state.clone())
                .bind(txn.category.clone())
                .bind(txn.channel.clone())
                .bind(i64::from(txn.is_fraud))
                .bind(extra)
                .bind(row.risk_level.as_str().to_string())
                .bind(receipt.source_file.clone())
                .bind(receipt.batch_id.clone())
                .bind(index as i64)
                .bind(ingested_at.clone())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(
            batch_id = %receipt.batch_id,
            rows = receipt.rows,
            source_file = %receipt.source_file,
            "batch appended"
        );
        Ok(receipt)
    }

    /// Every persisted row, newest batch first, file order within a batch.
    pub async fn all(&self) -> StoreResult<Vec<StoredTransaction>> {
        let rows = sqlx::query(SELECT_SQL).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    /// One row per transaction id, the most recently ingested version winning.
    pub async fn latest(&self) -> StoreResult<Vec<StoredTransaction>> {
        let mut seen = HashSet::new();
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|row| seen.insert(row.transaction().transaction_id.clone()))
            .collect())
    }

    pub async fn count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM transactions_standard")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }
}

fn decode_row(row: &AnyRow) -> StoreResult<StoredTransaction> {
    let transaction_date: Option<String> = row.try_get("transaction_date")?;
    let transaction_date = transaction_date
        .map(|raw| {
            NaiveDateTime::parse_from_str(&raw, DATE_FORMAT)
                .map_err(|e| PersistenceError::CorruptRow(format!("transaction_date '{}': {}", raw, e)))
        })
        .transpose()?;

    let extra: Option<String> = row.try_get("extra")?;
    let extra: BTreeMap<String, String> = match extra.as_deref() {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
            .map_err(|e| PersistenceError::CorruptRow(format!("extra: {}", e)))?,
        _ => BTreeMap::new(),
    };

    let risk_level: String = row.try_get("risk_level")?;
    let risk_level: RiskLevel = risk_level.parse().map_err(PersistenceError::CorruptRow)?;

    let ingested_at: String = row.try_get("ingested_at")?;
    let ingested_at = NaiveDateTime::parse_from_str(&ingested_at, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| PersistenceError::CorruptRow(format!("ingested_at '{}': {}", ingested_at, e)))?
        .and_utc();

    let is_fraud: i64 = row.try_get("is_fraud")?;

    Ok(StoredTransaction {
        record: ClassifiedTransaction {
            transaction: Transaction {
                transaction_id: row.try_get("transaction_id")?,
                customer_id: row.try_get("customer_id")?,
                amount: row.try_get("amount")?,
                transaction_date,
                is_fraud: is_fraud != 0,
                city: row.try_get("city")?,
                state: row.try_get("state")?,
                category: row.try_get("category")?,
                channel: row.try_get("channel")?,
                extra,
            },
            risk_level,
        },
        source_file: row.try_get("source_file")?,
        batch_id: row.try_get("batch_id")?,
        row_index: row.try_get("row_index")?,
        ingested_at,
    })
}
