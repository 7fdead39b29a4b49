//! Configuration: column mapping, risk rules and database connection.
//!
//! Everything lives in one TOML document (default `cardwatch.toml`):
//!
//! ```toml
//! [columns]
//! transaction_id = ["transaction_id", "txn_id"]
//! customer_id = ["customer_id", "cust_id"]
//! amount = ["amount", "amt"]
//!
//! [rules]
//! unusual_multiplier = 2.0
//!
//! [database]
//! url = "sqlite://cardwatch.db?mode=rwc"
//!
//! [server]
//! max_upload_mb = 200
//! ```
//!
//! The `[columns]` table is order-sensitive: entry order defines the canonical
//! column order. Environment variables override single values:
//! `CARDWATCH_DATABASE_URL` and `CARDWATCH_UNUSUAL_MULTIPLIER`.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigurationError, ConfigResult};
use crate::models::{
    AMOUNT, CATEGORY, CHANNEL, CITY, CUSTOMER_ID, IS_FRAUD, STATE, TRANSACTION_DATE,
    TRANSACTION_ID,
};

/// Config file used when neither `--config` nor `CARDWATCH_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "cardwatch.toml";

pub const ENV_CONFIG_PATH: &str = "CARDWATCH_CONFIG";
pub const ENV_DATABASE_URL: &str = "CARDWATCH_DATABASE_URL";
pub const ENV_UNUSUAL_MULTIPLIER: &str = "CARDWATCH_UNUSUAL_MULTIPLIER";

// =============================================================================
// Application Config
// =============================================================================

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub columns: ColumnMapping,
    pub rules: RiskRules,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            columns: ColumnMapping::default(),
            rules: RiskRules::default(),
            database: DatabaseConfig {
                url: Some("sqlite://cardwatch.db?mode=rwc".to_string()),
                ..DatabaseConfig::default()
            },
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigurationError::NotFound(path.to_path_buf()),
            _ => ConfigurationError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let mut config = Self::from_toml(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `explicit`, else `CARDWATCH_CONFIG`, else [`DEFAULT_CONFIG_PATH`].
    pub fn load_default(explicit: Option<&Path>) -> ConfigResult<Self> {
        Self::load(resolve_path(explicit))
    }

    /// Parse TOML without touching the environment.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply single-value overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(raw) = lookup(ENV_UNUSUAL_MULTIPLIER) {
            self.rules.unusual_multiplier = raw.trim().parse().map_err(|_| {
                ConfigurationError::Invalid(format!("{} is not a number: '{}'", ENV_UNUSUAL_MULTIPLIER, raw))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.columns.validate()?;
        self.rules.validate()?;
        self.server.validate()?;
        Ok(())
    }
}

/// Resolve which config file to read.
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// =============================================================================
// Column Mapping
// =============================================================================

/// Acceptable source headers for one canonical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldVariants {
    pub canonical: String,
    pub variants: Vec<String>,
}

/// Canonical field name -> acceptable header variants, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    fields: Vec<FieldVariants>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add (or replace) the variants of a canonical field.
    pub fn with_field<I, S>(mut self, canonical: &str, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants: Vec<String> = variants.into_iter().map(Into::into).collect();
        match self.fields.iter_mut().find(|f| f.canonical == canonical) {
            Some(existing) => existing.variants = variants,
            None => self.fields.push(FieldVariants {
                canonical: canonical.to_string(),
                variants,
            }),
        }
        self
    }

    pub fn fields(&self) -> &[FieldVariants] {
        &self.fields
    }

    pub fn variants(&self, canonical: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|f| f.canonical == canonical)
            .map(|f| f.variants.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.fields.is_empty() {
            return Err(ConfigurationError::Invalid("[columns] mapping is empty".into()));
        }
        for field in &self.fields {
            if field.canonical.trim().is_empty() {
                return Err(ConfigurationError::Invalid("[columns] has an empty field name".into()));
            }
            if field.variants.iter().all(|v| v.trim().is_empty()) {
                return Err(ConfigurationError::Invalid(format!(
                    "[columns] field '{}' lists no header variants",
                    field.canonical
                )));
            }
        }
        Ok(())
    }
}

impl Default for ColumnMapping {
    /// Built-in synonyms covering the common card-transaction exports.
    fn default() -> Self {
        ColumnMapping::new()
            .with_field(
                TRANSACTION_ID,
                ["transaction_id", "transaction id", "txn_id", "txn id", "txnid", "trans_id"],
            )
            .with_field(
                CUSTOMER_ID,
                ["customer_id", "customer id", "cust_id", "cust id", "client_id", "card_holder_id"],
            )
            .with_field(
                TRANSACTION_DATE,
                ["transaction_date", "transaction date", "txn_date", "date", "timestamp"],
            )
            .with_field(
                AMOUNT,
                ["amount", "txn_amount", "transaction_amount", "amt", "value"],
            )
            .with_field(CITY, ["city", "location_city", "location"])
            .with_field(STATE, ["state", "location_state", "region"])
            .with_field(CATEGORY, ["category", "merchant_category", "merchant category"])
            .with_field(CHANNEL, ["channel", "mode", "payment_mode", "txn_mode"])
            .with_field(
                IS_FRAUD,
                ["is_fraud", "fraud_flag", "fraud", "fraud_indicator", "isfraud"],
            )
    }
}

impl Serialize for ColumnMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.fields.iter().map(|f| (&f.canonical, &f.variants)))
    }
}

impl<'de> Deserialize<'de> for ColumnMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = ColumnMapping;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table of canonical field name to header variants")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut fields = Vec::new();
                while let Some((canonical, variants)) = map.next_entry::<String, Vec<String>>()? {
                    fields.push(FieldVariants { canonical, variants });
                }
                Ok(ColumnMapping { fields })
            }
        }

        deserializer.deserialize_map(MappingVisitor)
    }
}

// =============================================================================
// Risk Rules
// =============================================================================

/// Parameters of the risk classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskRules {
    /// A row is unusual when its amount exceeds the customer's mean times this.
    pub unusual_multiplier: f64,
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            unusual_multiplier: 2.0,
        }
    }
}

impl RiskRules {
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.unusual_multiplier.is_finite() || self.unusual_multiplier <= 0.0 {
            return Err(ConfigurationError::Invalid(format!(
                "rules.unusual_multiplier must be a positive number, got {}",
                self.unusual_multiplier
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Database
// =============================================================================

/// Relational sink connection parameters.
///
/// Either a full `url` or the discrete MySQL parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// Connection URL: the explicit `url`, else one assembled for MySQL.
    pub fn connection_url(&self) -> ConfigResult<String> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.trim().to_string());
        }

        let host = require(&self.host, "database.host")?;
        let user = require(&self.user, "database.user")?;
        let database = require(&self.database, "database.database")?;

        let credentials = match self.password.as_deref() {
            Some(pw) if !pw.is_empty() => format!("{}:{}", user, pw),
            _ => user.to_string(),
        };
        let authority = match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(format!("mysql://{}@{}/{}", credentials, authority, database))
    }
}

fn require<'a>(value: &'a Option<String>, name: &str) -> ConfigResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigurationError::Invalid(format!("{} is required when database.url is not set", name)))
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP surface settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Largest accepted upload request, in MiB.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_max_upload_mb() -> usize {
    200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_upload_mb == 0 {
            return Err(ConfigurationError::Invalid("server.max_upload_mb must be at least 1".into()));
        }
        Ok(())
    }
}
