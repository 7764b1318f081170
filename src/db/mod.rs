//! Settlement ledger
//!
//! One append-only relation of verified (or manually reported) payments with a
//! unique constraint on `proof_id`. That constraint is the only source of truth
//! for exactly-once acceptance: verification may race, insertion may not.
//!
//! Two backends with identical behaviour, chosen by the `DATABASE_URL` scheme:
//!
//! - `sqlite://...` - embedded file, blocking driver run on the blocking pool
//! - `postgres://...` - pooled connections via sqlx

pub mod bounded;
pub mod postgres;
pub mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

use crate::config::DatabaseConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use bounded::BoundedLedger;
pub use postgres::PostgresLedger;
pub use sqlite::SqliteLedger;

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Success,
    Blocked,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Success => "success",
            SettlementStatus::Blocked => "blocked",
            SettlementStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SettlementStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SettlementStatus::Success),
            "blocked" => Ok(SettlementStatus::Blocked),
            "failed" => Ok(SettlementStatus::Failed),
            other => Err(LedgerError::Corrupt(format!("unknown status `{other}`"))),
        }
    }
}

/// A settlement about to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSettlement {
    pub agent_id: String,
    pub recipient: String,
    pub amount_usdc: f64,
    pub proof_id: String,
    pub status: SettlementStatus,
    pub block_reason: Option<String>,
    pub timestamp: i64,
    pub block_number: i64,
    pub gas_used: i64,
}

impl NewSettlement {
    /// ISO-8601 creation time stamped at insert.
    pub fn created_at_now() -> String {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    }
}

/// A stored settlement row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: i64,
    pub agent_id: String,
    pub recipient: String,
    pub amount_usdc: f64,
    pub proof_id: String,
    pub status: SettlementStatus,
    pub block_reason: Option<String>,
    pub timestamp: i64,
    pub created_at: String,
    pub block_number: i64,
    pub gas_used: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub notnull: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerStatus {
    pub backend: BackendKind,
    pub row_count: i64,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("proof_id `{0}` is already recorded")]
    Conflict(String),

    #[error("Database error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("ledger {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("storage worker failed: {0}")]
    Worker(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SettlementLedger: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Record a settlement. Fails with [`LedgerError::Conflict`] if the proof is
    /// already present; existing rows are never touched.
    async fn insert(&self, record: &NewSettlement) -> Result<i64, LedgerError>;

    async fn exists(&self, proof_id: &str) -> Result<bool, LedgerError>;

    /// Most recent settlements first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<SettlementRecord>, LedgerError>;

    async fn status(&self) -> Result<LedgerStatus, LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Where a ledger lives, derived from the connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerLocation {
    SqliteFile(PathBuf),
    SqliteMemory,
    Postgres(String),
}

impl LedgerLocation {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();

        for scheme in ["postgresql+asyncpg://", "postgresql://", "postgres://"] {
            if let Some(rest) = url.strip_prefix(scheme) {
                return Ok(Self::Postgres(format!("postgresql://{rest}")));
            }
        }

        // sqlite:///relative/path, sqlite:////absolute/path, sqlite://path
        let path = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"))
            .or_else(|| url.strip_prefix("sqlite:"))
            .ok_or_else(|| anyhow!("unsupported DATABASE_URL scheme: {url}"))?;

        match path {
            "" => Err(anyhow!("DATABASE_URL is missing a sqlite path")),
            ":memory:" => Ok(Self::SqliteMemory),
            path => Ok(Self::SqliteFile(PathBuf::from(path))),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            LedgerLocation::Postgres(_) => BackendKind::Postgres,
            LedgerLocation::SqliteFile(_) | LedgerLocation::SqliteMemory => BackendKind::Sqlite,
        }
    }
}

/// Open the ledger selected by configuration and make sure its schema exists.
///
/// The returned ledger is unbounded; callers wrap it in [`BoundedLedger`].
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn SettlementLedger>> {
    let location = LedgerLocation::parse(&config.url)?;
    info!(backend = %location.backend(), "Opening settlement ledger");

    let ledger: Arc<dyn SettlementLedger> = match location {
        LedgerLocation::SqliteFile(path) => Arc::new(SqliteLedger::open(path).await?),
        LedgerLocation::SqliteMemory => Arc::new(SqliteLedger::open_in_memory()?),
        LedgerLocation::Postgres(url) => Arc::new(PostgresLedger::connect(&url, config).await?),
    };
    Ok(ledger)
}
