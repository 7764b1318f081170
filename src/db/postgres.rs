use super::{
    BackendKind, ColumnInfo, LedgerError, LedgerStatus, NewSettlement, SettlementLedger,
    SettlementRecord,
};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Bound on waiting for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

// Note: FromRow is needed for runtime query_as (without DATABASE_URL at compile time)
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    agent_id: String,
    recipient: String,
    amount_usdc: f64,
    proof_id: String,
    status: String,
    block_reason: Option<String>,
    timestamp: i64,
    created_at: String,
    block_number: i64,
    gas_used: i64,
}

impl TryFrom<TransactionRow> for SettlementRecord {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(SettlementRecord {
            id: row.id,
            agent_id: row.agent_id,
            recipient: row.recipient,
            amount_usdc: row.amount_usdc,
            proof_id: row.proof_id,
            status: row.status.parse()?,
            block_reason: row.block_reason,
            timestamp: row.timestamp,
            created_at: row.created_at,
            block_number: row.block_number,
            gas_used: row.gas_used,
        })
    }
}

pub async fn create_pool(url: &str, config: &DatabaseConfig) -> Result<PgPool, LedgerError> {
    // The server cancels any statement running past the ledger bound.
    let options = url
        .parse::<PgConnectOptions>()?
        .options([("statement_timeout", format!("{}ms", config.io_timeout().as_millis()))]);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    // Test connection
    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    Ok(pool)
}

impl PostgresLedger {
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, LedgerError> {
        let pool = create_pool(url, config).await?;

        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations completed");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementLedger for PostgresLedger {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn insert(&self, record: &NewSettlement) -> Result<i64, LedgerError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO transactions (
                agent_id, recipient, amount_usdc, proof_id, status, block_reason,
                timestamp, created_at, block_number, gas_used
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (proof_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&record.agent_id)
        .bind(&record.recipient)
        .bind(record.amount_usdc)
        .bind(&record.proof_id)
        .bind(record.status.as_str())
        .bind(&record.block_reason)
        .bind(record.timestamp)
        .bind(NewSettlement::created_at_now())
        .bind(record.block_number)
        .bind(record.gas_used)
        .fetch_optional(&self.pool)
        .await?;

        id.ok_or_else(|| LedgerError::Conflict(record.proof_id.clone()))
    }

    async fn exists(&self, proof_id: &str) -> Result<bool, LedgerError> {
        let found: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM transactions WHERE proof_id = $1 LIMIT 1")
                .bind(proof_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SettlementRecord>, LedgerError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, agent_id, recipient, amount_usdc, proof_id, status, block_reason,
                   timestamp, created_at, block_number, gas_used
            FROM transactions
            ORDER BY timestamp DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SettlementRecord::try_from).collect()
    }

    async fn status(&self) -> Result<LedgerStatus, LedgerError> {
        let row_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;

        let columns: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT column_name::text, data_type::text, is_nullable::text, column_default::text
            FROM information_schema.columns
            WHERE table_name = 'transactions'
            ORDER BY ordinal_position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(LedgerStatus {
            backend: BackendKind::Postgres,
            row_count,
            columns: columns
                .into_iter()
                .map(|(name, data_type, nullable, default)| ColumnInfo {
                    name,
                    data_type,
                    notnull: nullable == "NO",
                    default,
                })
                .collect(),
        })
    }
}
