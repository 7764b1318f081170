//! Embedded SQLite ledger.
//!
//! rusqlite is blocking, so every operation runs on tokio's blocking pool and
//! never on a request-handling worker.

use super::{
    BackendKind, ColumnInfo, LedgerError, LedgerStatus, NewSettlement, SettlementLedger,
    SettlementRecord,
};
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::Error::FromSqlConversionFailure;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// How long a statement waits on a database lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    recipient TEXT NOT NULL,
    amount_usdc REAL NOT NULL,
    proof_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    block_reason TEXT,
    timestamp INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    block_number INTEGER NOT NULL DEFAULT 0,
    gas_used INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions (timestamp DESC);
"#;

const SELECT_COLUMNS: &str = "id, agent_id, recipient, amount_usdc, proof_id, status, block_reason, \
                              timestamp, created_at, block_number, gas_used";

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteLedger {
    /// Open or create the ledger file (and its parent directory).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        info!("Opening SQLite ledger at {:?}", path);

        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, LedgerError> {
            if let Some(parent) = open_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| LedgerError::Worker(format!("cannot create {parent:?}: {e}")))?;
            }
            let conn = Connection::open(&open_path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| LedgerError::Worker(format!("spawn_blocking error: {e}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open an in-memory ledger (for testing)
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory SQLite ledger");
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| LedgerError::Worker(format!("Lock poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| LedgerError::Worker(format!("spawn_blocking error: {e}")))?
    }
}

/// Only a duplicate `proof_id` is a conflict; other constraint failures are plain errors.
fn insert_error(e: rusqlite::Error, proof_id: String) -> LedgerError {
    match e {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            LedgerError::Conflict(proof_id)
        }
        e => e.into(),
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettlementRecord> {
    let status: String = row.get(5)?;
    let status = status
        .parse()
        .map_err(|e: LedgerError| FromSqlConversionFailure(5, Type::Text, e.to_string().into()))?;

    Ok(SettlementRecord {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        recipient: row.get(2)?,
        amount_usdc: row.get(3)?,
        proof_id: row.get(4)?,
        status,
        block_reason: row.get(6)?,
        timestamp: row.get(7)?,
        created_at: row.get(8)?,
        block_number: row.get(9)?,
        gas_used: row.get(10)?,
    })
}

#[async_trait]
impl SettlementLedger for SqliteLedger {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn insert(&self, record: &NewSettlement) -> Result<i64, LedgerError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                r#"
                INSERT INTO transactions (
                    agent_id, recipient, amount_usdc, proof_id, status, block_reason,
                    timestamp, created_at, block_number, gas_used
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    record.agent_id,
                    record.recipient,
                    record.amount_usdc,
                    record.proof_id,
                    record.status.as_str(),
                    record.block_reason,
                    record.timestamp,
                    NewSettlement::created_at_now(),
                    record.block_number,
                    record.gas_used,
                ],
            );

            match inserted {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) => Err(insert_error(e, record.proof_id)),
            }
        })
        .await
    }

    async fn exists(&self, proof_id: &str) -> Result<bool, LedgerError> {
        let proof_id = proof_id.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM transactions WHERE proof_id = ?1 LIMIT 1",
                    params![proof_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SettlementRecord>, LedgerError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM transactions ORDER BY timestamp DESC, id DESC LIMIT ?1"
            ))?;
            let records = stmt
                .query_map(params![limit], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn status(&self) -> Result<LedgerStatus, LedgerError> {
        self.with_conn(|conn| {
            let row_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

            let mut stmt = conn.prepare("PRAGMA table_info(transactions)")?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        data_type: row.get(2)?,
                        notnull: row.get::<_, i64>(3)? != 0,
                        default: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(LedgerStatus {
                backend: BackendKind::Sqlite,
                row_count,
                columns,
            })
        })
        .await
    }
}
