use super::{BackendKind, LedgerError, LedgerStatus, NewSettlement, SettlementLedger, SettlementRecord};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Puts a deadline on every call into the wrapped ledger. A call that
/// outlives it fails with [`LedgerError::Timeout`].
pub struct BoundedLedger {
    inner: Arc<dyn SettlementLedger>,
    timeout: Duration,
}

impl BoundedLedger {
    pub fn new(inner: Arc<dyn SettlementLedger>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(backend = %self.inner.backend(), operation, timeout = ?self.timeout, "Ledger call timed out");
                Err(LedgerError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl SettlementLedger for BoundedLedger {
    fn backend(&self) -> BackendKind {
        self.inner.backend()
    }

    async fn insert(&self, record: &NewSettlement) -> Result<i64, LedgerError> {
        self.bounded("insert", self.inner.insert(record)).await
    }

    async fn exists(&self, proof_id: &str) -> Result<bool, LedgerError> {
        self.bounded("exists", self.inner.exists(proof_id)).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SettlementRecord>, LedgerError> {
        self.bounded("list_recent", self.inner.list_recent(limit)).await
    }

    async fn status(&self) -> Result<LedgerStatus, LedgerError> {
        self.bounded("status", self.inner.status()).await
    }
}
