//! Shared ledger checks, run against every backend, plus a ledger that never answers.

use super::{BackendKind, LedgerError, LedgerStatus, NewSettlement, SettlementLedger, SettlementRecord, SettlementStatus};
use async_trait::async_trait;

pub fn settlement(proof_id: &str, timestamp: i64) -> NewSettlement {
    NewSettlement {
        agent_id: "weather_agent".to_string(),
        recipient: "0x61254AEcF84eEdb890f07dD29f7F3cd3b8Eb2CBe".to_string(),
        amount_usdc: 0.001,
        proof_id: proof_id.to_string(),
        status: SettlementStatus::Success,
        block_reason: None,
        timestamp,
        block_number: 0,
        gas_used: 0,
    }
}

// Proof ids must not collide with rows left by earlier runs on a shared database.
fn unique(tag: &str) -> String {
    format!("0x{tag}-{}", uuid::Uuid::new_v4().simple())
}

// Above anything a previous run could have written, so fresh rows list first.
fn fresh_timestamp() -> i64 {
    chrono::Utc::now().timestamp_micros() * 10
}

pub async fn check_duplicate_proof_conflicts(ledger: &dyn SettlementLedger) {
    let proof_id = unique("dup");
    let ts = fresh_timestamp();
    let first = ledger.insert(&settlement(&proof_id, ts)).await.unwrap();
    assert!(first > 0);

    let mut replay = settlement(&proof_id, ts + 1);
    replay.agent_id = "someone_else".to_string();
    let err = ledger.insert(&replay).await.unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(ref id) if *id == proof_id));

    let stored: Vec<_> = ledger
        .list_recent(50)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.proof_id == proof_id)
        .collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].agent_id, "weather_agent");
    assert_eq!(stored[0].timestamp, ts);
}

pub async fn check_exists(ledger: &dyn SettlementLedger) {
    let proof_id = unique("abc");
    assert!(!ledger.exists(&proof_id).await.unwrap());
    ledger.insert(&settlement(&proof_id, 1)).await.unwrap();
    assert!(ledger.exists(&proof_id).await.unwrap());
    assert!(!ledger.exists(&proof_id.to_uppercase()).await.unwrap());
}

/// Newest first, ties broken by id.
pub async fn check_list_recent_order(ledger: &dyn SettlementLedger) {
    let base = fresh_timestamp();
    let t1 = unique("t1");
    let t2 = unique("t2");
    let t3 = unique("t3");
    let tie = unique("tie");
    ledger.insert(&settlement(&t2, base + 200)).await.unwrap();
    ledger.insert(&settlement(&t1, base + 100)).await.unwrap();
    ledger.insert(&settlement(&t3, base + 300)).await.unwrap();

    let rows = ledger.list_recent(2).await.unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.proof_id.as_str()).collect();
    assert_eq!(ids, vec![t3.as_str(), t2.as_str()]);
    assert!(!rows[0].created_at.is_empty());

    ledger.insert(&settlement(&tie, base + 300)).await.unwrap();
    let rows = ledger.list_recent(2).await.unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.proof_id.as_str()).collect();
    assert_eq!(ids, vec![tie.as_str(), t3.as_str()]);
}

pub async fn check_status_reports_schema(ledger: &dyn SettlementLedger, backend: BackendKind) {
    ledger.insert(&settlement(&unique("status"), 1)).await.unwrap();
    let status = ledger.status().await.unwrap();
    assert_eq!(status.backend, backend);
    assert!(status.row_count >= 1);
    let proof = status.columns.iter().find(|c| c.name == "proof_id").unwrap();
    assert!(proof.notnull);
    let reason = status.columns.iter().find(|c| c.name == "block_reason").unwrap();
    assert!(!reason.notnull);
    assert!(status.columns.iter().any(|c| c.name == "gas_used"));
}

/// A backend whose calls never complete, like a peer that stopped answering.
#[derive(Default)]
pub struct StallingLedger {
    /// Answer `exists` with `false` and stall only on writes.
    pub stall_writes_only: bool,
}

#[async_trait]
impl SettlementLedger for StallingLedger {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn insert(&self, _record: &NewSettlement) -> Result<i64, LedgerError> {
        std::future::pending().await
    }

    async fn exists(&self, _proof_id: &str) -> Result<bool, LedgerError> {
        if self.stall_writes_only {
            return Ok(false);
        }
        std::future::pending().await
    }

    async fn list_recent(&self, _limit: u32) -> Result<Vec<SettlementRecord>, LedgerError> {
        std::future::pending().await
    }

    async fn status(&self) -> Result<LedgerStatus, LedgerError> {
        std::future::pending().await
    }
}
