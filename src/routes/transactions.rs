use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use std::time::Duration;
use tracing::{debug, info};

use crate::db::{NewSettlement, DEFAULT_LIST_LIMIT};
use crate::models::{
    AppState, ExecutionList, TransactionList, TransactionRequest, TransactionSaved, TransactionView,
};
use crate::payment::proof::parse_tx_hash;
use crate::types::AppResult;

/// Bound on the best-effort receipt lookup for manually reported transactions.
const ENRICH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/transactions", get(list_transactions).post(create_transaction))
        .route("/transactions/onchain", get(list_transactions))
        .route("/executions", get(list_executions))
        .with_state(state)
}

async fn recent(state: &AppState) -> AppResult<Vec<TransactionView>> {
    let records = state.ledger.list_recent(DEFAULT_LIST_LIMIT).await?;
    Ok(records
        .into_iter()
        .map(|record| TransactionView {
            tx_url: state.tx_url(&record.proof_id),
            record,
        })
        .collect())
}

pub async fn list_transactions(State(state): State<AppState>) -> AppResult<Json<TransactionList>> {
    Ok(Json(TransactionList {
        transactions: recent(&state).await?,
    }))
}

pub async fn list_executions(State(state): State<AppState>) -> AppResult<Json<ExecutionList>> {
    Ok(Json(ExecutionList {
        executions: recent(&state).await?,
    }))
}

/// Record a caller-reported settlement. Not part of the paid-request path.
pub async fn create_transaction(
    State(state): State<AppState>,
    Json(request): Json<TransactionRequest>,
) -> AppResult<Json<TransactionSaved>> {
    let tx_hash = parse_tx_hash(request.proof_id.trim());
    let proof_id = match tx_hash {
        Some(hash) => format!("{hash:#x}"),
        None => request.proof_id.trim().to_string(),
    };

    let mut block_number = 0;
    let mut gas_used = 0;
    if let (Some(hash), Some(chain), false) = (tx_hash, &state.chain, state.config.payment.simulation) {
        match tokio::time::timeout(ENRICH_TIMEOUT, chain.get_receipt(hash)).await {
            Ok(Ok(Some(receipt))) => {
                block_number = i64::try_from(receipt.block_number).unwrap_or(i64::MAX);
                gas_used = i64::try_from(receipt.gas_used).unwrap_or(i64::MAX);
            }
            _ => debug!(proof_id = %proof_id, "Receipt enrichment skipped"),
        }
    }

    let transaction = NewSettlement {
        agent_id: request.agent_id,
        recipient: request.recipient,
        amount_usdc: request.amount_usdc,
        proof_id,
        status: request.status,
        block_reason: request.block_reason,
        timestamp: request.timestamp,
        block_number,
        gas_used,
    };
    let id = state.ledger.insert(&transaction).await?;
    info!(id, proof_id = %transaction.proof_id, status = transaction.status.as_str(), "Transaction saved");

    Ok(Json(TransactionSaved {
        id,
        message: "Transaction saved successfully".to_string(),
        transaction,
    }))
}
