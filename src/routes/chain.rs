//! Chain-facing endpoints: vault balance, network info and a server-side demo payment.

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use ethers::types::Address;
use ethers::utils::to_checksum;
use tracing::{info, warn};

use crate::chain::agent_tag;
use crate::db::{NewSettlement, SettlementStatus};
use crate::models::{AppState, ExecuteDemoRequest, ExecuteDemoResponse, NetworkInfo, VaultBalance};
use crate::payment::{PaymentOrder, UsdcAmount};
use crate::types::{AppError, AppResult};

const DEMO_AMOUNT: &str = "0.50";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/vault-balance", get(vault_balance))
        .route("/network-info", get(network_info))
        .route("/execute-demo", post(execute_demo))
        .with_state(state)
}

fn chain_unavailable() -> AppError {
    AppError::Misconfigured("Blockchain client is not configured".to_string())
}

pub async fn vault_balance(State(state): State<AppState>) -> AppResult<Json<VaultBalance>> {
    if state.config.payment.simulation {
        return Err(AppError::InvalidRequest(
            "Vault balance is unavailable in MOCK_MODE".to_string(),
        ));
    }
    let chain = state.chain.as_ref().ok_or_else(chain_unavailable)?;

    let agent_id = state.config.payment.agent_id.clone();
    let raw = chain.vault_balance(agent_tag(&agent_id)).await?;
    let balance = UsdcAmount::from_u256(raw)
        .map_err(|e| AppError::Internal(format!("vault balance out of range: {e}")))?;

    Ok(Json(VaultBalance {
        agent_id,
        balance_usdc: balance.to_fixed(2),
    }))
}

pub async fn network_info(State(state): State<AppState>) -> Json<NetworkInfo> {
    let chain = &state.config.chain;
    Json(NetworkInfo {
        chain: chain.network_name.clone(),
        chain_id: chain.chain_id,
        mode: state.config.mode_name().to_string(),
        settlement_contract: state.chain.as_ref().map(|c| to_checksum(&c.settlement_contract(), None)),
    })
}

/// Pay the settlement contract with the server's own credential and record the result.
pub async fn execute_demo(State(state): State<AppState>, body: Bytes) -> AppResult<Json<ExecuteDemoResponse>> {
    if state.config.payment.simulation {
        return Err(AppError::InvalidRequest(
            "Demo execution is disabled in MOCK_MODE".to_string(),
        ));
    }
    let settler = state.settler.as_ref().ok_or_else(chain_unavailable)?;

    let request: ExecuteDemoRequest = if body.is_empty() {
        ExecuteDemoRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(format!("invalid body: {e}")))?
    };

    let recipient = request
        .recipient
        .as_deref()
        .unwrap_or(&state.config.payment.recipient);
    let order = PaymentOrder {
        agent_id: request
            .agent_id
            .unwrap_or_else(|| state.config.payment.agent_id.clone()),
        recipient: recipient
            .parse::<Address>()
            .map_err(|_| AppError::InvalidRequest(format!("invalid recipient `{recipient}`")))?,
        amount: UsdcAmount::parse(request.amount.as_deref().unwrap_or(DEMO_AMOUNT))
            .map_err(|e| AppError::InvalidRequest(format!("invalid amount: {e}")))?,
    };

    let receipt = settler.pay(&order).await?;
    let tx_hash = format!("{:#x}", receipt.tx_hash);

    let events = settler
        .chain()
        .decode_settlement_events(&receipt)
        .map_err(|_| AppError::Internal("PaymentExecuted event not found".to_string()))?;
    let event = events
        .first()
        .ok_or_else(|| AppError::Internal("PaymentExecuted event not found".to_string()))?;

    let timestamp = match settler.chain().block_timestamp(receipt.block_number).await {
        Ok(Some(ts)) => i64::try_from(ts).unwrap_or(i64::MAX),
        Ok(None) => chrono::Utc::now().timestamp(),
        Err(e) => {
            warn!(tx_hash = %tx_hash, error = %e, "Block timestamp unavailable");
            chrono::Utc::now().timestamp()
        }
    };

    let amount = UsdcAmount::from_u256(event.amount).unwrap_or(order.amount);
    let record_id = state
        .ledger
        .insert(&NewSettlement {
            agent_id: order.agent_id.clone(),
            recipient: to_checksum(&event.recipient, None),
            amount_usdc: amount.as_f64(),
            proof_id: tx_hash.clone(),
            status: SettlementStatus::Success,
            block_reason: None,
            timestamp,
            block_number: i64::try_from(receipt.block_number).unwrap_or(i64::MAX),
            gas_used: i64::try_from(receipt.gas_used).unwrap_or(i64::MAX),
        })
        .await?;

    info!(tx_hash = %tx_hash, record_id, agent_id = %order.agent_id, "Demo payment recorded");

    Ok(Json(ExecuteDemoResponse {
        tx_hash,
        record_id,
        block_number: receipt.block_number,
        gas_used: receipt.gas_used,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::FakeChain;
    use crate::chain::ChainClient;
    use crate::config::Config;
    use crate::db::{SettlementLedger, SqliteLedger};
    use crate::payment::OnChainSettler;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn live_state(chain: Arc<FakeChain>) -> (AppState, Arc<SqliteLedger>) {
        let config = Config::from_vars(|_: &str| None::<String>).unwrap();
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let mut state = AppState::with_ledger(config, ledger.clone()).unwrap();
        let client: Arc<dyn ChainClient> = chain;
        state.settler = Some(Arc::new(OnChainSettler::new(
            client.clone(),
            300_000,
            Duration::from_secs(5),
        )));
        state.chain = Some(client);
        (state, ledger)
    }

    #[tokio::test]
    async fn test_execute_demo_records_payment() {
        let chain = Arc::new(FakeChain::default());
        let (state, ledger) = live_state(chain.clone());

        let Json(response) = execute_demo(State(state), Bytes::new()).await.unwrap();
        assert_eq!(response.block_number, 42);

        let rows = ledger.list_recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].proof_id, response.tx_hash);
        assert_eq!(rows[0].amount_usdc, 0.5);
        assert_eq!(rows[0].timestamp, 1_700_000_000);
        assert_eq!(chain.submitted.lock().unwrap()[0].amount, ethers::types::U256::from(500_000u64));
    }

    #[tokio::test]
    async fn test_execute_demo_custom_body() {
        let chain = Arc::new(FakeChain::default());
        let (state, _) = live_state(chain.clone());
        let body = Bytes::from(r#"{"agent_id":"other_agent","amount":"0.25"}"#);
        execute_demo(State(state), body).await.unwrap();

        let submitted = chain.submitted.lock().unwrap();
        assert_eq!(submitted[0].agent_tag, agent_tag("other_agent"));
        assert_eq!(submitted[0].amount, ethers::types::U256::from(250_000u64));
    }

    #[tokio::test]
    async fn test_vault_balance_two_decimals() {
        let (state, _) = live_state(Arc::new(FakeChain::default()));
        let Json(balance) = vault_balance(State(state)).await.unwrap();
        assert_eq!(balance.balance_usdc, "12.34");
        assert_eq!(balance.agent_id, "weather_agent");
    }

    #[tokio::test]
    async fn test_simulation_disables_chain_endpoints() {
        let vars: HashMap<&str, &str> = HashMap::from([("MOCK_PAYMENT", "true")]);
        let config = Config::from_vars(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        let state = AppState::with_ledger(config, Arc::new(SqliteLedger::open_in_memory().unwrap())).unwrap();

        let err = vault_balance(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        let err = execute_demo(State(state), Bytes::new()).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_live_without_chain_is_misconfigured() {
        let config = Config::from_vars(|_: &str| None::<String>).unwrap();
        let state = AppState::with_ledger(config, Arc::new(SqliteLedger::open_in_memory().unwrap())).unwrap();
        let err = vault_balance(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let err = execute_demo(State(state), Bytes::new()).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
