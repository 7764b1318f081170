use crate::chain::{ChainClient, EthersChainClient};
use crate::config::Config;
use crate::db::{
    self, BoundedLedger, NewSettlement, SettlementLedger, SettlementRecord, SettlementStatus,
};
use crate::payment::{
    ChallengeIssuer, LiveVerifier, OnChainSettler, PaymentGate, ProofVerifier, SimulatedVerifier,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub gate: Arc<PaymentGate>,
    pub ledger: Arc<dyn SettlementLedger>,
    /// Present in live mode when an RPC endpoint and vault address are configured.
    pub chain: Option<Arc<dyn ChainClient>>,
    /// Present when the chain client also holds a signing credential.
    pub settler: Option<Arc<OnChainSettler>>,
}

impl AppState {
    /// Open the configured ledger and wire everything else around it.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let ledger = db::connect(&config.database).await?;
        Self::with_ledger(config, ledger)
    }

    /// Select the verifier once, from the configured mode. Every ledger call
    /// is bounded by `DB_TIMEOUT_SECS`.
    pub fn with_ledger(config: Config, ledger: Arc<dyn SettlementLedger>) -> anyhow::Result<Self> {
        let ledger: Arc<dyn SettlementLedger> =
            Arc::new(BoundedLedger::new(ledger, config.database.io_timeout()));
        let issuer = ChallengeIssuer::from_config(&config.payment, &config.chain.network_name)?;

        let client = if config.payment.simulation {
            None
        } else {
            EthersChainClient::from_config(&config.chain)?
        };
        let can_sign = client.as_ref().is_some_and(|c| c.signer_address().is_some());
        let chain: Option<Arc<dyn ChainClient>> = client.map(|c| Arc::new(c) as Arc<dyn ChainClient>);

        let verifier: Arc<dyn ProofVerifier> = match (&chain, config.payment.simulation) {
            (_, true) => Arc::new(SimulatedVerifier),
            (Some(chain), false) => Arc::new(LiveVerifier::new(
                chain.clone(),
                config.chain.receipt_timeout(),
            )),
            (None, false) => {
                warn!("Live mode without CHAIN_RPC_URL/AGENT_VAULT_ADDRESS; paid requests will fail");
                Arc::new(LiveVerifier::unconfigured())
            }
        };

        let settler = match &chain {
            Some(chain) if can_sign => Some(Arc::new(OnChainSettler::new(
                chain.clone(),
                config.chain.gas_limit,
                config.chain.receipt_timeout(),
            ))),
            _ => None,
        };

        info!(
            mode = config.mode_name(),
            backend = %ledger.backend(),
            chain = chain.is_some(),
            signer = settler.is_some(),
            "Application state ready"
        );

        Ok(Self {
            gate: Arc::new(PaymentGate::new(issuer, verifier, ledger.clone())),
            config,
            ledger,
            chain,
            settler,
        })
    }

    pub fn tx_url(&self, proof_id: &str) -> String {
        format!("{}{}", self.config.chain.explorer_tx_url, proof_id)
    }
}

/// Body of `POST /transactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub agent_id: String,
    pub recipient: String,
    pub amount_usdc: f64,
    #[serde(alias = "tx_hash")]
    pub proof_id: String,
    pub status: SettlementStatus,
    #[serde(default)]
    pub block_reason: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct TransactionSaved {
    pub id: i64,
    pub message: String,
    #[serde(flatten)]
    pub transaction: NewSettlement,
}

/// A ledger row as listed over HTTP.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub record: SettlementRecord,
    pub tx_url: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionList {
    pub transactions: Vec<TransactionView>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionList {
    pub executions: Vec<TransactionView>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub network: String,
    pub database: String,
    pub mode: String,
    pub mock_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct NetworkInfo {
    pub chain: String,
    pub chain_id: u64,
    pub mode: String,
    pub settlement_contract: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VaultBalance {
    pub agent_id: String,
    pub balance_usdc: String,
}

/// Optional body of `POST /execute-demo`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteDemoRequest {
    pub agent_id: Option<String>,
    pub recipient: Option<String>,
    pub amount: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteDemoResponse {
    pub tx_hash: String,
    pub record_id: i64,
    pub block_number: u64,
    pub gas_used: u64,
}
