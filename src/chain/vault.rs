use super::{AgentTag, ChainClient, ChainError, PaymentTransaction, SettlementReceipt};
use crate::config::ChainConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tracing::{debug, info};

abigen!(
    AgentVault,
    r#"[
        function executePayment(bytes32 agentId, address recipient, uint256 amount) external
        function getBalance(bytes32 agentId) external view returns (uint256)
        event PaymentExecuted(bytes32 indexed agentId, address indexed recipient, uint256 amount, uint256 timestamp)
    ]"#
);

/// Chain client bound to one RPC endpoint, one settlement contract and
/// (optionally) one signing credential.
#[derive(Clone)]
pub struct EthersChainClient {
    provider: Arc<Provider<Http>>,
    vault: AgentVault<Provider<Http>>,
    vault_address: Address,
    wallet: Option<LocalWallet>,
}

impl EthersChainClient {
    /// Build a client from configuration. Returns `Ok(None)` when the RPC URL or
    /// contract address is missing.
    pub fn from_config(cfg: &ChainConfig) -> Result<Option<Self>> {
        let (Some(rpc_url), Some(vault_address)) = (&cfg.rpc_url, &cfg.vault_address) else {
            return Ok(None);
        };

        let provider = Provider::<Http>::try_from(rpc_url.as_str())
            .with_context(|| format!("invalid chain rpc url: {rpc_url}"))?;
        let provider = Arc::new(provider);

        let vault_address: Address = vault_address
            .parse()
            .context("invalid AGENT_VAULT_ADDRESS")?;
        if vault_address == Address::zero() {
            return Err(anyhow!("AGENT_VAULT_ADDRESS is zero; deploy the vault and update config"));
        }

        let wallet = match &cfg.private_key {
            Some(key) => Some(
                key.trim_start_matches("0x")
                    .parse::<LocalWallet>()
                    .context("failed parsing PRIVATE_KEY")?
                    .with_chain_id(cfg.chain_id),
            ),
            None => None,
        };

        let vault = AgentVault::new(vault_address, provider.clone());
        info!(
            vault = %format!("{vault_address:#x}"),
            signer = ?wallet.as_ref().map(|w| w.address()),
            "Chain client initialized"
        );

        Ok(Some(Self {
            provider,
            vault,
            vault_address,
            wallet,
        }))
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|w| w.address())
    }

    fn wallet(&self) -> Result<&LocalWallet, ChainError> {
        self.wallet.as_ref().ok_or(ChainError::MissingCredential)
    }
}

fn rpc_error(e: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(e.to_string())
}

#[async_trait]
impl ChainClient for EthersChainClient {
    fn settlement_contract(&self) -> Address {
        self.vault_address
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        let id = self.provider.get_chainid().await.map_err(rpc_error)?;
        Ok(id.as_u64())
    }

    async fn current_gas_price(&self) -> Result<U256, ChainError> {
        self.provider.get_gas_price().await.map_err(rpc_error)
    }

    async fn next_sequence_number(&self) -> Result<U256, ChainError> {
        let address = self.wallet()?.address();
        self.provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(rpc_error)
    }

    async fn submit_signed(&self, tx: PaymentTransaction) -> Result<H256, ChainError> {
        let wallet = self.wallet()?;
        let calldata = self
            .vault
            .execute_payment(tx.agent_tag, tx.recipient, tx.amount)
            .calldata()
            .ok_or_else(|| ChainError::Contract("failed to encode executePayment".to_string()))?;

        let request = TransactionRequest::new()
            .from(wallet.address())
            .to(self.vault_address)
            .data(calldata)
            .nonce(tx.nonce)
            .gas(tx.gas_limit)
            .gas_price(tx.gas_price)
            .chain_id(tx.chain_id);
        let typed: TypedTransaction = request.into();

        let signature = wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| ChainError::Contract(format!("signing failed: {e}")))?;
        let raw = typed.rlp_signed(&signature);

        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(rpc_error)?;
        let tx_hash = *pending;
        debug!(tx_hash = %format!("{tx_hash:#x}"), nonce = %tx.nonce, "Payment broadcast");
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<SettlementReceipt>, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(rpc_error)?;

        Ok(receipt.map(|r| SettlementReceipt {
            tx_hash: r.transaction_hash,
            success: r.status == Some(U64::from(1)),
            to: r.to,
            block_number: r.block_number.map(|b| b.as_u64()).unwrap_or(0),
            gas_used: r.gas_used.map(|g| g.low_u64()).unwrap_or(0),
            logs: r.logs,
        }))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>, ChainError> {
        let block = self
            .provider
            .get_block(BlockNumber::Number(block_number.into()))
            .await
            .map_err(rpc_error)?;
        Ok(block.map(|b| b.timestamp.low_u64()))
    }

    async fn vault_balance(&self, agent_tag: AgentTag) -> Result<U256, ChainError> {
        self.vault
            .get_balance(agent_tag)
            .call()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))
    }
}
