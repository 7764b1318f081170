//! Caller-side payment executor
//!
//! Drives the two-phase protocol against a paid endpoint:
//!
//! 1. request without proof
//! 2. on 402, settle the challenge through a [`Settler`]
//! 3. retry once with the proof in `X-Payment-Proof`
//!
//! The on-chain leg is never retried here. A timeout or a reverted payment is
//! returned to the caller, who decides whether to start a fresh cycle.

use super::amount::UsdcAmount;
use super::challenge::ChallengeBody;
use super::verifier::SettlementMode;
use crate::chain::{agent_tag, ChainClient, ChainError, PaymentTransaction, SettlementReceipt};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const PAYMENT_PROOF_HEADER: &str = "X-Payment-Proof";

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid payment challenge: {0}")]
    InvalidChallenge(String),

    #[error(transparent)]
    Chain(ChainError),

    #[error("payment {tx_hash:#x} not confirmed within {timeout:?}")]
    OnChainTimeout { tx_hash: H256, timeout: Duration },

    #[error("payment {tx_hash:#x} reverted")]
    SettlementFailed { tx_hash: H256 },
}

impl From<ChainError> for PaymentError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::ReceiptTimeout { tx_hash, timeout } => {
                PaymentError::OnChainTimeout { tx_hash, timeout }
            }
            other => PaymentError::Chain(other),
        }
    }
}

/// What a challenge asks the caller to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrder {
    pub agent_id: String,
    pub recipient: Address,
    pub amount: UsdcAmount,
}

impl PaymentOrder {
    pub fn from_challenge(agent_id: &str, challenge: &ChallengeBody) -> Result<Self, PaymentError> {
        let amount = challenge
            .amount()
            .map_err(|e| PaymentError::InvalidChallenge(format!("amount `{}`: {e}", challenge.amount)))?;
        let recipient = challenge.recipient_address().ok_or_else(|| {
            PaymentError::InvalidChallenge(format!("recipient `{}`", challenge.recipient))
        })?;
        Ok(Self {
            agent_id: agent_id.to_string(),
            recipient,
            amount,
        })
    }
}

/// Turns a payment order into a proof token.
#[async_trait]
pub trait Settler: Send + Sync {
    fn mode(&self) -> SettlementMode;

    async fn settle(&self, order: &PaymentOrder) -> Result<String, PaymentError>;
}

/// Issues synthetic `MOCK_TX_*` tokens without touching any chain.
#[derive(Debug, Default, Clone)]
pub struct SimulatedSettler;

#[async_trait]
impl Settler for SimulatedSettler {
    fn mode(&self) -> SettlementMode {
        SettlementMode::Simulation
    }

    async fn settle(&self, order: &PaymentOrder) -> Result<String, PaymentError> {
        let token = format!("MOCK_TX_{}", uuid::Uuid::new_v4().simple());
        debug!(agent_id = %order.agent_id, amount = %order.amount, token = %token, "Simulated settlement");
        Ok(token)
    }
}

/// Pays through the settlement contract with the chain client's credential.
///
/// Sequence-number lookup and submission happen under one lock so concurrent
/// payments from the same process never reuse a nonce. Waiting for the
/// receipt happens outside the lock.
pub struct OnChainSettler {
    chain: Arc<dyn ChainClient>,
    submit_lock: Mutex<()>,
    gas_limit: u64,
    receipt_timeout: Duration,
}

impl OnChainSettler {
    pub fn new(chain: Arc<dyn ChainClient>, gas_limit: u64, receipt_timeout: Duration) -> Self {
        Self {
            chain,
            submit_lock: Mutex::new(()),
            gas_limit,
            receipt_timeout,
        }
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Sign and broadcast the payment. Returns as soon as the node accepts it.
    pub async fn submit(&self, order: &PaymentOrder) -> Result<H256, PaymentError> {
        let _guard = self.submit_lock.lock().await;

        let nonce = self.chain.next_sequence_number().await?;
        let gas_price = self.chain.current_gas_price().await?;
        let chain_id = self.chain.chain_id().await?;

        let tx_hash = self
            .chain
            .submit_signed(PaymentTransaction {
                agent_tag: agent_tag(&order.agent_id),
                recipient: order.recipient,
                amount: order.amount.to_u256(),
                nonce,
                gas_price,
                gas_limit: self.gas_limit,
                chain_id,
            })
            .await?;

        info!(
            tx_hash = %format!("{tx_hash:#x}"),
            agent_id = %order.agent_id,
            amount = %order.amount,
            nonce = %nonce,
            "Payment submitted"
        );
        Ok(tx_hash)
    }

    /// Submit, then wait (bounded) for a successful receipt.
    pub async fn pay(&self, order: &PaymentOrder) -> Result<SettlementReceipt, PaymentError> {
        let tx_hash = self.submit(order).await?;

        let receipt = self.chain.wait_for_receipt(tx_hash, self.receipt_timeout).await?;
        if !receipt.success {
            warn!(tx_hash = %format!("{tx_hash:#x}"), "Payment reverted");
            return Err(PaymentError::SettlementFailed { tx_hash });
        }

        info!(
            tx_hash = %format!("{tx_hash:#x}"),
            block_number = receipt.block_number,
            gas_used = receipt.gas_used,
            "Payment confirmed"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl Settler for OnChainSettler {
    fn mode(&self) -> SettlementMode {
        SettlementMode::Live
    }

    async fn settle(&self, order: &PaymentOrder) -> Result<String, PaymentError> {
        let receipt = self.pay(order).await?;
        Ok(format!("{:#x}", receipt.tx_hash))
    }
}

/// Final response of a paid (or free) request.
#[derive(Debug, Clone)]
pub struct ResourceResponse {
    pub status: u16,
    pub body: Value,
    /// Proof attached to the retry, if a payment was made.
    pub payment_proof: Option<String>,
}

impl ResourceResponse {
    async fn read(response: reqwest::Response, payment_proof: Option<String>) -> Result<Self, PaymentError> {
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => Value::String(text),
        };
        Ok(Self {
            status,
            body,
            payment_proof,
        })
    }
}

pub struct PaymentExecutor {
    http: reqwest::Client,
    settler: Arc<dyn Settler>,
}

impl PaymentExecutor {
    pub fn new(settler: Arc<dyn Settler>) -> Self {
        Self::with_client(reqwest::Client::new(), settler)
    }

    pub fn with_client(http: reqwest::Client, settler: Arc<dyn Settler>) -> Self {
        Self { http, settler }
    }

    pub async fn settle_and_fetch(&self, endpoint: &str, agent_id: &str) -> Result<ResourceResponse, PaymentError> {
        let first = self.http.get(endpoint).send().await?;
        if first.status() != StatusCode::PAYMENT_REQUIRED {
            debug!(endpoint, status = %first.status(), "No payment required");
            return ResourceResponse::read(first, None).await;
        }

        let challenge: ChallengeBody = first
            .json()
            .await
            .map_err(|e| PaymentError::InvalidChallenge(e.to_string()))?;
        let order = PaymentOrder::from_challenge(agent_id, &challenge)?;
        info!(
            endpoint,
            amount = %challenge.amount,
            token = %challenge.token,
            recipient = %challenge.recipient,
            mode = %self.settler.mode(),
            "Payment challenge received"
        );

        let proof = self.settler.settle(&order).await?;

        let retry = self
            .http
            .get(endpoint)
            .header(PAYMENT_PROOF_HEADER, &proof)
            .send()
            .await?;
        ResourceResponse::read(retry, Some(proof)).await
    }
}
