//! Proof verification
//!
//! A verifier answers one question: does this proof settle these exact terms?
//! It has no side effects. Persisting the outcome (and therefore replay
//! protection) is the ledger's job, see [`super::gate`].
//!
//! Two implementations are selected once at startup:
//!
//! - [`SimulatedVerifier`] accepts only synthetic `MOCK_TX_*` tokens.
//! - [`LiveVerifier`] accepts only real transaction hashes and checks them
//!   against the settlement contract's receipts.

use super::amount::UsdcAmount;
use super::proof::{simulated_settlement_id, PaymentProof};
use crate::chain::{agent_tag, ChainClient};
use async_trait::async_trait;
use axum::http::StatusCode;
use ethers::types::{Address, H256};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    Simulation,
    Live,
}

impl fmt::Display for SettlementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementMode::Simulation => write!(f, "simulation"),
            SettlementMode::Live => write!(f, "live"),
        }
    }
}

/// Why a proof was not accepted. Each variant has a stable message and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Invalid payment proof format")]
    MalformedProof,

    #[error("{}", mode_mismatch_message(.verifier_mode))]
    ModeMismatch { verifier_mode: SettlementMode },

    #[error("Payment transaction not found")]
    ProofNotFound,

    #[error("Payment transaction failed")]
    SettlementFailed,

    #[error("Payment tx did not target AgentVault")]
    WrongTarget,

    #[error("Unable to decode payment event")]
    EventDecodeFailure,

    #[error("Payment proof does not match endpoint requirements")]
    TermsMismatch,

    #[error("Payment proof has already been used")]
    ReplayedProof,

    #[error("Payment verifier is not configured")]
    VerifierMisconfigured,
}

fn mode_mismatch_message(verifier_mode: &SettlementMode) -> &'static str {
    match verifier_mode {
        SettlementMode::Simulation => "Mock mode only accepts mock payment proofs",
        SettlementMode::Live => "Mock payment proofs are not accepted by the live verifier",
    }
}

impl Rejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Rejection::ReplayedProof => StatusCode::CONFLICT,
            Rejection::VerifierMisconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Rejection::MalformedProof
            | Rejection::ModeMismatch { .. }
            | Rejection::ProofNotFound
            | Rejection::SettlementFailed
            | Rejection::WrongTarget
            | Rejection::EventDecodeFailure
            | Rejection::TermsMismatch => StatusCode::PAYMENT_REQUIRED,
        }
    }
}

/// The terms a proof must settle, taken from the resource's challenge.
#[derive(Debug, Clone)]
pub struct ExpectedTerms {
    pub agent_id: String,
    pub recipient: Address,
    pub amount: UsdcAmount,
}

/// Result of a successful verification, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSettlement {
    pub proof_id: String,
    pub block_number: u64,
    pub gas_used: u64,
}

#[async_trait]
pub trait ProofVerifier: Send + Sync {
    fn mode(&self) -> SettlementMode;

    async fn verify(&self, proof: &str, terms: &ExpectedTerms) -> Result<VerifiedSettlement, Rejection>;
}

/// Accepts synthetic tokens only; never touches a chain.
#[derive(Debug, Default, Clone)]
pub struct SimulatedVerifier;

#[async_trait]
impl ProofVerifier for SimulatedVerifier {
    fn mode(&self) -> SettlementMode {
        SettlementMode::Simulation
    }

    async fn verify(&self, proof: &str, terms: &ExpectedTerms) -> Result<VerifiedSettlement, Rejection> {
        match PaymentProof::parse(proof) {
            PaymentProof::Synthetic(token) => Ok(VerifiedSettlement {
                proof_id: simulated_settlement_id(&terms.agent_id, &token),
                block_number: 0,
                gas_used: 0,
            }),
            PaymentProof::Malformed => Err(Rejection::MalformedProof),
            PaymentProof::Transaction(_) => Err(Rejection::ModeMismatch {
                verifier_mode: SettlementMode::Simulation,
            }),
        }
    }
}

/// Checks real transaction hashes against the settlement contract.
pub struct LiveVerifier {
    chain: Option<Arc<dyn ChainClient>>,
    lookup_timeout: Duration,
}

impl LiveVerifier {
    pub fn new(chain: Arc<dyn ChainClient>, lookup_timeout: Duration) -> Self {
        Self {
            chain: Some(chain),
            lookup_timeout,
        }
    }

    /// A live verifier with no chain behind it. Every well-formed proof is
    /// answered with [`Rejection::VerifierMisconfigured`].
    pub fn unconfigured() -> Self {
        Self {
            chain: None,
            lookup_timeout: Duration::ZERO,
        }
    }

    async fn verify_transaction(
        &self,
        chain: &dyn ChainClient,
        tx_hash: H256,
        terms: &ExpectedTerms,
    ) -> Result<VerifiedSettlement, Rejection> {
        let tx = format!("{tx_hash:#x}");

        let receipt = match tokio::time::timeout(self.lookup_timeout, chain.get_receipt(tx_hash)).await {
            Ok(Ok(Some(receipt))) => receipt,
            Ok(Ok(None)) => {
                debug!(tx_hash = %tx, "No receipt for payment proof");
                return Err(Rejection::ProofNotFound);
            }
            Ok(Err(e)) => {
                warn!(tx_hash = %tx, error = %e, "Receipt lookup failed");
                return Err(Rejection::ProofNotFound);
            }
            Err(_) => {
                warn!(tx_hash = %tx, timeout = ?self.lookup_timeout, "Receipt lookup timed out");
                return Err(Rejection::ProofNotFound);
            }
        };

        if !receipt.success {
            return Err(Rejection::SettlementFailed);
        }

        if receipt.to != Some(chain.settlement_contract()) {
            return Err(Rejection::WrongTarget);
        }

        let events = chain.decode_settlement_events(&receipt).map_err(|e| {
            debug!(tx_hash = %tx, error = %e, "No settlement event decoded");
            Rejection::EventDecodeFailure
        })?;

        let expected_tag = agent_tag(&terms.agent_id);
        let expected_amount = terms.amount.to_u256();
        let matched = events.iter().any(|event| {
            event.agent_tag == expected_tag
                && event.recipient == terms.recipient
                && event.amount == expected_amount
        });
        if !matched {
            debug!(tx_hash = %tx, events = events.len(), "No event matches the expected terms");
            return Err(Rejection::TermsMismatch);
        }

        Ok(VerifiedSettlement {
            proof_id: tx,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }
}

#[async_trait]
impl ProofVerifier for LiveVerifier {
    fn mode(&self) -> SettlementMode {
        SettlementMode::Live
    }

    async fn verify(&self, proof: &str, terms: &ExpectedTerms) -> Result<VerifiedSettlement, Rejection> {
        let tx_hash = match PaymentProof::parse(proof) {
            PaymentProof::Transaction(hash) => hash,
            PaymentProof::Malformed => return Err(Rejection::MalformedProof),
            PaymentProof::Synthetic(_) => {
                return Err(Rejection::ModeMismatch {
                    verifier_mode: SettlementMode::Live,
                })
            }
        };

        let chain = self.chain.as_deref().ok_or(Rejection::VerifierMisconfigured)?;
        self.verify_transaction(chain, tx_hash, terms).await
    }
}
