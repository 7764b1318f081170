//! Payment gate
//!
//! Puts the pieces together for one paid request: look up the resource, issue
//! a challenge when no proof is attached, otherwise verify the proof and record
//! it. A resource is released only after its settlement row is inserted.

use super::challenge::{ChallengeIssuer, PricedResource, ResourceChallenge};
use super::proof::PaymentProof;
use super::verifier::{ExpectedTerms, ProofVerifier, Rejection, SettlementMode};
use crate::db::{LedgerError, NewSettlement, SettlementLedger, SettlementStatus};
use ethers::utils::to_checksum;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("unknown resource `{0}`")]
    UnknownResource(String),

    /// No proof was attached. Not a failure: the caller should pay and retry.
    #[error("Payment Required")]
    PaymentRequired(Box<ResourceChallenge>),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Ledger(LedgerError),
}

/// A recorded settlement that unlocks one response.
#[derive(Debug, Clone)]
pub struct Admission {
    pub resource: PricedResource,
    pub record_id: i64,
    pub proof_id: String,
}

pub struct PaymentGate {
    issuer: ChallengeIssuer,
    verifier: Arc<dyn ProofVerifier>,
    ledger: Arc<dyn SettlementLedger>,
}

impl PaymentGate {
    pub fn new(
        issuer: ChallengeIssuer,
        verifier: Arc<dyn ProofVerifier>,
        ledger: Arc<dyn SettlementLedger>,
    ) -> Self {
        Self {
            issuer,
            verifier,
            ledger,
        }
    }

    pub fn mode(&self) -> SettlementMode {
        self.verifier.mode()
    }

    pub fn issuer(&self) -> &ChallengeIssuer {
        &self.issuer
    }

    pub async fn admit(&self, resource_id: &str, proof: Option<&str>) -> Result<Admission, GateError> {
        let (Some(resource), Some(challenge)) =
            (self.issuer.resource(resource_id), self.issuer.issue(resource_id))
        else {
            return Err(GateError::UnknownResource(resource_id.to_string()));
        };

        let Some(proof) = proof.map(str::trim).filter(|p| !p.is_empty()) else {
            debug!(resource = %resource_id, amount = %challenge.amount, "Issuing payment challenge");
            return Err(GateError::PaymentRequired(Box::new(challenge)));
        };

        if let Some(key) = PaymentProof::parse(proof).ledger_key(&resource.agent_id) {
            if self.ledger.exists(&key).await.map_err(GateError::Ledger)? {
                warn!(resource = %resource_id, proof_id = %key, "Replayed payment proof");
                return Err(Rejection::ReplayedProof.into());
            }
        }

        let terms = ExpectedTerms {
            agent_id: resource.agent_id.clone(),
            recipient: resource.recipient,
            amount: resource.amount,
        };
        let settled = self.verifier.verify(proof, &terms).await.map_err(|rejection| {
            warn!(resource = %resource_id, mode = %self.verifier.mode(), reason = %rejection, "Payment proof rejected");
            rejection
        })?;

        let record = NewSettlement {
            agent_id: resource.agent_id.clone(),
            recipient: to_checksum(&resource.recipient, None),
            amount_usdc: resource.amount.as_f64(),
            proof_id: settled.proof_id.clone(),
            status: SettlementStatus::Success,
            block_reason: None,
            timestamp: chrono::Utc::now().timestamp(),
            block_number: i64::try_from(settled.block_number).unwrap_or(i64::MAX),
            gas_used: i64::try_from(settled.gas_used).unwrap_or(i64::MAX),
        };

        let record_id = match self.ledger.insert(&record).await {
            Ok(id) => id,
            Err(LedgerError::Conflict(proof_id)) => {
                warn!(resource = %resource_id, proof_id = %proof_id, "Lost insert race for payment proof");
                return Err(Rejection::ReplayedProof.into());
            }
            Err(e) => return Err(GateError::Ledger(e)),
        };

        info!(
            resource = %resource_id,
            record_id,
            proof_id = %settled.proof_id,
            block_number = settled.block_number,
            "Payment settled"
        );

        Ok(Admission {
            resource: resource.clone(),
            record_id,
            proof_id: settled.proof_id,
        })
    }
}
