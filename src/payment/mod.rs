//! HTTP 402 payment protocol
//!
//! - [`challenge`] prices resources and builds 402 bodies
//! - [`verifier`] checks proofs against challenge terms (simulated or live)
//! - [`gate`] ties verification to the settlement ledger
//! - [`executor`] is the caller side: pay the challenge and retry

pub mod amount;
pub mod challenge;
pub mod executor;
pub mod gate;
pub mod proof;
pub mod verifier;

pub use amount::{AmountError, UsdcAmount};
pub use challenge::{ChallengeBody, ChallengeError, ChallengeIssuer, PricedResource, ResourceChallenge};
pub use executor::{
    OnChainSettler, PaymentError, PaymentExecutor, PaymentOrder, ResourceResponse, Settler,
    SimulatedSettler, PAYMENT_PROOF_HEADER,
};
pub use gate::{Admission, GateError, PaymentGate};
pub use proof::PaymentProof;
pub use verifier::{
    ExpectedTerms, LiveVerifier, ProofVerifier, Rejection, SettlementMode, SimulatedVerifier,
    VerifiedSettlement,
};
