use ethers::types::H256;
use sha2::{Digest, Sha256};

/// Prefixes that mark a synthetic (simulation-only) proof token.
pub const SYNTHETIC_PREFIXES: [&str; 2] = ["0xMOCK_TX_", "MOCK_TX_"];

/// A caller-supplied proof of payment, classified by shape only.
///
/// Classification confers no trust: a `Transaction` still has to be resolved
/// against the chain and a `Synthetic` token is only meaningful in simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentProof {
    Synthetic(String),
    Transaction(H256),
    Malformed,
}

impl PaymentProof {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if SYNTHETIC_PREFIXES
            .iter()
            .any(|p| raw.strip_prefix(p).is_some_and(|rest| !rest.is_empty()))
        {
            return Self::Synthetic(raw.to_string());
        }

        match parse_tx_hash(raw) {
            Some(hash) => Self::Transaction(hash),
            None => Self::Malformed,
        }
    }

    /// The identifier the ledger stores for this proof before any chain lookup.
    ///
    /// Transaction hashes are lower-cased so case variants collide; synthetic
    /// tokens are normalised per agent (see [`simulated_settlement_id`]).
    pub fn ledger_key(&self, agent_id: &str) -> Option<String> {
        match self {
            Self::Transaction(hash) => Some(format!("{hash:#x}")),
            Self::Synthetic(token) => Some(simulated_settlement_id(agent_id, token)),
            Self::Malformed => None,
        }
    }
}

/// Accept exactly `0x` followed by 64 hex digits.
pub fn parse_tx_hash(raw: &str) -> Option<H256> {
    let digits = raw.strip_prefix("0x")?;
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    Some(H256::from_slice(&bytes))
}

/// Deterministic settlement id for a synthetic proof: `0x || sha256("<agent>:<token>")`.
pub fn simulated_settlement_id(agent_id: &str, token: &str) -> String {
    let digest = Sha256::digest(format!("{agent_id}:{token}").as_bytes());
    format!("0x{}", hex::encode(digest))
}
