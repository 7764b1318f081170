//! Chain client boundary
//!
//! The payment core never talks to a node directly. It goes through
//! [`ChainClient`], which exposes exactly what settlement needs:
//!
//! - reading receipts and decoding `PaymentExecuted` events from them
//! - sequence number / gas price / chain id for building a payment
//! - submitting a signed payment and waiting (bounded) for its receipt
//!
//! [`vault::EthersChainClient`] is the production implementation. Tests use an
//! in-memory fake.

pub mod vault;

use async_trait::async_trait;
use ethers::types::{Address, Log, H256, U256};
use std::time::Duration;
use tracing::debug;

pub use vault::{EthersChainClient, PaymentExecutedFilter};

/// Interval between receipt polls while waiting for finality.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 32-byte agent identifier as it appears in on-chain events.
pub type AgentTag = [u8; 32];

/// Hash an agent identifier the way the settlement contract expects it.
pub fn agent_tag(agent_id: &str) -> AgentTag {
    ethers::utils::keccak256(agent_id.as_bytes())
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("contract call failed: {0}")]
    Contract(String),

    #[error("no signing credential configured")]
    MissingCredential,

    #[error("event decode failed: {0}")]
    Decode(String),

    #[error("no receipt for {tx_hash:#x} after {timeout:?}")]
    ReceiptTimeout { tx_hash: H256, timeout: Duration },

    #[error("invalid chain configuration: {0}")]
    Config(String),
}

/// The parts of a transaction receipt that settlement cares about.
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    pub tx_hash: H256,
    pub success: bool,
    pub to: Option<Address>,
    pub block_number: u64,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// One decoded `PaymentExecuted` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementEvent {
    pub agent_tag: AgentTag,
    pub recipient: Address,
    pub amount: U256,
    pub timestamp: U256,
}

impl From<PaymentExecutedFilter> for SettlementEvent {
    fn from(event: PaymentExecutedFilter) -> Self {
        Self {
            agent_tag: event.agent_id,
            recipient: event.recipient,
            amount: event.amount,
            timestamp: event.timestamp,
        }
    }
}

/// An unsigned payment to the settlement contract, fully parameterised.
#[derive(Debug, Clone)]
pub struct PaymentTransaction {
    pub agent_tag: AgentTag,
    pub recipient: Address,
    pub amount: U256,
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub chain_id: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the settlement contract this client is bound to.
    fn settlement_contract(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn current_gas_price(&self) -> Result<U256, ChainError>;

    /// Next usable sequence number for the client's signing credential.
    async fn next_sequence_number(&self) -> Result<U256, ChainError>;

    /// Sign and broadcast a payment. Returns the transaction hash.
    async fn submit_signed(&self, tx: PaymentTransaction) -> Result<H256, ChainError>;

    /// `Ok(None)` when the node does not know the transaction (yet).
    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<SettlementReceipt>, ChainError>;

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>, ChainError>;

    /// Balance held for an agent in the settlement contract, in micro-units.
    async fn vault_balance(&self, agent_tag: AgentTag) -> Result<U256, ChainError>;

    /// Poll for a receipt until it exists or `timeout` elapses.
    ///
    /// Giving up does not cancel the transaction; it may still confirm later.
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<SettlementReceipt, ChainError> {
        let poll = async {
            loop {
                if let Some(receipt) = self.get_receipt(tx_hash).await? {
                    return Ok(receipt);
                }
                debug!(tx_hash = %format!("{tx_hash:#x}"), "receipt not available yet");
                tokio::time::sleep(RECEIPT_POLL_INTERVAL.min(timeout)).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::ReceiptTimeout { tx_hash, timeout }),
        }
    }

    /// Decode every `PaymentExecuted` event the settlement contract emitted in `receipt`.
    ///
    /// Logs from other contracts are ignored. An error means no event could be decoded.
    fn decode_settlement_events(
        &self,
        receipt: &SettlementReceipt,
    ) -> Result<Vec<SettlementEvent>, ChainError> {
        decode_settlement_logs(self.settlement_contract(), &receipt.logs)
    }
}

pub fn decode_settlement_logs(
    contract: Address,
    logs: &[Log],
) -> Result<Vec<SettlementEvent>, ChainError> {
    let mut events = Vec::new();
    let mut last_error = None;

    for log in logs.iter().filter(|log| log.address == contract) {
        match ethers::contract::parse_log::<PaymentExecutedFilter>(log.clone()) {
            Ok(event) => events.push(event.into()),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    if events.is_empty() {
        return Err(ChainError::Decode(
            last_error.unwrap_or_else(|| "no PaymentExecuted event in receipt".to_string()),
        ));
    }
    Ok(events)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory chain used by verifier, executor and route tests.

    use super::*;
    use ethers::abi::{encode, Token};
    use ethers::contract::EthEvent;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub fn vault_address() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    /// ABI-encode a `PaymentExecuted` log as the contract at `contract` would emit it.
    pub fn payment_log(contract: Address, agent_id: &str, recipient: Address, amount: u64) -> Log {
        Log {
            address: contract,
            topics: vec![
                PaymentExecutedFilter::signature(),
                H256::from(agent_tag(agent_id)),
                H256::from(recipient),
            ],
            data: encode(&[
                Token::Uint(U256::from(amount)),
                Token::Uint(U256::from(1_700_000_000u64)),
            ])
            .into(),
            ..Default::default()
        }
    }

    pub fn receipt(tx_hash: H256, logs: Vec<Log>) -> SettlementReceipt {
        SettlementReceipt {
            tx_hash,
            success: true,
            to: Some(vault_address()),
            block_number: 42,
            gas_used: 51_000,
            logs,
        }
    }

    /// Serves canned receipts. Submitted payments confirm immediately.
    #[derive(Default)]
    pub struct FakeChain {
        pub receipts: Mutex<HashMap<H256, SettlementReceipt>>,
        pub submitted: Mutex<Vec<PaymentTransaction>>,
        pub revert_submissions: bool,
        pub never_confirm: bool,
    }

    impl FakeChain {
        pub fn with_receipt(receipt: SettlementReceipt) -> Self {
            let chain = Self::default();
            chain.insert(receipt);
            chain
        }

        pub fn insert(&self, receipt: SettlementReceipt) {
            self.receipts.lock().unwrap().insert(receipt.tx_hash, receipt);
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        fn settlement_contract(&self) -> Address {
            vault_address()
        }

        async fn chain_id(&self) -> Result<u64, ChainError> {
            Ok(80002)
        }

        async fn current_gas_price(&self) -> Result<U256, ChainError> {
            Ok(U256::from(30_000_000_000u64))
        }

        async fn next_sequence_number(&self) -> Result<U256, ChainError> {
            Ok(U256::from(self.submitted.lock().unwrap().len()))
        }

        async fn submit_signed(&self, tx: PaymentTransaction) -> Result<H256, ChainError> {
            let mut submitted = self.submitted.lock().unwrap();
            let tx_hash = H256::from_low_u64_be(0x1000 + submitted.len() as u64);
            let log = Log {
                address: vault_address(),
                topics: vec![
                    PaymentExecutedFilter::signature(),
                    H256::from(tx.agent_tag),
                    H256::from(tx.recipient),
                ],
                data: encode(&[Token::Uint(tx.amount), Token::Uint(U256::from(1_700_000_000u64))])
                    .into(),
                ..Default::default()
            };
            let mut confirmed = receipt(tx_hash, vec![log]);
            confirmed.success = !self.revert_submissions;
            if !self.never_confirm {
                self.receipts.lock().unwrap().insert(tx_hash, confirmed);
            }
            submitted.push(tx);
            Ok(tx_hash)
        }

        async fn get_receipt(&self, tx_hash: H256) -> Result<Option<SettlementReceipt>, ChainError> {
            Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
        }

        async fn block_timestamp(&self, _block_number: u64) -> Result<Option<u64>, ChainError> {
            Ok(Some(1_700_000_000))
        }

        async fn vault_balance(&self, _agent_tag: AgentTag) -> Result<U256, ChainError> {
            Ok(U256::from(12_340_000u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_agent_tag_is_keccak() {
        let tag = agent_tag("weather_agent");
        assert_eq!(tag, ethers::utils::keccak256(b"weather_agent"));
        assert_ne!(tag, agent_tag("other_agent"));
    }

    #[test]
    fn test_decode_filters_foreign_contracts() {
        let recipient = Address::from_low_u64_be(7);
        let logs = vec![
            payment_log(Address::from_low_u64_be(0xbad), "weather_agent", recipient, 1_000),
            payment_log(vault_address(), "weather_agent", recipient, 2_000),
        ];
        let events = decode_settlement_logs(vault_address(), &logs).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount, U256::from(2_000u64));
        assert_eq!(events[0].recipient, recipient);
        assert_eq!(events[0].agent_tag, agent_tag("weather_agent"));
    }

    #[test]
    fn test_decode_empty_receipt_fails() {
        let err = decode_settlement_logs(vault_address(), &[]).unwrap_err();
        assert!(matches!(err, ChainError::Decode(_)));
    }

    #[tokio::test]
    async fn test_wait_for_receipt_times_out() {
        let chain = FakeChain::default();
        let tx_hash = H256::from_low_u64_be(1);
        let err = chain
            .wait_for_receipt(tx_hash, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::ReceiptTimeout { .. }));
    }
}
