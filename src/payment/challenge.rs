//! Challenge issuance
//!
//! Every paid resource has static pricing. When a request arrives without a
//! proof, the issuer turns that pricing into a [`ResourceChallenge`], which the
//! HTTP layer sends back as the body of a 402 response.

use super::amount::{AmountError, UsdcAmount};
use crate::config::PaymentConfig;
use ethers::types::Address;
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

pub const PAYMENT_REQUIRED: &str = "Payment Required";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    /// The challenge would advertise a rounded price that no longer matches
    /// what the verifier expects on-chain.
    #[error("price {amount} USDC of `{resource_id}` has more than 3 decimals")]
    InexactPrice { resource_id: String, amount: UsdcAmount },
}

/// Static terms for one paid resource.
#[derive(Debug, Clone)]
pub struct PricedResource {
    pub resource_id: String,
    pub amount: UsdcAmount,
    pub recipient: Address,
    /// Agent identity the server expects to find tagged on the payment event.
    pub agent_id: String,
    pub description: String,
    /// Body served once payment is accepted.
    pub payload: serde_json::Value,
}

/// What must be paid, to whom and in what token to unlock one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceChallenge {
    pub resource_id: String,
    pub amount: UsdcAmount,
    pub token_symbol: String,
    pub token_address: String,
    pub network_name: String,
    pub recipient: Address,
    pub description: String,
}

/// Wire form of a challenge (the 402 body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeBody {
    pub error: String,
    pub amount: String,
    pub token: String,
    pub token_address: String,
    pub network: String,
    pub recipient: String,
    pub description: String,
}

impl From<&ResourceChallenge> for ChallengeBody {
    fn from(challenge: &ResourceChallenge) -> Self {
        Self {
            error: PAYMENT_REQUIRED.to_string(),
            amount: challenge.amount.challenge_string(),
            token: challenge.token_symbol.clone(),
            token_address: challenge.token_address.clone(),
            network: challenge.network_name.clone(),
            recipient: to_checksum(&challenge.recipient, None),
            description: challenge.description.clone(),
        }
    }
}

impl ChallengeBody {
    pub fn amount(&self) -> Result<UsdcAmount, AmountError> {
        UsdcAmount::parse(&self.amount)
    }

    pub fn recipient_address(&self) -> Option<Address> {
        self.recipient.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct ChallengeIssuer {
    token_symbol: String,
    token_address: String,
    network_name: String,
    resources: BTreeMap<String, PricedResource>,
}

impl ChallengeIssuer {
    pub fn new(
        token_symbol: impl Into<String>,
        token_address: impl Into<String>,
        network_name: impl Into<String>,
    ) -> Self {
        Self {
            token_symbol: token_symbol.into(),
            token_address: token_address.into(),
            network_name: network_name.into(),
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, resource: PricedResource) -> Result<Self, ChallengeError> {
        if !resource.amount.fits_challenge() {
            return Err(ChallengeError::InexactPrice {
                resource_id: resource.resource_id,
                amount: resource.amount,
            });
        }
        self.resources.insert(resource.resource_id.clone(), resource);
        Ok(self)
    }

    /// The default catalog: per-request weather and market data.
    pub fn from_config(payment: &PaymentConfig, network_name: &str) -> anyhow::Result<Self> {
        let recipient: Address = payment
            .recipient
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid PAYMENT_RECIPIENT {}: {}", payment.recipient, e))?;

        Ok(Self::new(&payment.token_symbol, &payment.token_address, network_name)
            .with_resource(PricedResource {
                resource_id: "weather".to_string(),
                amount: UsdcAmount::from_micro_units(1_000),
                recipient,
                agent_id: payment.agent_id.clone(),
                description: "Weather API - per request fee".to_string(),
                payload: json!({
                    "city": "Bangalore",
                    "temperature": "28C",
                    "condition": "Partly Cloudy",
                    "humidity": "65%",
                }),
            })?
            .with_resource(PricedResource {
                resource_id: "data-feed".to_string(),
                amount: UsdcAmount::from_micro_units(2_000),
                recipient,
                agent_id: payment.agent_id.clone(),
                description: "Data Feed API".to_string(),
                payload: json!({
                    "market": "crypto",
                    "btc_price": "45000",
                    "eth_price": "2800",
                    "trend": "bullish",
                }),
            })?)
    }

    pub fn resource(&self, resource_id: &str) -> Option<&PricedResource> {
        self.resources.get(resource_id)
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Build the challenge for a known resource. `None` for unknown ids.
    pub fn issue(&self, resource_id: &str) -> Option<ResourceChallenge> {
        let resource = self.resources.get(resource_id)?;
        Some(ResourceChallenge {
            resource_id: resource.resource_id.clone(),
            amount: resource.amount,
            token_symbol: self.token_symbol.clone(),
            token_address: self.token_address.clone(),
            network_name: self.network_name.clone(),
            recipient: resource.recipient,
            description: resource.description.clone(),
        })
    }
}
