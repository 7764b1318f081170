use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://db/transactions.db";
pub const DEFAULT_RECIPIENT: &str = "0x61254AEcF84eEdb890f07dD29f7F3cd3b8Eb2CBe";
pub const DEFAULT_USDC_ADDRESS: &str = "0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub payment: PaymentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Bound on every ledger operation, in seconds.
    pub io_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn io_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.io_timeout_secs)
    }
}

#[derive(Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub vault_address: Option<String>,
    pub chain_id: u64,
    pub network_name: String,
    pub explorer_tx_url: String,
    pub gas_limit: u64,
    pub receipt_timeout_secs: u64,
}

// The signing key must never reach the logs.
impl std::fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("vault_address", &self.vault_address)
            .field("chain_id", &self.chain_id)
            .field("network_name", &self.network_name)
            .field("explorer_tx_url", &self.explorer_tx_url)
            .field("gas_limit", &self.gas_limit)
            .field("receipt_timeout_secs", &self.receipt_timeout_secs)
            .finish()
    }
}

impl ChainConfig {
    /// True when everything needed to read receipts from the settlement contract is present.
    pub fn can_verify(&self) -> bool {
        self.rpc_url.is_some() && self.vault_address.is_some()
    }

    pub fn receipt_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.receipt_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub simulation: bool,
    pub token_symbol: String,
    pub token_address: String,
    pub recipient: String,
    pub agent_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            server: ServerConfig {
                port: var("PORT", "8000").parse().context("PORT must be a port number")?,
                host: var("HOST", "0.0.0.0"),
                cors_allowed_origins: var("ALLOWED_ORIGINS", "*")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            database: DatabaseConfig {
                url: var("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: var("DB_MAX_CONNECTIONS", "10")
                    .parse()
                    .context("DB_MAX_CONNECTIONS must be an integer")?,
                min_connections: var("DB_MIN_CONNECTIONS", "1")
                    .parse()
                    .context("DB_MIN_CONNECTIONS must be an integer")?,
                io_timeout_secs: var("DB_TIMEOUT_SECS", "10")
                    .parse()
                    .context("DB_TIMEOUT_SECS must be an integer")?,
            },
            chain: ChainConfig {
                rpc_url: optional("CHAIN_RPC_URL").or_else(|| optional("ALCHEMY_RPC")),
                private_key: optional("PRIVATE_KEY"),
                vault_address: optional("AGENT_VAULT_ADDRESS"),
                chain_id: var("CHAIN_ID", "80002").parse().context("CHAIN_ID must be an integer")?,
                network_name: var("NETWORK_NAME", "Polygon Amoy Testnet"),
                explorer_tx_url: var("EXPLORER_TX_URL", "https://amoy.polygonscan.com/tx/"),
                gas_limit: var("GAS_LIMIT", "300000").parse().context("GAS_LIMIT must be an integer")?,
                receipt_timeout_secs: var("RECEIPT_TIMEOUT_SECS", "180")
                    .parse()
                    .context("RECEIPT_TIMEOUT_SECS must be an integer")?,
            },
            payment: PaymentConfig {
                simulation: var("MOCK_PAYMENT", "false")
                    .to_lowercase()
                    .parse()
                    .context("MOCK_PAYMENT must be true or false")?,
                token_symbol: var("TOKEN_SYMBOL", "USDC"),
                token_address: var("USDC_ADDRESS", DEFAULT_USDC_ADDRESS),
                recipient: var("PAYMENT_RECIPIENT", DEFAULT_RECIPIENT),
                agent_id: var("PAYMENT_AGENT_ID", "weather_agent"),
            },
        })
    }

    pub fn mode_name(&self) -> &'static str {
        if self.payment.simulation {
            "simulation"
        } else {
            "live"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.cors_allowed_origins, vec!["*".to_string()]);
        assert_eq!(config.database.url, DEFAULT_DATABASE_URL);
        assert!(!config.payment.simulation);
        assert_eq!(config.chain.chain_id, 80002);
        assert_eq!(config.chain.receipt_timeout_secs, 180);
        assert_eq!(config.database.io_timeout(), std::time::Duration::from_secs(10));
        assert!(!config.chain.can_verify());
        assert_eq!(config.mode_name(), "live");
    }

    #[test]
    fn test_mock_flag_is_case_insensitive() {
        let config = config_from(&[("MOCK_PAYMENT", "TRUE")]).unwrap();
        assert!(config.payment.simulation);
        assert_eq!(config.mode_name(), "simulation");
    }

    #[test]
    fn test_invalid_numbers_fail() {
        assert!(config_from(&[("PORT", "eighty")]).is_err());
        assert!(config_from(&[("MOCK_PAYMENT", "maybe")]).is_err());
        assert!(config_from(&[("DB_TIMEOUT_SECS", "soon")]).is_err());
    }

    #[test]
    fn test_rpc_alias_and_origins() {
        let config = config_from(&[
            ("ALCHEMY_RPC", "https://rpc.example"),
            ("AGENT_VAULT_ADDRESS", "0x0000000000000000000000000000000000000001"),
            ("ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
        ])
        .unwrap();
        assert_eq!(config.chain.rpc_url.as_deref(), Some("https://rpc.example"));
        assert!(config.chain.can_verify());
        assert_eq!(config.server.cors_allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_private_key_is_redacted() {
        let config = config_from(&[("PRIVATE_KEY", "deadbeef")]).unwrap();
        let rendered = format!("{:?}", config.chain);
        assert!(!rendered.contains("deadbeef"));
        assert!(rendered.contains("<redacted>"));
    }
}
