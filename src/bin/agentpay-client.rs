//! agentpay-client: fetch a paid endpoint, settling its 402 challenge on the way.

use agentpay::chain::{ChainClient, EthersChainClient};
use agentpay::config::Config;
use agentpay::payment::{OnChainSettler, PaymentExecutor, Settler, SimulatedSettler};
use agentpay::utils::init_tracing;
use anyhow::{bail, Context};
use clap::builder::BoolishValueParser;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

/// Pay-per-request client.
#[derive(Parser, Debug)]
#[command(name = "agentpay-client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Paid endpoint, e.g. http://localhost:8000/api/weather
    #[arg(long)]
    endpoint: String,

    /// Agent identity tagged on the payment.
    #[arg(long, default_value = "weather_agent")]
    agent_id: String,

    /// Pay with synthetic MOCK_TX proofs instead of the chain.
    /// Reads MOCK_PAYMENT the way the server does (`TRUE`, `1`, `yes` all count).
    #[arg(long, env = "MOCK_PAYMENT", value_parser = BoolishValueParser::new())]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let settler: Arc<dyn Settler> = if cli.simulate {
        Arc::new(SimulatedSettler)
    } else {
        let client = EthersChainClient::from_config(&config.chain)?
            .context("CHAIN_RPC_URL and AGENT_VAULT_ADDRESS are required for on-chain payment")?;
        if client.signer_address().is_none() {
            bail!("PRIVATE_KEY is required for on-chain payment");
        }
        let chain: Arc<dyn ChainClient> = Arc::new(client);
        Arc::new(OnChainSettler::new(
            chain,
            config.chain.gas_limit,
            config.chain.receipt_timeout(),
        ))
    };

    info!(endpoint = %cli.endpoint, agent_id = %cli.agent_id, mode = %settler.mode(), "Fetching paid resource");
    let executor = PaymentExecutor::new(settler);
    let response = executor.settle_and_fetch(&cli.endpoint, &cli.agent_id).await?;

    if let Some(proof) = &response.payment_proof {
        info!(proof = %proof, "Paid");
    }
    println!("{}", serde_json::to_string_pretty(&response.body)?);

    if !(200..300).contains(&response.status) {
        bail!("endpoint returned HTTP {}", response.status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: it owns MOCK_PAYMENT for this binary's test process.
    #[test]
    fn test_simulate_flag_and_env() {
        std::env::remove_var("MOCK_PAYMENT");
        let cli = Cli::try_parse_from(["agentpay-client", "--endpoint", "http://localhost:8000/api/weather"]).unwrap();
        assert!(!cli.simulate);
        assert_eq!(cli.agent_id, "weather_agent");

        let cli = Cli::try_parse_from(["agentpay-client", "--endpoint", "x", "--simulate"]).unwrap();
        assert!(cli.simulate);

        for (value, expected) in [("TRUE", true), ("true", true), ("1", true), ("False", false)] {
            std::env::set_var("MOCK_PAYMENT", value);
            let cli = Cli::try_parse_from(["agentpay-client", "--endpoint", "x"]).unwrap();
            assert_eq!(cli.simulate, expected, "MOCK_PAYMENT={value}");
        }
        std::env::remove_var("MOCK_PAYMENT");
    }
}
