use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::client::network::chain_id_for;

/// Default cap on a single payment: 0.10 USDC in atomic units (6 decimals).
pub const DEFAULT_MAX_PAYMENT: u128 = 100_000;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub private_key: String,
    pub base_url: String,

    // x402 payment policy
    pub network: String,
    pub max_payment: u128,

    // Transport
    pub http_timeout: Duration,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            private_key: std::env::var("PRIVATE_KEY")
                .context("PRIVATE_KEY required")?,
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            network: std::env::var("X402_NETWORK")
                .unwrap_or_else(|_| "base-sepolia".to_string()),
            max_payment: std::env::var("X402_MAX_PAYMENT")
                .unwrap_or_else(|_| DEFAULT_MAX_PAYMENT.to_string())
                .parse()
                .context("Invalid X402_MAX_PAYMENT")?,

            http_timeout: Duration::from_secs(
                std::env::var("HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .context("Invalid HTTP_TIMEOUT_SECS")?,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http") {
            bail!("BASE_URL must be HTTP(S) URL");
        }

        if !self.private_key.starts_with("0x") {
            bail!("PRIVATE_KEY must start with 0x");
        }

        if chain_id_for(&self.network).is_none() {
            bail!("Unsupported X402_NETWORK: {}", self.network);
        }

        tracing::info!(
            "Configuration validated for {} (max payment: {} atomic units)",
            self.network,
            self.max_payment
        );

        Ok(())
    }
}
