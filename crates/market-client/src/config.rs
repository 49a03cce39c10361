//! Client configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is a
//! valid (read-only, no markets) configuration.
//!
//! ```toml
//! rpc_url = "https://polygon-rpc.com"
//! wallet_rpc_url = "http://127.0.0.1:1248"
//! approval_ceiling = "1000000"
//!
//! [markets.btc-100k]
//! chain_id = 137
//! address = "0x1234567890123456789012345678901234567890"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::MarketError;
use crate::sequencer::DEFAULT_APPROVAL_CEILING_UNITS;
use crate::units::to_smallest_unit;
use crate::DEFAULT_TOKEN_DECIMALS;

/// Where one market's contract lives
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketDeployment {
    pub chain_id: u64,
    pub address: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Node used for all reads and receipt polling
    pub rpc_url: String,
    /// Injected wallet's JSON-RPC endpoint
    pub wallet_rpc_url: Option<String>,
    /// External wallet-connect bridge relay; preferred over the injected wallet
    pub bridge_rpc_url: Option<String>,
    /// WebSocket feed of wallet events (`accountsChanged`, `chainChanged`)
    pub wallet_events_url: Option<String>,
    pub poll_interval_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub token_decimals: u8,
    /// Allowance granted whenever a buy finds the current one too small, in
    /// whole collateral units. A large value saves an approval transaction on
    /// later buys but leaves the market contract a standing allowance over
    /// that much of the wallet's collateral. Set it to the largest amount you
    /// are willing to expose to the contract.
    pub approval_ceiling: String,
    /// Market id -> deployment. A missing id means "not deployed yet".
    pub markets: BTreeMap<String, MarketDeployment>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            wallet_rpc_url: None,
            bridge_rpc_url: None,
            wallet_events_url: None,
            poll_interval_secs: 10,
            receipt_poll_interval_ms: 1000,
            token_decimals: DEFAULT_TOKEN_DECIMALS,
            approval_ceiling: DEFAULT_APPROVAL_CEILING_UNITS.to_string(),
            markets: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml(&contents).with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.rpc_url).with_context(|| format!("rpc_url: {}", self.rpc_url))?;
        for (name, url) in [
            ("wallet_rpc_url", &self.wallet_rpc_url),
            ("bridge_rpc_url", &self.bridge_rpc_url),
            ("wallet_events_url", &self.wallet_events_url),
        ] {
            if let Some(url) = url {
                Url::parse(url).with_context(|| format!("{}: {}", name, url))?;
            }
        }

        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.token_decimals > 36 {
            bail!("token_decimals {} is out of range", self.token_decimals);
        }
        self.approval_ceiling_amount().context("approval_ceiling")?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Approval ceiling in the collateral's smallest unit
    pub fn approval_ceiling_amount(&self) -> Result<U256, MarketError> {
        to_smallest_unit(&self.approval_ceiling, self.token_decimals)
    }

    pub fn registry(&self) -> MarketRegistry {
        MarketRegistry::new(self.markets.clone())
    }
}

/// Static market id -> contract mapping
#[derive(Clone, Debug, Default)]
pub struct MarketRegistry {
    markets: BTreeMap<String, MarketDeployment>,
}

impl MarketRegistry {
    pub fn new(markets: BTreeMap<String, MarketDeployment>) -> Self {
        Self { markets }
    }

    pub fn get(&self, market_id: &str) -> Option<&MarketDeployment> {
        self.markets.get(market_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.markets.keys().map(String::as_str)
    }

    /// Contract address for reads; `None` if the market is not deployed
    pub fn address(&self, market_id: &str) -> Option<Address> {
        self.get(market_id).map(|d| d.address)
    }

    /// Contract address for writes from a session on `chain_id`.
    /// `Ok(None)` if not deployed, `NetworkMismatch` if deployed elsewhere.
    pub fn address_on_chain(&self, market_id: &str, chain_id: Option<u64>) -> Result<Option<Address>, MarketError> {
        let Some(deployment) = self.get(market_id) else {
            return Ok(None);
        };
        if chain_id != Some(deployment.chain_id) {
            return Err(MarketError::NetworkMismatch {
                market_id: market_id.to_string(),
                expected: deployment.chain_id,
                actual: chain_id,
            });
        }
        Ok(Some(deployment.address))
    }
}
