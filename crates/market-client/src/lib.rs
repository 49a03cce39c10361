//! On-chain client for binary-outcome prediction markets
//!
//! Observes and trades a YES/NO market deployed as a smart contract, with the
//! contract as the only source of truth:
//! - `wallet`: the live chain session (bridge, injected wallet or none)
//! - `gateway`: typed reads and confirmed writes against one market contract
//! - `probability`: implied odds from outcome-token supply
//! - `sync`: per-market polling into one published snapshot
//! - `sequencer`: allowance check, approval and action as one write
//! - `client`: keeps the tracked market in step with the session
//!
//! # Contract Interface
//! - Market: `getMarketInfo()`, `getUserBalances(address)`, `getCurrentPrice()`,
//!   `collateral()`, `buy(bool,uint256)`, `redeem(uint256)`, `resolve()`,
//!   `resolveManually(uint256)`
//! - Tokens: ERC20 `totalSupply()`, `balanceOf(address)`, `allowance(address,address)`,
//!   `approve(address,uint256)`

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod probability;
pub mod rpc;
pub mod sequencer;
pub mod sync;
pub mod types;
pub mod units;
pub mod wallet;

#[cfg(test)]
mod test_helpers;

pub use client::MarketClient;
pub use config::{ClientConfig, MarketDeployment, MarketRegistry};
pub use error::MarketError;
pub use gateway::{MarketGateway, RpcGateway};
pub use sequencer::{BuyReceipt, TransactionSequencer};
pub use sync::{MarketSynchronizer, SnapshotSubscription, DEFAULT_POLL_INTERVAL};
pub use types::*;
pub use wallet::{Session, SessionProvider, SessionSource, WalletEvent, WalletSource};

/// Decimals of the 6-decimal collateral stablecoin markets settle in
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;
