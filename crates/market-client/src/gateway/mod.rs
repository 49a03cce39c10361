//! Market Contract Gateway
//!
//! Stateless typed operations against one market contract, its two outcome
//! tokens and its collateral token.
//!
//! # Reads
//! Read-only, idempotent and safe to reorder. Failures surface as
//! `ContractRead` (revert, no code) or `OracleUnavailable` (price feed).
//!
//! # Writes
//! Two-phase: submit through the session's signer, then wait for one
//! confirmation before returning the transaction hash. Reverts are reported
//! with the decoded reason verbatim and are never retried.
//!
//! Known limitation: the confirmation wait has no timeout and cannot be
//! cancelled once the wallet has accepted the transaction. A hung network
//! leaves the returned future pending.

mod rpc;

use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::error::MarketError;
use crate::types::{MarketInfo, Outcome, Side, TokenBalance, UserBalances};
use crate::wallet::Session;

pub use rpc::{validate_redemption, RpcGateway};

#[async_trait]
pub trait MarketGateway: Send + Sync {
    async fn get_market_info(&self, contract: Address) -> Result<MarketInfo, MarketError>;

    /// Zero balances for accounts that never traded this market
    async fn get_user_balances(&self, contract: Address, account: Address) -> Result<UserBalances, MarketError>;

    async fn get_token_total_supply(&self, token: Address) -> Result<U256, MarketError>;

    /// `balanceOf(owner)` with the token's `decimals()`
    async fn token_balance(&self, token: Address, owner: Address) -> Result<TokenBalance, MarketError>;

    /// Optional telemetry; callers must not block core state on it
    async fn get_current_oracle_price(&self, contract: Address) -> Result<U256, MarketError>;

    /// Collateral token the market pulls funds from
    async fn collateral_token(&self, contract: Address) -> Result<Address, MarketError>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, MarketError>;

    async fn approve(
        &self,
        session: &Session,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash, MarketError>;

    async fn buy(&self, session: &Session, contract: Address, side: Side, amount: U256) -> Result<TxHash, MarketError>;

    /// Fails with `InvalidRedemption` before any write unless the market is
    /// resolved and the account holds enough of the winning token
    async fn redeem(&self, session: &Session, contract: Address, amount: U256) -> Result<TxHash, MarketError>;

    /// Resolve from the oracle price (administrative)
    async fn resolve_automatically(&self, session: &Session, contract: Address) -> Result<TxHash, MarketError>;

    /// Override the outcome (administrative)
    async fn resolve_manually(
        &self,
        session: &Session,
        contract: Address,
        result: Outcome,
    ) -> Result<TxHash, MarketError>;
}
