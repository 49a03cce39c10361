//! `MarketGateway` over JSON-RPC
//!
//! Reads go through the node's `eth_call`. Writes are signed by the session's
//! wallet and confirmed by polling `eth_getTransactionReceipt` on the node.

use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::MarketGateway;
use crate::error::MarketError;
use crate::rpc::abi::{IPredictionMarket, IERC20};
use crate::rpc::{RpcClient, RpcError, TransactionReceipt, TransactionRequest};
use crate::types::{MarketInfo, Outcome, Side, TokenBalance, UserBalances};
use crate::wallet::Session;

/// Default interval between receipt polls
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct RpcGateway {
    rpc: RpcClient,
    receipt_poll_interval: Duration,
}

impl RpcGateway {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc, receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    async fn read<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, MarketError> {
        let out = self.rpc.call(to, call.abi_encode()).await.map_err(|e| {
            if e.is_rejection() {
                MarketError::ContractRead(format!("{} on {} reverted: {}", C::SIGNATURE, to, e.revert_reason()))
            } else {
                MarketError::Rpc(e)
            }
        })?;

        // A call to an address without code succeeds with empty output
        if out.is_empty() {
            return Err(MarketError::ContractRead(format!("no contract code at {} ({})", to, C::SIGNATURE)));
        }

        C::abi_decode_returns(&out)
            .map_err(|e| MarketError::ContractRead(format!("{} on {}: undecodable return: {}", C::SIGNATURE, to, e)))
    }

    /// Submit through the session's signer and wait for one confirmation
    async fn submit(&self, session: &Session, to: Address, data: Vec<u8>, label: &str) -> Result<TxHash, MarketError> {
        let (signer, from) = session.signer()?;
        let tx = TransactionRequest::new(from, to, data);

        let hash = signer.send_transaction(&tx).await.map_err(|e| write_error(label, e))?;
        info!("{} submitted via {}: {}", label, signer.name(), hash);

        let receipt = self.wait_for_receipt(hash).await;
        if receipt.succeeded() {
            info!("{} confirmed: {} (block {:?})", label, hash, receipt.block_number);
            return Ok(hash);
        }

        let reason = self.replay_revert_reason(&tx, &receipt).await;
        warn!("{} reverted: {} ({})", label, hash, reason);
        Err(MarketError::ActionReverted { reason })
    }

    /// Polls until the receipt exists. No client-side timeout.
    async fn wait_for_receipt(&self, hash: TxHash) -> TransactionReceipt {
        loop {
            match self.rpc.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => debug!("{} pending", hash),
                Err(e) => warn!("Receipt poll for {} failed, retrying: {}", hash, e),
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    /// Receipts carry no reason; re-run the call at the mined block to recover it
    async fn replay_revert_reason(&self, tx: &TransactionRequest, receipt: &TransactionReceipt) -> String {
        match self.rpc.call_as(tx, receipt.block_number).await {
            Err(e) if e.is_rejection() => e.revert_reason(),
            _ => "transaction reverted without a reason".to_string(),
        }
    }
}

fn write_error(label: &str, e: RpcError) -> MarketError {
    if e.is_rejection() {
        let reason = e.revert_reason();
        warn!("{} rejected: {}", label, reason);
        MarketError::ActionReverted { reason }
    } else {
        MarketError::Rpc(e)
    }
}

/// Redemption precondition: resolved market, winning side held, `0 < amount <= held`.
/// Returns the winning side.
pub fn validate_redemption(info: &MarketInfo, balances: &UserBalances, amount: U256) -> Result<Side, MarketError> {
    if !info.resolved {
        return Err(MarketError::InvalidRedemption("market is not resolved yet".to_string()));
    }
    let Some(winner) = info.result.side() else {
        return Err(MarketError::InvalidRedemption("market resolved without a winning outcome".to_string()));
    };
    if amount.is_zero() {
        return Err(MarketError::InvalidRedemption("amount must be greater than zero".to_string()));
    }

    let held = balances.for_side(winner);
    if held.is_zero() {
        return Err(MarketError::InvalidRedemption(format!(
            "no winning {} tokens to redeem",
            info.result.label()
        )));
    }
    if amount > held {
        return Err(MarketError::InvalidRedemption(format!("amount {} exceeds winning balance {}", amount, held)));
    }
    Ok(winner)
}

#[async_trait]
impl MarketGateway for RpcGateway {
    async fn get_market_info(&self, contract: Address) -> Result<MarketInfo, MarketError> {
        let ret = self.read(contract, IPredictionMarket::getMarketInfoCall {}).await?;
        let end_time = u64::try_from(ret._endTime)
            .map_err(|_| MarketError::ContractRead(format!("endTime out of range: {}", ret._endTime)))?;

        Ok(MarketInfo {
            question: ret._question,
            end_time,
            total_collateral: ret._totalCollateral,
            result: Outcome::from_u8(ret._result),
            resolved: ret._resolved,
            yes_token: ret._yesToken,
            no_token: ret._noToken,
        })
    }

    async fn get_user_balances(&self, contract: Address, account: Address) -> Result<UserBalances, MarketError> {
        let ret = self.read(contract, IPredictionMarket::getUserBalancesCall { user: account }).await?;
        Ok(UserBalances { yes_balance: ret.yesBalance, no_balance: ret.noBalance })
    }

    async fn get_token_total_supply(&self, token: Address) -> Result<U256, MarketError> {
        self.read(token, IERC20::totalSupplyCall {}).await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<TokenBalance, MarketError> {
        let (amount, decimals) =
            futures::try_join!(self.read(token, IERC20::balanceOfCall { owner }), self.read(token, IERC20::decimalsCall {}))?;
        Ok(TokenBalance { amount, decimals })
    }

    async fn get_current_oracle_price(&self, contract: Address) -> Result<U256, MarketError> {
        self.read(contract, IPredictionMarket::getCurrentPriceCall {})
            .await
            .map_err(|e| MarketError::OracleUnavailable(e.to_string()))
    }

    async fn collateral_token(&self, contract: Address) -> Result<Address, MarketError> {
        self.read(contract, IPredictionMarket::collateralCall {}).await
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, MarketError> {
        self.read(token, IERC20::allowanceCall { owner, spender }).await
    }

    async fn approve(
        &self,
        session: &Session,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash, MarketError> {
        let data = IERC20::approveCall { spender, amount }.abi_encode();
        self.submit(session, token, data, "approve").await
    }

    async fn buy(&self, session: &Session, contract: Address, side: Side, amount: U256) -> Result<TxHash, MarketError> {
        if amount.is_zero() {
            return Err(MarketError::InvalidInput("buy amount must be greater than zero".to_string()));
        }
        let data = IPredictionMarket::buyCall { yes: side.is_yes(), amount }.abi_encode();
        self.submit(session, contract, data, "buy").await
    }

    async fn redeem(&self, session: &Session, contract: Address, amount: U256) -> Result<TxHash, MarketError> {
        let (_, account) = session.signer()?;
        let (info, balances) =
            futures::try_join!(self.get_market_info(contract), self.get_user_balances(contract, account))?;
        validate_redemption(&info, &balances, amount)?;

        let data = IPredictionMarket::redeemCall { amount }.abi_encode();
        self.submit(session, contract, data, "redeem").await
    }

    async fn resolve_automatically(&self, session: &Session, contract: Address) -> Result<TxHash, MarketError> {
        let data = IPredictionMarket::resolveCall {}.abi_encode();
        self.submit(session, contract, data, "resolve").await
    }

    async fn resolve_manually(
        &self,
        session: &Session,
        contract: Address,
        result: Outcome,
    ) -> Result<TxHash, MarketError> {
        if result == Outcome::Unresolved {
            return Err(MarketError::InvalidInput("manual resolution needs YES or NO".to_string()));
        }
        let data = IPredictionMarket::resolveManuallyCall { result: U256::from(result.as_u8()) }.abi_encode();
        self.submit(session, contract, data, "resolveManually").await
    }
}
