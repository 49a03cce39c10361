//! Transaction Sequencer
//!
//! Orders the dependent steps of a write. A buy pulls collateral from the
//! sender, so it runs as:
//! 1. Read the collateral token and the current allowance for the market
//! 2. If short, `approve` and wait for it to confirm
//! 3. Submit the buy and wait for it to confirm
//!
//! A failed approval aborts before the buy is attempted and is reported as
//! `ApprovalFailed`, apart from failures of the buy itself. Writes from one
//! sequencer never overlap, so two buys cannot race on the same allowance.

use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::MarketError;
use crate::gateway::MarketGateway;
use crate::types::{Outcome, Side};
use crate::wallet::Session;

/// Default approval ceiling in whole collateral units
pub const DEFAULT_APPROVAL_CEILING_UNITS: u64 = 1_000_000;

/// Receipts for a sequenced buy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuyReceipt {
    /// Present only when the allowance had to be raised
    pub approval: Option<TxHash>,
    pub buy: TxHash,
}

pub struct TransactionSequencer {
    gateway: Arc<dyn MarketGateway>,
    /// Allowance granted when a raise is needed, so repeat buys skip the approval
    approval_ceiling: U256,
    write_lock: Mutex<()>,
}

impl TransactionSequencer {
    pub fn new(gateway: Arc<dyn MarketGateway>, approval_ceiling: U256) -> Self {
        Self { gateway, approval_ceiling, write_lock: Mutex::new(()) }
    }

    pub fn approval_ceiling(&self) -> U256 {
        self.approval_ceiling
    }

    /// Buy `amount` (smallest collateral unit) of `side`, approving collateral first if needed
    pub async fn buy(
        &self,
        session: &Session,
        contract: Address,
        side: Side,
        amount: U256,
    ) -> Result<BuyReceipt, MarketError> {
        let (_, owner) = session.signer()?;
        if amount.is_zero() {
            return Err(MarketError::InvalidInput("buy amount must be greater than zero".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let approval = self.ensure_allowance(session, contract, owner, amount).await?;

        info!("Buying {:?} {} on {}", side, amount, contract);
        let buy = self.gateway.buy(session, contract, side, amount).await?;
        Ok(BuyReceipt { approval, buy })
    }

    pub async fn redeem(&self, session: &Session, contract: Address, amount: U256) -> Result<TxHash, MarketError> {
        session.signer()?;
        let _guard = self.write_lock.lock().await;
        info!("Redeeming {} on {}", amount, contract);
        self.gateway.redeem(session, contract, amount).await
    }

    pub async fn resolve_automatically(&self, session: &Session, contract: Address) -> Result<TxHash, MarketError> {
        session.signer()?;
        let _guard = self.write_lock.lock().await;
        info!("Resolving {} from oracle", contract);
        self.gateway.resolve_automatically(session, contract).await
    }

    pub async fn resolve_manually(
        &self,
        session: &Session,
        contract: Address,
        result: Outcome,
    ) -> Result<TxHash, MarketError> {
        session.signer()?;
        let _guard = self.write_lock.lock().await;
        info!("Resolving {} manually as {}", contract, result.label());
        self.gateway.resolve_manually(session, contract, result).await
    }

    async fn ensure_allowance(
        &self,
        session: &Session,
        contract: Address,
        owner: Address,
        amount: U256,
    ) -> Result<Option<TxHash>, MarketError> {
        let collateral = self.gateway.collateral_token(contract).await?;
        let allowance = self.gateway.allowance(collateral, owner, contract).await?;

        if allowance >= amount {
            debug!("Allowance {} covers {} for {}", allowance, amount, contract);
            return Ok(None);
        }

        let target = self.approval_ceiling.max(amount);
        info!("Allowance {} below {}, approving {} of {} for {}", allowance, amount, target, collateral, contract);

        match self.gateway.approve(session, collateral, contract, target).await {
            Ok(hash) => Ok(Some(hash)),
            Err(e @ MarketError::WalletUnavailable(_)) => Err(e),
            Err(e) => {
                warn!("Approval for {} failed: {}", contract, e);
                Err(MarketError::ApprovalFailed(approval_reason(e)))
            }
        }
    }
}

fn approval_reason(e: MarketError) -> String {
    match e {
        MarketError::ActionReverted { reason } => reason,
        other => other.to_string(),
    }
}
