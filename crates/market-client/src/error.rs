//! Error taxonomy for the market client
//!
//! Read-side errors are folded into the snapshot by the synchronizer and never
//! escape it. Write-side errors are returned to the caller that initiated the
//! action, with approval failures tagged apart from action failures.

use thiserror::Error;

use crate::rpc::RpcError;

#[derive(Error, Debug)]
pub enum MarketError {
    /// No signing capability in the current session
    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),

    /// The session's chain has no configured deployment for this market
    #[error("network mismatch: market {market_id} is deployed on chain {expected}, wallet is on {actual:?}")]
    NetworkMismatch { market_id: String, expected: u64, actual: Option<u64> },

    /// Read call reverted or the target has no code
    #[error("contract read failed: {0}")]
    ContractRead(String),

    /// The collateral approval step of a sequenced write failed
    #[error("approval failed: {0}")]
    ApprovalFailed(String),

    /// The buy/redeem/resolve call itself reverted
    #[error("transaction reverted: {reason}")]
    ActionReverted { reason: String },

    /// Oracle price could not be read (non-fatal)
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Redeeming while unresolved, on the losing side, or with no balance
    #[error("invalid redemption: {0}")]
    InvalidRedemption(String),

    /// Malformed amounts or arguments, rejected before any call is made
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transport or JSON-RPC failure unrelated to a revert
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}

impl MarketError {
    pub fn is_approval_failure(&self) -> bool {
        matches!(self, MarketError::ApprovalFailed(_))
    }

    pub fn is_action_failure(&self) -> bool {
        matches!(self, MarketError::ActionReverted { .. })
    }

    /// Short human-readable cause for UI display
    pub fn user_message(&self) -> String {
        match self {
            MarketError::WalletUnavailable(_) => "Connect a wallet to continue".to_string(),
            MarketError::NetworkMismatch { expected, .. } => {
                format!("Switch your wallet to chain {}", expected)
            }
            MarketError::ApprovalFailed(reason) => format!("Approval failed: {}", reason),
            MarketError::ActionReverted { reason } => format!("Trade failed: {}", reason),
            other => other.to_string(),
        }
    }
}
