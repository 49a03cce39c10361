//! Wallet access and the chain session
//!
//! # Components
//! - `WalletSource`: one wallet (injected or bridge) reachable over an async interface
//! - `RpcWallet`: `WalletSource` over JSON-RPC with a WebSocket event feed
//! - `SessionProvider`: owns the single live `Session` and republishes it on wallet events

mod provider;
mod rpc_wallet;

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U64};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::MarketError;
use crate::rpc::{RpcError, TransactionRequest};

pub use provider::SessionProvider;
pub use rpc_wallet::RpcWallet;

/// Capacity of each wallet's event broadcast channel
pub const WALLET_EVENT_CAPACITY: usize = 32;

/// Asynchronous, edge-triggered notifications from a wallet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(U64),
    Disconnect,
}

impl WalletEvent {
    /// Parse one feed message. Unknown or malformed messages yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// A wallet the client can read accounts from and hand transactions to for signing
#[async_trait]
pub trait WalletSource: Send + Sync {
    /// Label for logs
    fn name(&self) -> &str;

    /// Accounts already authorized for this client (no prompt)
    async fn accounts(&self) -> Result<Vec<Address>, RpcError>;

    /// Ask the user to authorize accounts
    async fn request_accounts(&self) -> Result<Vec<Address>, RpcError>;

    async fn chain_id(&self) -> Result<u64, RpcError>;

    /// Sign and broadcast; returns once the wallet has accepted the transaction
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash, RpcError>;

    /// Register a listener. Dropping the receiver unregisters it.
    fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Which wallet the session came from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    Bridge,
    Injected,
}

/// One account/chain pair plus the ability to sign for it
#[derive(Clone, Default)]
pub struct Session {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub connected: bool,
    pub source: Option<SessionSource>,
    signer: Option<Arc<dyn WalletSource>>,
}

impl Session {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(
        account: Address,
        chain_id: Option<u64>,
        source: SessionSource,
        signer: Arc<dyn WalletSource>,
    ) -> Self {
        Self { account: Some(account), chain_id, connected: true, source: Some(source), signer: Some(signer) }
    }

    /// Read-only session: an account to scope reads to, no signing
    pub fn watch_only(account: Address, chain_id: Option<u64>) -> Self {
        Self { account: Some(account), chain_id, connected: false, source: None, signer: None }
    }

    pub fn can_sign(&self) -> bool {
        self.connected && self.signer.is_some() && self.account.is_some()
    }

    /// Signer and sending account, or `WalletUnavailable`
    pub fn signer(&self) -> Result<(&Arc<dyn WalletSource>, Address), MarketError> {
        match (&self.signer, self.account, self.connected) {
            (Some(signer), Some(account), true) => Ok((signer, account)),
            _ => Err(MarketError::WalletUnavailable("no connected wallet can sign".to_string())),
        }
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.account == other.account
            && self.chain_id == other.chain_id
            && self.connected == other.connected
            && self.source == other.source
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("chain_id", &self.chain_id)
            .field("connected", &self.connected)
            .field("source", &self.source)
            .field("signer", &self.signer.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockWallet;

    #[test]
    fn test_parse_wallet_events() {
        let accounts = WalletEvent::parse(
            r#"{"event":"accountsChanged","data":["0x00000000000000000000000000000000000000aa"]}"#,
        );
        assert_eq!(accounts, Some(WalletEvent::AccountsChanged(vec![Address::with_last_byte(0xaa)])));

        let chain = WalletEvent::parse(r#"{"event":"chainChanged","data":"0x89"}"#);
        assert_eq!(chain, Some(WalletEvent::ChainChanged(U64::from(137u64))));

        assert_eq!(WalletEvent::parse(r#"{"event":"disconnect"}"#), Some(WalletEvent::Disconnect));
        assert_eq!(WalletEvent::parse(r#"{"event":"message","data":{}}"#), None);
        assert_eq!(WalletEvent::parse("not json"), None);
    }

    #[test]
    fn test_disconnected_session_cannot_sign() {
        let session = Session::disconnected();
        assert!(!session.can_sign());
        assert!(matches!(session.signer(), Err(MarketError::WalletUnavailable(_))));

        let watch = Session::watch_only(Address::with_last_byte(1), Some(1));
        assert!(watch.signer().is_err());
    }

    #[test]
    fn test_connected_session_signer() {
        let wallet = Arc::new(MockWallet::new("injected", vec![Address::with_last_byte(7)], 137));
        let session = Session::connected(Address::with_last_byte(7), Some(137), SessionSource::Injected, wallet);
        let (signer, account) = session.signer().unwrap();
        assert_eq!(signer.name(), "injected");
        assert_eq!(account, Address::with_last_byte(7));
        assert!(format!("{:?}", session).contains("injected"));
    }
}
