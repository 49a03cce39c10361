//! Wallet reachable over JSON-RPC, with a WebSocket event feed
//!
//! The same type serves an injected wallet's local endpoint and an external
//! wallet-connect bridge relay: both accept `eth_accounts`,
//! `eth_requestAccounts`, `eth_chainId` and `eth_sendTransaction`.
//!
//! # Event feed
//! EIP-1193 style notifications, one JSON object per text frame:
//! - `{"event":"accountsChanged","data":["0x..."]}`
//! - `{"event":"chainChanged","data":"0x89"}`
//! - `{"event":"disconnect"}`
//!
//! The feed reconnects with exponential backoff until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, TxHash};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{WalletEvent, WalletSource, WALLET_EVENT_CAPACITY};
use crate::rpc::{RpcClient, RpcError, TransactionRequest};

/// Maximum reconnection backoff interval
const MAX_BACKOFF_SECS: u64 = 30;

/// Initial backoff interval
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Idle read timeout before sending a keepalive ping
const READ_TIMEOUT_SECS: u64 = 30;

pub struct RpcWallet {
    name: String,
    rpc: RpcClient,
    events: broadcast::Sender<WalletEvent>,
}

impl RpcWallet {
    pub fn new(name: &str, url: &str) -> Result<Self, RpcError> {
        let (events, _) = broadcast::channel(WALLET_EVENT_CAPACITY);
        Ok(Self { name: name.to_string(), rpc: RpcClient::new(url)?, events })
    }

    /// Inject an event observed out-of-band (e.g. by an embedding host)
    pub fn emit(&self, event: WalletEvent) {
        // No listeners is fine: nobody is tracking this wallet yet
        let _ = self.events.send(event);
    }

    /// Spawn the event feed on the runtime; stops when `shutdown` is set
    pub fn spawn_event_feed(self: &Arc<Self>, endpoint: String, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        let wallet = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = wallet.run_event_feed(&endpoint, shutdown).await {
                error!("{} event feed stopped: {:#}", wallet.name, e);
            }
        })
    }

    /// Consume the event feed, forwarding parsed events to subscribers.
    /// Returns the number of events forwarded.
    pub async fn run_event_feed(&self, endpoint: &str, shutdown: Arc<AtomicBool>) -> Result<u64> {
        let mut backoff_secs = INITIAL_BACKOFF_SECS;
        let mut forwarded: u64 = 0;

        info!("Starting {} event feed: {}", self.name, endpoint);

        while !shutdown.load(Ordering::Relaxed) {
            match connect_async(endpoint).await.context("WebSocket connection failed") {
                Ok((ws_stream, response)) => {
                    debug!("{} event feed connected, status: {}", self.name, response.status());
                    backoff_secs = INITIAL_BACKOFF_SECS;
                    let (mut write, mut read) = ws_stream.split();

                    while !shutdown.load(Ordering::Relaxed) {
                        let msg = tokio::time::timeout(Duration::from_secs(READ_TIMEOUT_SECS), read.next()).await;

                        match msg {
                            Ok(Some(Ok(Message::Text(text)))) => match WalletEvent::parse(&text) {
                                Some(event) => {
                                    debug!("{} event: {:?}", self.name, event);
                                    self.emit(event);
                                    forwarded += 1;
                                }
                                None => debug!("{} ignoring feed message: {}", self.name, text.as_str()),
                            },
                            Ok(Some(Ok(Message::Ping(data)))) => {
                                if let Err(e) = write.send(Message::Pong(data)).await {
                                    warn!("Failed to send pong: {}", e);
                                }
                            }
                            Ok(Some(Ok(Message::Close(_)))) => {
                                info!("{} event feed closed by server", self.name);
                                break;
                            }
                            Ok(Some(Ok(_))) => {}
                            Ok(Some(Err(e))) => {
                                warn!("{} event feed error: {}", self.name, e);
                                break;
                            }
                            Ok(None) => {
                                info!("{} event feed ended", self.name);
                                break;
                            }
                            Err(_) => {
                                debug!("{} event feed idle, sending ping", self.name);
                                if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                                    warn!("Failed to send ping: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("{} event feed connection failed: {:#}", self.name, e);
                }
            }

            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            warn!("Reconnecting {} event feed in {} seconds...", self.name, backoff_secs);
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
        }

        info!("{} event feed stopped after {} events", self.name, forwarded);
        Ok(forwarded)
    }
}

#[async_trait]
impl WalletSource for RpcWallet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.rpc.accounts().await
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.rpc.request_accounts().await
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.rpc.chain_id().await
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash, RpcError> {
        self.rpc.send_transaction(tx).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
