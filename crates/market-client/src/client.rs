//! `MarketClient` - wires session, synchronizer and sequencer together
//!
//! Keeps the synchronizer's key in step with the session: whenever the wallet
//! switches account, the tracked market is re-keyed to the new account and
//! polled afresh. Writes resolve the market id against the session's chain,
//! scale decimal amounts, run through the sequencer and trigger an immediate
//! snapshot refresh once settled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{Address, TxHash};
use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{ClientConfig, MarketRegistry};
use crate::error::MarketError;
use crate::gateway::{MarketGateway, RpcGateway};
use crate::rpc::RpcClient;
use crate::sequencer::{BuyReceipt, TransactionSequencer};
use crate::sync::{MarketSynchronizer, SnapshotSubscription};
use crate::types::{MarketInfo, MarketKey, MarketSnapshot, Outcome, Side, TokenBalance};
use crate::units::to_smallest_unit;
use crate::wallet::{RpcWallet, Session, SessionProvider, WalletSource};

pub struct MarketClient {
    registry: MarketRegistry,
    token_decimals: u8,
    gateway: Arc<dyn MarketGateway>,
    session: Arc<SessionProvider>,
    synchronizer: Arc<MarketSynchronizer>,
    sequencer: TransactionSequencer,
    tracked: Arc<Mutex<Option<Address>>>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    feed_shutdown: Arc<AtomicBool>,
}

impl MarketClient {
    pub fn new(
        config: &ClientConfig,
        gateway: Arc<dyn MarketGateway>,
        session: Arc<SessionProvider>,
    ) -> Result<Self, MarketError> {
        let ceiling = config.approval_ceiling_amount()?;
        let synchronizer =
            Arc::new(MarketSynchronizer::new(Arc::clone(&gateway), config.poll_interval(), config.token_decimals));

        Ok(Self {
            registry: config.registry(),
            token_decimals: config.token_decimals,
            sequencer: TransactionSequencer::new(Arc::clone(&gateway), ceiling),
            gateway,
            session,
            synchronizer,
            tracked: Arc::new(Mutex::new(None)),
            reconciler: Mutex::new(None),
            feed_shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build the JSON-RPC stack described by `config`. Must be called within a Tokio runtime.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let rpc = RpcClient::new(&config.rpc_url).context("Failed to create RPC client")?;
        let gateway = RpcGateway::new(rpc).with_receipt_poll_interval(config.receipt_poll_interval());

        let bridge = match &config.bridge_rpc_url {
            Some(url) => Some(Arc::new(RpcWallet::new("bridge", url).context("Failed to create bridge wallet")?)),
            None => None,
        };
        let injected = match &config.wallet_rpc_url {
            Some(url) => Some(Arc::new(RpcWallet::new("injected", url).context("Failed to create injected wallet")?)),
            None => None,
        };

        // The event feed belongs to whichever wallet the session prefers
        let feed_shutdown = Arc::new(AtomicBool::new(false));
        if let (Some(endpoint), Some(wallet)) = (&config.wallet_events_url, bridge.as_ref().or(injected.as_ref())) {
            wallet.spawn_event_feed(endpoint.clone(), Arc::clone(&feed_shutdown));
        }

        let session = Arc::new(SessionProvider::new(
            bridge.map(|w| w as Arc<dyn WalletSource>),
            injected.map(|w| w as Arc<dyn WalletSource>),
        ));

        let mut client = Self::new(config, Arc::new(gateway), session)?;
        client.feed_shutdown = feed_shutdown;
        Ok(client)
    }

    /// Detect the session, listen for wallet events and keep the tracked key in step
    pub async fn start(&self) -> Session {
        self.session.start();
        let session = self.session.refresh().await;

        let mut guard = lock(&self.reconciler);
        if guard.is_none() {
            *guard = Some(tokio::spawn(reconcile(
                self.session.subscribe(),
                Arc::clone(&self.synchronizer),
                Arc::clone(&self.tracked),
            )));
        }
        session
    }

    pub fn session(&self) -> Session {
        self.session.current_session()
    }

    pub fn session_provider(&self) -> &Arc<SessionProvider> {
        &self.session
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    /// Track a market by id. `None` if it has no deployed contract yet.
    pub fn track(&self, market_id: &str) -> Option<Address> {
        let contract = self.registry.address(market_id);
        if contract.is_none() {
            info!("Market {} is not deployed", market_id);
        }

        *lock(&self.tracked) = contract;
        let account = self.session.current_session().account;
        self.synchronizer.set_key(contract.map(|c| MarketKey::new(c, account)));
        contract
    }

    pub fn untrack(&self) {
        *lock(&self.tracked) = None;
        self.synchronizer.set_key(None);
    }

    pub fn subscribe(&self) -> SnapshotSubscription {
        self.synchronizer.subscribe()
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        self.synchronizer.snapshot()
    }

    /// One-off read, outside the synchronizer
    pub async fn market_info(&self, market_id: &str) -> Result<Option<MarketInfo>, MarketError> {
        match self.registry.address(market_id) {
            Some(contract) => self.gateway.get_market_info(contract).await.map(Some),
            None => Ok(None),
        }
    }

    /// Collateral the session account can spend on `market_id`. `None` without
    /// an account or a deployed contract.
    pub async fn collateral_balance(&self, market_id: &str) -> Result<Option<TokenBalance>, MarketError> {
        let Some(account) = self.session.current_session().account else {
            return Ok(None);
        };
        let Some(contract) = self.registry.address(market_id) else {
            return Ok(None);
        };

        let token = self.gateway.collateral_token(contract).await?;
        self.gateway.token_balance(token, account).await.map(Some)
    }

    /// Buy `amount` collateral (decimal string, e.g. "100") worth of `side`
    pub async fn buy(&self, market_id: &str, side: Side, amount: &str) -> Result<BuyReceipt, MarketError> {
        let session = self.session.current_session();
        let contract = self.write_target(market_id, &session)?;
        let amount = to_smallest_unit(amount, self.token_decimals)?;

        let receipt = self.sequencer.buy(&session, contract, side, amount).await?;
        self.synchronizer.refresh();
        Ok(receipt)
    }

    /// Redeem `amount` (decimal string) of the winning outcome token
    pub async fn redeem(&self, market_id: &str, amount: &str) -> Result<TxHash, MarketError> {
        let session = self.session.current_session();
        let contract = self.write_target(market_id, &session)?;
        let amount = to_smallest_unit(amount, self.token_decimals)?;

        let hash = self.sequencer.redeem(&session, contract, amount).await?;
        self.synchronizer.refresh();
        Ok(hash)
    }

    pub async fn resolve(&self, market_id: &str) -> Result<TxHash, MarketError> {
        let session = self.session.current_session();
        let contract = self.write_target(market_id, &session)?;

        let hash = self.sequencer.resolve_automatically(&session, contract).await?;
        self.synchronizer.refresh();
        Ok(hash)
    }

    pub async fn resolve_manually(&self, market_id: &str, result: Outcome) -> Result<TxHash, MarketError> {
        let session = self.session.current_session();
        let contract = self.write_target(market_id, &session)?;

        let hash = self.sequencer.resolve_manually(&session, contract, result).await?;
        self.synchronizer.refresh();
        Ok(hash)
    }

    fn write_target(&self, market_id: &str, session: &Session) -> Result<Address, MarketError> {
        session.signer()?;
        self.registry
            .address_on_chain(market_id, session.chain_id)?
            .ok_or_else(|| MarketError::InvalidInput(format!("market {} has no deployed contract", market_id)))
    }
}

impl Drop for MarketClient {
    fn drop(&mut self) {
        self.feed_shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = lock(&self.reconciler).take() {
            handle.abort();
        }
        self.session.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn reconcile(
    mut sessions: watch::Receiver<Session>,
    synchronizer: Arc<MarketSynchronizer>,
    tracked: Arc<Mutex<Option<Address>>>,
) {
    loop {
        let account = sessions.borrow_and_update().account;
        let contract = *lock(&tracked);
        if let Some(contract) = contract {
            debug!("Re-keying {} for account {:?}", contract, account);
            synchronizer.set_key(Some(MarketKey::new(contract, account)));
        }

        if sessions.changed().await.is_err() {
            return;
        }
    }
}
