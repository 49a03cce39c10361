//! Session Provider - single owner of the live chain session
//!
//! # Detection order
//! 1. External wallet bridge with an authorized account
//! 2. Injected wallet with an authorized account
//! 3. Disconnected
//!
//! Wallet events are edge-triggered and may arrive with no action on our
//! side (the user switching networks in the wallet UI). Every event causes a
//! full re-detection; the provider never infers state from its own calls.
//! Detections that finish after a newer one started are dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Session, SessionSource, WalletEvent, WalletSource};

pub struct SessionProvider {
    bridge: Option<Arc<dyn WalletSource>>,
    injected: Option<Arc<dyn WalletSource>>,
    session_tx: watch::Sender<Session>,
    /// Bumped at the start of every detection and on disconnect
    epoch: AtomicU64,
    /// Set by `disconnect()`; suppresses re-detection until `connect()`
    detached: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionProvider {
    pub fn new(bridge: Option<Arc<dyn WalletSource>>, injected: Option<Arc<dyn WalletSource>>) -> Self {
        let (session_tx, _) = watch::channel(Session::disconnected());
        Self {
            bridge,
            injected,
            session_tx,
            epoch: AtomicU64::new(0),
            detached: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// Latest published session. Never fails; an unreachable wallet reads as disconnected.
    pub fn current_session(&self) -> Session {
        self.session_tx.borrow().clone()
    }

    /// Observe session changes
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session_tx.subscribe()
    }

    /// Re-detect and publish
    pub async fn refresh(&self) -> Session {
        if self.detached.load(Ordering::SeqCst) {
            return self.current_session();
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let detected = self.detect().await;

        if self.epoch.load(Ordering::SeqCst) != epoch || self.detached.load(Ordering::SeqCst) {
            debug!("Dropping superseded session detection (epoch {})", epoch);
            return self.current_session();
        }

        self.publish(detected.clone());
        detected
    }

    /// Ask the preferred wallet to authorize an account, then re-detect.
    /// A rejected prompt yields a disconnected session, not an error.
    pub async fn connect(&self) -> Session {
        self.detached.store(false, Ordering::SeqCst);

        let preferred = self.bridge.as_ref().or(self.injected.as_ref());
        let Some(wallet) = preferred else {
            warn!("No wallet available to connect");
            self.publish(Session::disconnected());
            return Session::disconnected();
        };

        if let Err(e) = wallet.request_accounts().await {
            if e.is_user_rejection() {
                info!("{}: user rejected account request", wallet.name());
            } else {
                warn!("{}: account request failed: {}", wallet.name(), e);
            }
        }

        self.refresh().await
    }

    /// Tear down the session. Wallet events are ignored until the next `connect()`.
    pub fn disconnect(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.publish(Session::disconnected());
    }

    /// Register wallet listeners and re-detect on every event
    pub fn start(self: &Arc<Self>) {
        let mut guard = match self.listener.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }

        let bridge_rx = self.bridge.as_ref().map(|w| w.subscribe_events());
        let injected_rx = self.injected.as_ref().map(|w| w.subscribe_events());
        let provider = Arc::downgrade(self);

        *guard = Some(tokio::spawn(listen(provider, bridge_rx, injected_rx)));
        info!("Session provider listening for wallet events");
    }

    /// Unregister listeners
    pub fn stop(&self) {
        let handle = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            debug!("Session provider listener stopped");
        }
    }

    async fn detect(&self) -> Session {
        if let Some(bridge) = &self.bridge {
            if let Some(session) = detect_wallet(bridge, SessionSource::Bridge).await {
                return session;
            }
        }
        if let Some(injected) = &self.injected {
            if let Some(session) = detect_wallet(injected, SessionSource::Injected).await {
                return session;
            }
        }
        Session::disconnected()
    }

    fn publish(&self, session: Session) {
        let changed = self.session_tx.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                *current = session.clone();
                true
            }
        });
        if changed {
            info!(
                "Session changed: account={:?} chain={:?} source={:?}",
                session.account, session.chain_id, session.source
            );
        }
    }
}

impl Drop for SessionProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Authorized account on one wallet, or `None` if it has none or is unreachable
async fn detect_wallet(wallet: &Arc<dyn WalletSource>, source: SessionSource) -> Option<Session> {
    let accounts = match wallet.accounts().await {
        Ok(accounts) => accounts,
        Err(e) => {
            debug!("{} unreachable: {}", wallet.name(), e);
            return None;
        }
    };
    let account = *accounts.first()?;

    let chain_id = match wallet.chain_id().await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("{}: chain id unavailable: {}", wallet.name(), e);
            None
        }
    };

    Some(Session::connected(account, chain_id, source, Arc::clone(wallet)))
}

async fn next_event(
    rx: &mut Option<broadcast::Receiver<WalletEvent>>,
) -> Result<WalletEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn listen(
    provider: Weak<SessionProvider>,
    mut bridge_rx: Option<broadcast::Receiver<WalletEvent>>,
    mut injected_rx: Option<broadcast::Receiver<WalletEvent>>,
) {
    loop {
        if bridge_rx.is_none() && injected_rx.is_none() {
            debug!("No wallet event sources left");
            return;
        }

        let (origin, received) = tokio::select! {
            r = next_event(&mut bridge_rx) => ("bridge", r),
            r = next_event(&mut injected_rx) => ("injected", r),
        };

        match received {
            Ok(event) => debug!("Wallet event from {}: {:?}", origin, event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {} wallet events from {}, re-detecting", n, origin);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Wallet event source {} closed", origin);
                match origin {
                    "bridge" => bridge_rx = None,
                    _ => injected_rx = None,
                }
                continue;
            }
        }

        let Some(provider) = provider.upgrade() else {
            return;
        };
        provider.refresh().await;
    }
}
