//! Market Data Synchronizer
//!
//! Owns the polling loop for one tracked `(contract, account)` key and folds
//! each cycle's reads into a single published `MarketSnapshot`.
//!
//! # Lifecycle
//! - Polling runs only while at least one `SnapshotSubscription` is alive;
//!   dropping the last one aborts the loop and its timer.
//! - `set_key` aborts the loop for the previous key and starts a fresh cycle
//!   for the new one immediately.
//! - Every loop carries a generation number. A cycle is applied only if its
//!   generation is still current, so a late response for a superseded key
//!   never reaches the snapshot.
//!
//! # Cycle
//! Market info, balances, outcome-token supplies and the oracle price are read
//! concurrently. A market info failure is cycle-fatal: the snapshot keeps every
//! previously known field and carries `error`. A balances failure also sets
//! `error` but only keeps the prior balances; the cycle's other reads are
//! published. Supplies and the oracle price only degrade their own field to
//! `None` with an entry in `warnings`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy_primitives::{Address, U256};
use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::MarketError;
use crate::gateway::MarketGateway;
use crate::probability::probabilities_from_supply;
use crate::types::{MarketInfo, MarketKey, MarketSnapshot, Probabilities, SyncPhase, UserBalances};

/// Reference poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct MarketSynchronizer {
    inner: Arc<Inner>,
}

struct Inner {
    gateway: Arc<dyn MarketGateway>,
    poll_interval: Duration,
    token_decimals: u8,
    control: Mutex<Control>,
    snapshot_tx: watch::Sender<MarketSnapshot>,
    refresh: Notify,
}

#[derive(Default)]
struct Control {
    key: Option<MarketKey>,
    generation: u64,
    consumers: usize,
    task: Option<JoinHandle<()>>,
}

/// Results of one poll cycle, one entry per field
struct Cycle {
    info: Result<MarketInfo, MarketError>,
    /// `None` when the key has no account
    balances: Option<Result<UserBalances, MarketError>>,
    probabilities: Result<Probabilities, MarketError>,
    price: Result<U256, MarketError>,
}

impl MarketSynchronizer {
    pub fn new(gateway: Arc<dyn MarketGateway>, poll_interval: Duration, token_decimals: u8) -> Self {
        let (snapshot_tx, _) = watch::channel(MarketSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                gateway,
                poll_interval,
                token_decimals,
                control: Mutex::new(Control::default()),
                snapshot_tx,
                refresh: Notify::new(),
            }),
        }
    }

    pub fn key(&self) -> Option<MarketKey> {
        self.inner.lock().key
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> MarketSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Register a consumer. The first consumer starts polling. Must be called
    /// within a Tokio runtime.
    pub fn subscribe(&self) -> SnapshotSubscription {
        let mut control = self.inner.lock();
        control.consumers += 1;
        if control.consumers == 1 {
            start(&self.inner, &mut control);
        }
        SnapshotSubscription { rx: self.inner.snapshot_tx.subscribe(), inner: Arc::clone(&self.inner) }
    }

    /// Track a new key, discarding all state and in-flight work for the old one
    pub fn set_key(&self, key: Option<MarketKey>) {
        let mut control = self.inner.lock();
        if control.key == key {
            return;
        }

        if let Some(task) = control.task.take() {
            task.abort();
        }
        control.key = key;
        control.generation += 1;
        self.inner.snapshot_tx.send_replace(MarketSnapshot::for_key(key));
        info!("Tracking {:?}", key);

        if control.consumers > 0 {
            start(&self.inner, &mut control);
        }
    }

    /// Run the next cycle now instead of waiting out the interval. No-op
    /// while nothing is polling.
    pub fn refresh(&self) {
        let control = self.inner.lock();
        if control.task.is_some() {
            self.inner.refresh.notify_one();
        }
    }
}

/// Spawn the poll loop for the current key under a fresh generation
fn start(inner: &Arc<Inner>, control: &mut Control) {
    let Some(key) = control.key else {
        return;
    };

    control.generation += 1;
    let generation = control.generation;
    inner.snapshot_tx.send_modify(|snapshot| {
        snapshot.loading = true;
        if snapshot.market_info.is_none() {
            snapshot.phase = SyncPhase::Loading;
        }
    });

    debug!("Starting poll loop for {:?} (generation {})", key, generation);
    control.task = Some(tokio::spawn(poll_loop(Arc::clone(inner), key, generation)));
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        match self.control.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn release(&self) {
        let mut control = self.lock();
        control.consumers = control.consumers.saturating_sub(1);
        if control.consumers > 0 {
            return;
        }

        control.generation += 1;
        if let Some(task) = control.task.take() {
            task.abort();
            info!("Last consumer left, polling stopped for {:?}", control.key);
        }
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.loading = false;
            if snapshot.phase == SyncPhase::Loading {
                snapshot.phase = SyncPhase::Idle;
            }
        });
    }

    /// Fold a cycle into the snapshot if `generation` is still current
    fn apply(&self, generation: u64, cycle: Cycle) -> bool {
        let control = self.lock();
        if control.generation != generation {
            debug!("Discarding cycle from superseded generation {}", generation);
            return false;
        }
        self.snapshot_tx.send_modify(|snapshot| merge(snapshot, cycle));
        true
    }

    async fn run_cycle(&self, key: MarketKey, tokens: &mut Option<(Address, Address)>) -> Cycle {
        let gateway = self.gateway.as_ref();
        let balances = async {
            match key.account {
                Some(account) => Some(gateway.get_user_balances(key.contract, account).await),
                None => None,
            }
        };
        let price = gateway.get_current_oracle_price(key.contract);

        let (info, balances, price, probabilities) = match *tokens {
            Some((yes, no)) => {
                tokio::join!(gateway.get_market_info(key.contract), balances, price, self.probabilities(yes, no))
            }
            // Token addresses come from market info on the first cycle
            None => {
                let (info, balances, price) = tokio::join!(gateway.get_market_info(key.contract), balances, price);
                let probabilities = match &info {
                    Ok(info) => self.probabilities(info.yes_token, info.no_token).await,
                    Err(_) => Err(MarketError::ContractRead("outcome token addresses unknown".to_string())),
                };
                (info, balances, price, probabilities)
            }
        };

        if let Ok(info) = &info {
            *tokens = Some((info.yes_token, info.no_token));
        }
        Cycle { info, balances, probabilities, price }
    }

    async fn probabilities(&self, yes_token: Address, no_token: Address) -> Result<Probabilities, MarketError> {
        let (yes, no) = futures::try_join!(
            self.gateway.get_token_total_supply(yes_token),
            self.gateway.get_token_total_supply(no_token)
        )?;
        Ok(probabilities_from_supply(yes, no, self.token_decimals))
    }
}

async fn poll_loop(inner: Arc<Inner>, key: MarketKey, generation: u64) {
    let mut tokens = None;
    loop {
        let cycle = inner.run_cycle(key, &mut tokens).await;
        if !inner.apply(generation, cycle) {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.poll_interval) => {}
            _ = inner.refresh.notified() => debug!("Refresh requested for {:?}", key),
        }
    }
}

fn merge(snapshot: &mut MarketSnapshot, cycle: Cycle) {
    let mut warnings = Vec::new();
    let probabilities = cycle
        .probabilities
        .map_err(|e| warnings.push(format!("probabilities unavailable: {}", e)))
        .ok();
    let price = cycle.price.map_err(|e| warnings.push(format!("oracle price unavailable: {}", e))).ok();

    snapshot.loading = false;
    snapshot.warnings = warnings;

    let info = match cycle.info {
        Ok(info) => info,
        Err(e) => {
            let error = format!("market info: {}", e);
            warn!("Cycle failed for {:?}: {}", snapshot.key, error);
            snapshot.error = Some(error);
            snapshot.phase = SyncPhase::PartialFailure;
            return;
        }
    };

    snapshot.market_info = Some(info);
    snapshot.probabilities = probabilities;
    snapshot.current_price = price;
    snapshot.updated_at = Some(Utc::now());

    match cycle.balances {
        Some(Err(e)) => {
            // Prior balances stay; the rest of the cycle is still published
            let error = format!("balances: {}", e);
            warn!("Cycle failed for {:?}: {}", snapshot.key, error);
            snapshot.error = Some(error);
            snapshot.phase = SyncPhase::PartialFailure;
        }
        balances => {
            snapshot.user_balances = balances.and_then(Result::ok);
            snapshot.error = None;
            snapshot.phase = SyncPhase::Ready;
        }
    }
}

/// A live consumer of the synchronizer's snapshots. Dropping it unsubscribes.
pub struct SnapshotSubscription {
    rx: watch::Receiver<MarketSnapshot>,
    inner: Arc<Inner>,
}

impl SnapshotSubscription {
    pub fn latest(&self) -> MarketSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish
    pub async fn changed(&mut self) -> MarketSnapshot {
        // The sender lives in `inner`, which this subscription keeps alive
        let _ = self.rx.changed().await;
        self.rx.borrow_and_update().clone()
    }

    /// Wait until a published snapshot satisfies `pred`
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&MarketSnapshot) -> bool) -> MarketSnapshot {
        loop {
            {
                let snapshot = self.rx.borrow_and_update();
                if pred(&*snapshot) {
                    return snapshot.clone();
                }
            }
            if self.rx.changed().await.is_err() {
                return self.latest();
            }
        }
    }
}

impl Drop for SnapshotSubscription {
    fn drop(&mut self) {
        self.inner.release();
    }
}
