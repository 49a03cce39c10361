//! Test helpers for gateway, sequencer, synchronizer and session tests.
//!
//! Provides a `MockGateway` implementing `MarketGateway` that behaves like a
//! tiny in-memory market contract, and a `MockWallet` implementing
//! `WalletSource`. Both record calls and can hold responses open to simulate
//! in-flight reads and writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};

use crate::error::MarketError;
use crate::gateway::{validate_redemption, MarketGateway};
use crate::rpc::{RpcError, TransactionRequest};
use crate::types::{MarketInfo, Outcome, Side, TokenBalance, UserBalances};
use crate::wallet::{Session, SessionSource, WalletEvent, WalletSource, WALLET_EVENT_CAPACITY};

/// Enough permits to release every waiter at once
const RELEASE_ALL: usize = 1 << 16;

pub fn account(b: u8) -> Address {
    Address::with_last_byte(b)
}

pub fn sample_market(question: &str, yes_token: Address, no_token: Address) -> MarketInfo {
    MarketInfo {
        question: question.to_string(),
        end_time: 1_767_225_600,
        total_collateral: U256::ZERO,
        result: Outcome::Unresolved,
        resolved: false,
        yes_token,
        no_token,
    }
}

/// Connected session signing through a `MockWallet`
pub fn signing_session(owner: Address) -> Session {
    let wallet = Arc::new(MockWallet::new("mock", vec![owner], 137));
    Session::connected(owner, Some(137), SessionSource::Injected, wallet)
}

// ============================================================================
// MockGateway
// ============================================================================

/// One observed gateway call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayCall {
    MarketInfo(Address),
    UserBalances(Address, Address),
    TotalSupply(Address),
    TokenBalance { token: Address, owner: Address },
    OraclePrice(Address),
    Collateral(Address),
    Allowance { token: Address, owner: Address, spender: Address },
    Approve { token: Address, spender: Address, amount: U256 },
    Buy { contract: Address, side: Side, amount: U256 },
    Redeem { contract: Address, amount: U256 },
    ResolveAutomatically(Address),
    ResolveManually(Address, Outcome),
}

impl GatewayCall {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            GatewayCall::Approve { .. }
                | GatewayCall::Buy { .. }
                | GatewayCall::Redeem { .. }
                | GatewayCall::ResolveAutomatically(_)
                | GatewayCall::ResolveManually(..)
        )
    }
}

#[derive(Default)]
struct MockState {
    market_info: HashMap<Address, MarketInfo>,
    market_info_error: Option<String>,
    balances: HashMap<(Address, Address), UserBalances>,
    balances_error: Option<String>,
    supplies: HashMap<Address, U256>,
    supply_error: Option<String>,
    token_balances: HashMap<(Address, Address), U256>,
    oracle_price: Option<U256>,
    collateral: Address,
    allowance: U256,
    approve_error: Option<String>,
    buy_error: Option<String>,
    calls: Vec<GatewayCall>,
    next_tx: u8,
}

#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
    market_info_gates: Mutex<HashMap<Address, Arc<Semaphore>>>,
    buy_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.lock().collateral = Address::repeat_byte(0xcc);
        gateway.lock().oracle_price = Some(U256::from(65_000u64));
        gateway
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_market_info(&self, contract: Address, info: MarketInfo) {
        self.lock().market_info.insert(contract, info);
    }

    pub fn update_market_info(&self, contract: Address, f: impl FnOnce(&mut MarketInfo)) {
        if let Some(info) = self.lock().market_info.get_mut(&contract) {
            f(info);
        }
    }

    pub fn fail_market_info(&self, error: Option<&str>) {
        self.lock().market_info_error = error.map(str::to_string);
    }

    pub fn set_balances(&self, contract: Address, owner: Address, balances: UserBalances) {
        self.lock().balances.insert((contract, owner), balances);
    }

    pub fn fail_balances(&self, error: Option<&str>) {
        self.lock().balances_error = error.map(str::to_string);
    }

    pub fn set_supply(&self, token: Address, supply: U256) {
        self.lock().supplies.insert(token, supply);
    }

    pub fn set_token_balance(&self, token: Address, owner: Address, amount: U256) {
        self.lock().token_balances.insert((token, owner), amount);
    }

    pub fn fail_supplies(&self, error: Option<&str>) {
        self.lock().supply_error = error.map(str::to_string);
    }

    /// `None` makes the oracle read fail
    pub fn set_oracle_price(&self, price: Option<U256>) {
        self.lock().oracle_price = price;
    }

    pub fn collateral(&self) -> Address {
        self.lock().collateral
    }

    pub fn set_allowance(&self, allowance: U256) {
        self.lock().allowance = allowance;
    }

    pub fn fail_approve(&self, error: Option<&str>) {
        self.lock().approve_error = error.map(str::to_string);
    }

    pub fn fail_buy(&self, error: Option<&str>) {
        self.lock().buy_error = error.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&GatewayCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Block `get_market_info(contract)` until released
    pub fn hold_market_info(&self, contract: Address) {
        self.market_info_gates.lock().unwrap().insert(contract, Arc::new(Semaphore::new(0)));
    }

    pub fn release_market_info(&self, contract: Address) {
        if let Some(gate) = self.market_info_gates.lock().unwrap().remove(&contract) {
            gate.add_permits(RELEASE_ALL);
        }
    }

    /// Block every `buy` until released
    pub fn hold_buys(&self) {
        *self.buy_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_buys(&self) {
        if let Some(gate) = self.buy_gate.lock().unwrap().take() {
            gate.add_permits(RELEASE_ALL);
        }
    }

    fn record(&self, call: GatewayCall) {
        self.lock().calls.push(call);
    }

    fn next_hash(&self) -> TxHash {
        let mut state = self.lock();
        state.next_tx = state.next_tx.wrapping_add(1);
        TxHash::with_last_byte(state.next_tx)
    }
}

async fn wait_gate(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        let _permit = gate.acquire().await;
    }
}

#[async_trait]
impl MarketGateway for MockGateway {
    async fn get_market_info(&self, contract: Address) -> Result<MarketInfo, MarketError> {
        self.record(GatewayCall::MarketInfo(contract));
        let gate = self.market_info_gates.lock().unwrap().get(&contract).cloned();
        wait_gate(gate).await;

        let state = self.lock();
        if let Some(e) = &state.market_info_error {
            return Err(MarketError::ContractRead(e.clone()));
        }
        state
            .market_info
            .get(&contract)
            .cloned()
            .ok_or_else(|| MarketError::ContractRead(format!("no contract code at {}", contract)))
    }

    async fn get_user_balances(&self, contract: Address, owner: Address) -> Result<UserBalances, MarketError> {
        self.record(GatewayCall::UserBalances(contract, owner));
        let state = self.lock();
        if let Some(e) = &state.balances_error {
            return Err(MarketError::ContractRead(e.clone()));
        }
        Ok(state.balances.get(&(contract, owner)).copied().unwrap_or_default())
    }

    async fn get_token_total_supply(&self, token: Address) -> Result<U256, MarketError> {
        self.record(GatewayCall::TotalSupply(token));
        let state = self.lock();
        if let Some(e) = &state.supply_error {
            return Err(MarketError::ContractRead(e.clone()));
        }
        Ok(state.supplies.get(&token).copied().unwrap_or_default())
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<TokenBalance, MarketError> {
        self.record(GatewayCall::TokenBalance { token, owner });
        let amount = self.lock().token_balances.get(&(token, owner)).copied().unwrap_or_default();
        Ok(TokenBalance { amount, decimals: 6 })
    }

    async fn get_current_oracle_price(&self, contract: Address) -> Result<U256, MarketError> {
        self.record(GatewayCall::OraclePrice(contract));
        self.lock().oracle_price.ok_or_else(|| MarketError::OracleUnavailable("stale feed".to_string()))
    }

    async fn collateral_token(&self, contract: Address) -> Result<Address, MarketError> {
        self.record(GatewayCall::Collateral(contract));
        Ok(self.lock().collateral)
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, MarketError> {
        self.record(GatewayCall::Allowance { token, owner, spender });
        Ok(self.lock().allowance)
    }

    async fn approve(
        &self,
        session: &Session,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash, MarketError> {
        session.signer()?;
        self.record(GatewayCall::Approve { token, spender, amount });
        {
            let mut state = self.lock();
            if let Some(reason) = &state.approve_error {
                return Err(MarketError::ActionReverted { reason: reason.clone() });
            }
            state.allowance = amount;
        }
        Ok(self.next_hash())
    }

    async fn buy(&self, session: &Session, contract: Address, side: Side, amount: U256) -> Result<TxHash, MarketError> {
        let (_, owner) = session.signer()?;
        self.record(GatewayCall::Buy { contract, side, amount });
        let gate = self.buy_gate.lock().unwrap().clone();
        wait_gate(gate).await;

        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if let Some(reason) = &state.buy_error {
                return Err(MarketError::ActionReverted { reason: reason.clone() });
            }
            if state.allowance < amount {
                return Err(MarketError::ActionReverted { reason: "ERC20: insufficient allowance".to_string() });
            }
            state.allowance -= amount;

            let token = state.market_info.get(&contract).map(|info| info.token_for(side));
            let balances = state.balances.entry((contract, owner)).or_default();
            match side {
                Side::Yes => balances.yes_balance += amount,
                Side::No => balances.no_balance += amount,
            }
            if let Some(token) = token {
                *state.supplies.entry(token).or_default() += amount;
            }
        }
        Ok(self.next_hash())
    }

    async fn redeem(&self, session: &Session, contract: Address, amount: U256) -> Result<TxHash, MarketError> {
        let (_, owner) = session.signer()?;
        let info = self.get_market_info(contract).await?;
        let balances = self.get_user_balances(contract, owner).await?;
        let winner = validate_redemption(&info, &balances, amount)?;

        self.record(GatewayCall::Redeem { contract, amount });
        {
            let mut state = self.lock();
            let balances = state.balances.entry((contract, owner)).or_default();
            match winner {
                Side::Yes => balances.yes_balance -= amount,
                Side::No => balances.no_balance -= amount,
            }
        }
        Ok(self.next_hash())
    }

    async fn resolve_automatically(&self, session: &Session, contract: Address) -> Result<TxHash, MarketError> {
        session.signer()?;
        self.record(GatewayCall::ResolveAutomatically(contract));
        Ok(self.next_hash())
    }

    async fn resolve_manually(
        &self,
        session: &Session,
        contract: Address,
        result: Outcome,
    ) -> Result<TxHash, MarketError> {
        session.signer()?;
        self.record(GatewayCall::ResolveManually(contract, result));
        self.update_market_info(contract, |info| {
            info.result = result;
            info.resolved = true;
        });
        Ok(self.next_hash())
    }
}

// ============================================================================
// MockWallet
// ============================================================================

#[derive(Default)]
struct WalletState {
    accounts: Vec<Address>,
    chain_id: u64,
    unreachable: bool,
    reject_requests: bool,
    authorize_on_request: Option<Vec<Address>>,
    request_count: usize,
    next_tx: u8,
}

pub struct MockWallet {
    name: String,
    state: Mutex<WalletState>,
    events: broadcast::Sender<WalletEvent>,
}

impl MockWallet {
    pub fn new(name: &str, accounts: Vec<Address>, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(WALLET_EVENT_CAPACITY);
        Self {
            name: name.to_string(),
            state: Mutex::new(WalletState { accounts, chain_id, ..WalletState::default() }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn set_reject_requests(&self, reject: bool) {
        self.lock().reject_requests = reject;
    }

    /// Accounts granted when `request_accounts` is approved
    pub fn set_authorize_on_request(&self, accounts: Vec<Address>) {
        self.lock().authorize_on_request = Some(accounts);
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.lock().accounts = accounts;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.lock().chain_id = chain_id;
    }

    pub fn request_count(&self) -> usize {
        self.lock().request_count
    }

    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }

    fn unreachable_error() -> RpcError {
        RpcError::Transport("wallet not installed".to_string())
    }
}

#[async_trait]
impl WalletSource for MockWallet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        let state = self.lock();
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        Ok(state.accounts.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, RpcError> {
        let mut state = self.lock();
        state.request_count += 1;
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        if state.reject_requests {
            return Err(RpcError::Rpc { code: 4001, message: "User rejected the request.".to_string(), data: None });
        }
        if let Some(granted) = state.authorize_on_request.take() {
            state.accounts = granted;
        }
        Ok(state.accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        let state = self.lock();
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        Ok(state.chain_id)
    }

    async fn send_transaction(&self, _tx: &TransactionRequest) -> Result<TxHash, RpcError> {
        let mut state = self.lock();
        state.next_tx = state.next_tx.wrapping_add(1);
        Ok(TxHash::with_last_byte(state.next_tx))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
