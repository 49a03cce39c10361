//! Value types shared by the gateway, synchronizer and sequencer
//!
//! # Design Principles
//! 1. On-chain amounts stay as `U256` in the token's smallest unit; conversion
//!    to decimal strings happens only at the display boundary (see `units`)
//! 2. Snapshots are immutable values; consumers never patch them
//! 3. Balances are always re-read from the contract, never synthesized

use alloy_primitives::{Address, U256};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::units::to_decimal;

// ============================================================================
// Market State
// ============================================================================

/// Terminal outcome of a market as stored by the contract (`uint8`)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Unresolved = 0,
    Yes = 1,
    No = 2,
}

impl Outcome {
    /// Decode the contract's numeric result. Unknown values read as unresolved.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Outcome::Yes,
            2 => Outcome::No,
            _ => Outcome::Unresolved,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Winning side, if any
    pub fn side(self) -> Option<Side> {
        match self {
            Outcome::Yes => Some(Side::Yes),
            Outcome::No => Some(Side::No),
            Outcome::Unresolved => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Unresolved => "Unresolved",
            Outcome::Yes => "Yes",
            Outcome::No => "No",
        }
    }

    /// Parse from CLI/user input
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "yes" | "1" => Some(Outcome::Yes),
            "no" | "2" => Some(Outcome::No),
            "unresolved" | "0" => Some(Outcome::Unresolved),
            _ => None,
        }
    }
}

/// Position side for buys
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    /// The contract's `buy(bool yes, ..)` flag
    pub fn is_yes(self) -> bool {
        matches!(self, Side::Yes)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "yes" | "y" => Some(Side::Yes),
            "no" | "n" => Some(Side::No),
            _ => None,
        }
    }
}

/// Market state as returned by `getMarketInfo()`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub question: String,
    /// Unix seconds
    pub end_time: u64,
    /// Smallest collateral unit
    pub total_collateral: U256,
    pub result: Outcome,
    pub resolved: bool,
    pub yes_token: Address,
    pub no_token: Address,
}

impl MarketInfo {
    pub fn end_time_utc(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.end_time).ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }

    /// Trading window has closed (the market may still be unresolved)
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        // An end time past i64 seconds is never reached
        match i64::try_from(self.end_time) {
            Ok(end) => now.timestamp() >= end,
            Err(_) => false,
        }
    }

    pub fn token_for(&self, side: Side) -> Address {
        match side {
            Side::Yes => self.yes_token,
            Side::No => self.no_token,
        }
    }
}

/// Outcome-token balances of one account in one market
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserBalances {
    pub yes_balance: U256,
    pub no_balance: U256,
}

impl UserBalances {
    pub fn for_side(&self, side: Side) -> U256 {
        match side {
            Side::Yes => self.yes_balance,
            Side::No => self.no_balance,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.yes_balance.is_zero() && self.no_balance.is_zero()
    }

    /// Decimal strings `(yes, no)` scaled by `decimals`
    pub fn display(&self, decimals: u8) -> (String, String) {
        (to_decimal(self.yes_balance, decimals), to_decimal(self.no_balance, decimals))
    }
}

/// ERC20 balance paired with the token's own on-chain decimals
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub amount: U256,
    pub decimals: u8,
}

impl TokenBalance {
    pub fn display(&self) -> String {
        to_decimal(self.amount, self.decimals)
    }
}

/// Implied probabilities in percent; always sum to 100
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Probabilities {
    pub yes_probability: f64,
    pub no_probability: f64,
}

impl Probabilities {
    /// Undefined market: coin flip
    pub const EVEN: Probabilities = Probabilities { yes_probability: 50.0, no_probability: 50.0 };

    /// Implied price of a YES token in collateral units
    pub fn yes_price(&self) -> f64 {
        self.yes_probability / 100.0
    }

    /// Implied price of a NO token in collateral units
    pub fn no_price(&self) -> f64 {
        self.no_probability / 100.0
    }

    pub fn for_side(&self, side: Side) -> f64 {
        match side {
            Side::Yes => self.yes_probability,
            Side::No => self.no_probability,
        }
    }
}

// ============================================================================
// Synchronizer Types
// ============================================================================

/// What the synchronizer is tracking: one contract, optionally scoped to an account
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MarketKey {
    pub contract: Address,
    pub account: Option<Address>,
}

impl MarketKey {
    pub fn new(contract: Address, account: Option<Address>) -> Self {
        Self { contract, account }
    }
}

/// Lifecycle of a tracked key
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Nothing tracked, or no consumer subscribed
    #[default]
    Idle,
    /// First cycle for the current key in flight
    Loading,
    /// Last cycle fetched market info and balances
    Ready,
    /// Last cycle failed on market info or balances; prior values retained
    PartialFailure,
}

/// The synchronizer's published aggregate view of one market
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub key: Option<MarketKey>,
    pub market_info: Option<MarketInfo>,
    pub user_balances: Option<UserBalances>,
    pub probabilities: Option<Probabilities>,
    pub current_price: Option<U256>,
    pub loading: bool,
    /// Cycle-fatal failure from the last cycle (market info or balances)
    pub error: Option<String>,
    /// Non-fatal annotations from the last cycle (oracle, probabilities)
    #[serde(default)]
    pub warnings: Vec<String>,
    pub phase: SyncPhase,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    /// Fresh snapshot for a newly tracked key: nothing known yet
    pub fn for_key(key: Option<MarketKey>) -> Self {
        Self { key, ..Self::default() }
    }

    pub fn is_ready(&self) -> bool {
        self.phase == SyncPhase::Ready
    }
}
