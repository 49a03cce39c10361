//! Implied probabilities from outcome-token supply
//!
//! Each YES/NO token is minted one-for-one against collateral, so the share of
//! total outcome supply held on a side is read as that side's probability.
//! This assumes tokens are only minted and burned through buy/redeem.

use alloy_primitives::U256;

use crate::types::Probabilities;
use crate::units::to_decimal;

/// `yes = y / (y + n) * 100`, `no = 100 - yes`. Zero total supply is a coin flip.
pub fn implied_probabilities(yes_supply: f64, no_supply: f64) -> Probabilities {
    let total = yes_supply + no_supply;
    if !(total > 0.0) || !total.is_finite() {
        return Probabilities::EVEN;
    }

    let yes_probability = yes_supply / total * 100.0;
    Probabilities { yes_probability, no_probability: 100.0 - yes_probability }
}

/// Same as [`implied_probabilities`] for raw on-chain supplies in smallest units.
pub fn probabilities_from_supply(yes_supply: U256, no_supply: U256, decimals: u8) -> Probabilities {
    implied_probabilities(as_f64(yes_supply, decimals), as_f64(no_supply, decimals))
}

fn as_f64(value: U256, decimals: u8) -> f64 {
    to_decimal(value, decimals).parse::<f64>().unwrap_or(0.0)
}
