//! Amount scaling between human decimal strings and on-chain integers
//!
//! Everything crossing the contract boundary is an unsigned integer scaled by
//! `10^decimals`. Everything shown to a human is a decimal string.

use alloy_primitives::utils::{format_units, parse_units};
use alloy_primitives::U256;

use crate::error::MarketError;

/// Parse a non-negative decimal string (e.g. "100", "0.25") into smallest units.
///
/// Rejects signs, exponents, empty parts and more fractional digits than
/// `decimals` can represent.
pub fn to_smallest_unit(amount: &str, decimals: u8) -> Result<U256, MarketError> {
    let amount = amount.trim();
    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (amount, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || frac_part.is_some_and(|f| !all_digits(f)) {
        return Err(MarketError::InvalidInput(format!("not a decimal amount: '{}'", amount)));
    }

    if let Some(frac) = frac_part {
        if frac.len() > decimals as usize {
            return Err(MarketError::InvalidInput(format!(
                "'{}' has more than {} fractional digits",
                amount, decimals
            )));
        }
    }

    let parsed = parse_units(amount, decimals)
        .map_err(|e| MarketError::InvalidInput(format!("cannot scale '{}': {}", amount, e)))?;
    Ok(parsed.get_absolute())
}

/// Format smallest units as a decimal string without trailing zeros ("100.5", "0").
pub fn to_decimal(value: U256, decimals: u8) -> String {
    let formatted = match format_units(value, decimals) {
        Ok(s) => s,
        Err(_) => return value.to_string(),
    };

    if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        formatted
    }
}
