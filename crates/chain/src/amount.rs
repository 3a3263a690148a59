//! Exact base-unit amount arithmetic. No floating point anywhere in the
//! conversion path — `amount` fields are decimal strings and must compare
//! and round-trip exactly.

use alloy::primitives::U256;
use anyhow::{bail, Context, Result};

/// Parse a positive integer decimal string into `U256`.
///
/// This is what the batch planner and signer validate `amount` against:
/// request-level amounts are already base-unit integers (wei, or the
/// token's smallest unit), never human-scale decimals.
pub fn parse_positive_u256(amount: &str) -> Result<U256> {
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        bail!("amount is not a positive integer: {amount:?}");
    }
    let value = U256::from_str_radix(amount, 10).context("amount overflows u256")?;
    if value.is_zero() {
        bail!("amount must be positive, got zero");
    }
    Ok(value)
}

/// Convert a human-scale decimal string (e.g. `"1.5"`) to its base-unit
/// representation for a token with `decimals` decimal places.
///
/// Exact string manipulation only — never goes through `f64`.
pub fn to_base_units(amount: &str, decimals: u8) -> Result<U256> {
    let amount = amount.trim();
    if amount.is_empty() {
        bail!("amount is empty");
    }
    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        bail!("amount has no digits: {amount:?}");
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        bail!("amount is not a decimal number: {amount:?}");
    }
    if frac_part.len() > decimals as usize {
        bail!(
            "amount has {} fractional digits, exceeds {} decimals for this token",
            frac_part.len(),
            decimals
        );
    }

    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let padded_frac = format!("{:0<width$}", frac_part, width = decimals as usize);
    let digits = format!("{int_part}{padded_frac}");
    let digits = digits.trim_start_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };

    U256::from_str_radix(digits, 10).context("amount overflows u256")
}

/// Inverse of [`to_base_units`]: format a base-unit value back to its
/// human-scale decimal string for a token with `decimals` decimal places.
/// Trims trailing fractional zeros; never emits a bare trailing dot.
pub fn format_base_units(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }
    let digits = if digits.len() <= decimals {
        format!("{:0>width$}", digits, width = decimals + 1)
    } else {
        digits
    };
    let split_at = digits.len() - decimals;
    let (int_part, frac_part) = digits.split_at(split_at);
    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_trimmed}")
    }
}
