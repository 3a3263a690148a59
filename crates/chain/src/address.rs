//! EIP-55 checksum handling.
//!
//! Accepts both checksummed and all-lowercase 40-hex-character addresses.
//! Canonicalizes to checksummed before encoding; falls back to lowercase
//! with a warning if checksum validation of mixed-case input fails,
//! rather than silently rewriting or rejecting it.

use alloy::primitives::Address;
use anyhow::{bail, Result};

/// `true` iff `s` (with or without `0x` prefix) is exactly 40 hex digits.
pub fn validate_hex_address(s: &str) -> bool {
    let s = s.strip_prefix("0x").unwrap_or(s);
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// EIP-55 checksummed representation of `address`.
pub fn checksum(address: Address) -> String {
    address.to_checksum(None)
}

/// Parse a user-supplied address string, accepting checksummed or
/// all-lowercase hex. Mixed-case input that fails EIP-55 validation is
/// still accepted (as its lowercase form) but logged as a warning.
pub fn normalize_address(input: &str) -> Result<Address> {
    if !validate_hex_address(input) {
        bail!("not a 40-hex-character address: {input:?}");
    }
    let lower = input.to_lowercase();
    let parsed: Address = lower.parse()?;

    if input == lower {
        return Ok(parsed);
    }

    let expected = parsed.to_checksum(None);
    if input != expected {
        tracing::warn!(
            input,
            expected = %expected,
            "address failed EIP-55 checksum validation, falling back to lowercase"
        );
    }
    Ok(parsed)
}
