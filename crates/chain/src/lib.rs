//! On-chain interaction layer for the withdrawal signing service.
//!
//! This crate provides:
//! - `ChainClient`: the RPC surface the signer needs (chain id, nonce,
//!   fee data, gas estimation, eth_call), plus an `alloy`-backed
//!   implementation.
//! - Multicall3 and ERC-20 ABI bindings and calldata encoders.
//! - Address checksum/validation helpers.
//! - Exact base-unit amount conversion (no floats).
//! - `GasPriceCache`, a process-local short-TTL cache of EIP-1559 fee
//!   suggestions.

mod address;
mod amount;
pub mod contracts;
mod client;
mod gas;

pub use address::{checksum, normalize_address, validate_hex_address};
pub use amount::{format_base_units, parse_positive_u256, to_base_units};
pub use client::{AlloyChainClient, BlockTag, ChainClient, FeeData, RetryPolicy};
pub use gas::GasPriceCache;
