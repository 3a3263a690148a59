//! ABI bindings and calldata encoders for the two contracts the signer
//! ever constructs calldata for: Multicall3 and the ERC-20 `transfer`/
//! `allowance` functions.

mod erc20;
mod multicall3;

pub use erc20::{encode_allowance, encode_transfer, ERC20_TRANSFER_SELECTOR};
pub use multicall3::{
    decode_aggregate3_result, encode_aggregate3, Call3, CallResult, MULTICALL3_AGGREGATE3_SELECTOR,
};
