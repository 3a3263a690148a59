//! Multicall3 `aggregate3` binding.
//!
//! `aggregate3((address,bool,bytes)[]) returns ((bool,bytes)[])` —
//! selector `0x82ad56cb`. The universal deployment address is
//! `0xcA11bde05977b3631167028862bE2a173976CA11`, but the batch planner
//! always takes the address from `ChainContext` so chains with a
//! different deployment still work.

use alloy::primitives::{Address, Bytes};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::Result;

sol! {
    #[derive(Debug, Clone, PartialEq)]
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    #[derive(Debug, Clone, PartialEq)]
    struct CallResult {
        bool success;
        bytes returnData;
    }

    interface IMulticall3 {
        function aggregate3(Call3[] calldata calls) external payable returns (CallResult[] memory returnData);
    }
}

pub const MULTICALL3_AGGREGATE3_SELECTOR: [u8; 4] = [0x82, 0xad, 0x56, 0xcb];

impl Call3 {
    pub fn new(target: Address, call_data: Bytes) -> Self {
        Self {
            target,
            allowFailure: false,
            callData: call_data,
        }
    }
}

/// Encode `aggregate3(calls)` calldata.
pub fn encode_aggregate3(calls: Vec<Call3>) -> Bytes {
    let call = IMulticall3::aggregate3Call { calls };
    Bytes::from(call.abi_encode())
}

/// Decode the raw `eth_call` return bytes of an `aggregate3` invocation.
pub fn decode_aggregate3_result(return_data: &[u8]) -> Result<Vec<CallResult>> {
    let decoded = IMulticall3::aggregate3Call::abi_decode_returns(return_data, true)?;
    Ok(decoded.returnData)
}
