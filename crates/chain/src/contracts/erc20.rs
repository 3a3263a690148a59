//! ERC-20 `transfer`/`allowance` bindings — the only ERC-20 surface this
//! service touches. Approvals are out of scope: allowances are assumed
//! pre-granted and the batch planner only warns when they are short.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }
}

pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Encode `transfer(to, amount)` calldata.
pub fn encode_transfer(to: Address, amount: U256) -> Bytes {
    let call = IERC20::transferCall { to, amount };
    Bytes::from(call.abi_encode())
}

/// Encode `allowance(owner, spender)` calldata.
pub fn encode_allowance(owner: Address, spender: Address) -> Bytes {
    let call = IERC20::allowanceCall { owner, spender };
    Bytes::from(call.abi_encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_calldata_starts_with_selector() {
        let calldata = encode_transfer(Address::ZERO, U256::from(1_000_000u64));
        assert_eq!(&calldata[0..4], &ERC20_TRANSFER_SELECTOR[..]);
        assert_eq!(calldata.len(), 4 + 32 + 32);
    }

    #[test]
    fn allowance_calldata_encodes_two_addresses() {
        let calldata = encode_allowance(Address::ZERO, Address::ZERO);
        assert_eq!(calldata.len(), 4 + 32 + 32);
    }
}
