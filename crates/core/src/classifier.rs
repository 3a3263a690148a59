//! Error Classifier (§4.6): maps an opaque RPC/library error into an
//! [`ErrorCategory`], checked in order of specificity — ethers-style
//! error codes first, then message substrings, then raw JSON-RPC
//! numeric codes. Classification never fails; unmatched input is
//! [`ErrorCategory::Unknown`], which is permanent per §7.

use crate::error::ErrorCategory;

pub fn classify(error: &anyhow::Error) -> ErrorCategory {
    let message = error.to_string().to_lowercase();
    classify_message(&message)
}

fn classify_message(message: &str) -> ErrorCategory {
    // ethers-style error codes, as seen verbatim in provider error text.
    if message.contains("nonce_too_low") || message.contains("nonce too low") {
        return ErrorCategory::NonceTooLow;
    }
    if message.contains("nonce_too_high") || message.contains("nonce too high") {
        return ErrorCategory::NonceTooHigh;
    }
    if message.contains("insufficient_funds") || message.contains("insufficient funds") {
        return ErrorCategory::InsufficientFunds;
    }
    if message.contains("replacement_underpriced") || message.contains("replacement transaction underpriced") {
        return ErrorCategory::ReplacementUnderpriced;
    }
    if message.contains("unpredictable_gas_limit") || message.contains("gas required exceeds allowance") {
        return ErrorCategory::GasLimitExceeded;
    }

    // Message substring matches.
    if message.contains("timeout") || message.contains("timed out") {
        return ErrorCategory::Timeout;
    }
    if message.contains("max fee per gas less than block base fee") || message.contains("gas price too low") {
        return ErrorCategory::GasPriceTooLow;
    }
    if message.contains("out of gas") {
        return ErrorCategory::OutOfGas;
    }
    if message.contains("execution reverted") || message.contains("revert") {
        return ErrorCategory::ExecutionReverted;
    }
    if message.contains("invalid transaction") || message.contains("invalid sender") || message.contains("invalid signature") {
        return ErrorCategory::InvalidTransaction;
    }
    if message.contains("connection") || message.contains("network") || message.contains("transport error") {
        return ErrorCategory::Network;
    }

    // JSON-RPC numeric codes, last because they overlap in meaning with
    // the richer substring matches above.
    if let Some(code) = extract_json_rpc_code(message) {
        return match code {
            -32000 => ErrorCategory::ExecutionReverted,
            -32003 => ErrorCategory::InsufficientFunds,
            -32005 => ErrorCategory::Network,
            -32603 => ErrorCategory::Unknown,
            _ => ErrorCategory::Unknown,
        };
    }

    ErrorCategory::Unknown
}

fn extract_json_rpc_code(message: &str) -> Option<i64> {
    let idx = message.find("code\":")?;
    let tail = &message[idx + "code\":".len()..];
    let digits: String = tail
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_substrings() {
        assert_eq!(classify_message("nonce too low"), ErrorCategory::NonceTooLow);
        assert_eq!(classify_message("insufficient funds for gas * price + value"), ErrorCategory::InsufficientFunds);
        assert_eq!(classify_message("execution reverted: ERC20: transfer amount exceeds balance"), ErrorCategory::ExecutionReverted);
        assert_eq!(classify_message("connect ECONNREFUSED 127.0.0.1:8545"), ErrorCategory::Network);
    }

    #[test]
    fn falls_back_to_unknown() {
        assert_eq!(classify_message("something entirely unrecognized"), ErrorCategory::Unknown);
    }

    #[test]
    fn extracts_json_rpc_code() {
        assert_eq!(extract_json_rpc_code(r#"{"code":-32000,"message":"x"}"#), Some(-32000));
        assert_eq!(extract_json_rpc_code("no code here"), None);
    }

    #[test]
    fn permanent_categories_match_the_spec_table() {
        assert!(ErrorCategory::InsufficientFunds.is_permanent());
        assert!(ErrorCategory::InvalidTransaction.is_permanent());
        assert!(ErrorCategory::ExecutionReverted.is_permanent());
        assert!(ErrorCategory::Unknown.is_permanent());
        assert!(!ErrorCategory::Network.is_permanent());
        assert!(!ErrorCategory::NonceTooLow.is_permanent());
    }
}
