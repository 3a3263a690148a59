//! Typed outcomes at the boundary where the *kind* of failure decides
//! retry-vs-DLQ-vs-fatal behavior (§7). Everything below this boundary
//! stays `anyhow::Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("batch validation failed: {0:?}")]
    InvalidBatch(Vec<String>),

    #[error("gas estimation failed: {0}")]
    GasEstimationFailed(String),

    #[error("nonce store unavailable: {0}")]
    NonceStoreUnavailable(String),

    #[error("configured chain id {configured} does not match RPC-reported chain id {rpc}")]
    ChainIdMismatch { configured: u64, rpc: u64 },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Classifier output (§4.6). Permanent categories are fatal for the
/// current attempt and route straight to the DLQ; all others are
/// retry-eligible up to `maxRetries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Timeout,
    NonceTooLow,
    NonceTooHigh,
    InsufficientFunds,
    GasPriceTooLow,
    GasLimitExceeded,
    ReplacementUnderpriced,
    ExecutionReverted,
    OutOfGas,
    InvalidTransaction,
    Unknown,
}

impl ErrorCategory {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ErrorCategory::InsufficientFunds
                | ErrorCategory::InvalidTransaction
                | ErrorCategory::ExecutionReverted
                | ErrorCategory::Unknown
        )
    }
}
