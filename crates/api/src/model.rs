//! Wire-shape data model for withdrawal requests, planned batches and
//! signed transactions. These are the types that cross the queue and
//! persistent-store boundaries, so every field that travels there is a
//! plain, `serde`-friendly type — amounts as decimal strings, addresses
//! as checksummed hex strings — never a float, never an `alloy` type
//! that assumes a specific RPC transport is in scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a single withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Signing,
    Signed,
    Submitted,
    Confirmed,
    Failed,
    DeadLettered,
}

/// Lifecycle of a planned batch transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Signed,
    Submitted,
    Confirmed,
    Cancelled,
    Failed,
}

/// Whether a request is eligible for batching at all, or must always go
/// out as its own transaction (e.g. a native-asset withdrawal that
/// can't ride inside a Multicall3 `aggregate3` call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMode {
    Batchable,
    SingleOnly,
}

/// Whether a `SignedTransaction` carries one request or a whole batch.
/// Unlike the on-chain shape of a withdrawal (native vs. ERC-20, which
/// `token_address.is_some()` already tells you), this is not derivable
/// from any other field on the row, so it is its own attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignedTransactionKind {
    Single,
    Batch,
}

/// A single withdrawal instruction as it arrives off the intake queue.
///
/// `amount` is always a base-unit integer decimal string (e.g. wei for
/// native transfers, token base units for ERC-20) — never a
/// human-scaled decimal and never a float.
///
/// Whether this is a native or ERC-20 transfer is carried solely by
/// `token_address` (`None` ⇒ native) — there is deliberately no separate
/// `transactionType` flag, since two independent fields asserting the
/// same fact can disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub request_id: String,
    pub chain_id: u64,
    pub network: String,
    /// `None` for native transfers; the ERC-20 contract address otherwise.
    pub token_address: Option<String>,
    pub recipient: String,
    pub amount: String,
    pub processing_mode: ProcessingMode,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of signing attempts made so far, tracked separately from
    /// DLQ retry counts (§4.5 distinguishes the two).
    pub attempt_count: u32,
    pub batch_id: Option<String>,
    pub last_error: Option<ErrorInfo>,
}

/// A Multicall3 `aggregate3` batch planned from one or more batchable
/// requests.
///
/// Invariant (§3): once `status = SIGNED`, `nonce`, `gas_limit` and
/// `tx_hash` are all `Some`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTransaction {
    pub batch_id: String,
    pub chain_id: u64,
    pub network: String,
    pub request_ids: Vec<String>,
    pub multicall_address: String,
    pub encoded_calldata: String,
    pub total_amount: String,
    pub symbol: String,
    pub estimated_gas: u64,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub tx_hash: Option<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fully signed, ready-to-submit transaction, covering both the
/// single-request and batched paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub request_ids: Vec<String>,
    pub batch_id: Option<String>,
    pub transaction_type: SignedTransactionKind,
    pub chain_id: u64,
    pub chain: String,
    pub network: String,
    pub from: String,
    pub to: String,
    pub nonce: u64,
    pub value: String,
    pub data: String,
    pub gas_limit: u64,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    pub raw_signed_tx: String,
    pub tx_hash: String,
    pub try_count: u32,
    pub status: RequestStatus,
    pub signed_at: DateTime<Utc>,
}

/// Structured detail for the last error a request or batch hit,
/// classified per §4.6 (`ErrorCategory`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub category: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// A message that exhausted its retry budget and was routed to the
/// dead-letter queue (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqMessage {
    pub request_id: String,
    pub batch_id: Option<String>,
    pub payload: HashMap<String, String>,
    pub error: ErrorInfo,
    pub retry_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}
