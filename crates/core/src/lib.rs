//! Core withdrawal signing logic.
//!
//! This crate provides:
//! - Nonce Coordinator: per-signer nonce allocation with a reuse pool
//!   for returned nonces.
//! - Batch Planner: Multicall3 `aggregate3` batch construction and
//!   gas-bounded splitting.
//! - Transaction Signer: EIP-1559 signing for single transfers and
//!   planned batches.
//! - Error Classifier: maps RPC/processing failures onto a fixed set of
//!   retry-eligibility categories.
//! - DLQ Pipeline: retry accounting and dead-letter routing.
//! - Queue Recovery: startup resynchronization of in-flight work.
//! - Signing Worker: the consume/validate/plan/sign/emit loop tying the
//!   above together for one `(chain, network)`.

mod classifier;
pub mod config;
mod context;
mod dlq;
mod error;
mod nonce;
mod planner;
mod recovery;
mod signer;
mod worker;

pub use classifier::classify;
pub use config::{config, init_config, SignerConfig};
pub use context::ChainContext;
pub use dlq::{DlqOutcome, DlqPipeline};
pub use error::{ErrorCategory, SigningError};
pub use nonce::NonceCoordinator;
pub use planner::{decode_batch_result, encode_batch_transaction, BatchGroup, BatchPlanner, InvalidBatch, PreparedBatch, Transfer};
pub use recovery::{QueueRecovery, RecoveryReport};
pub use signer::{PartialBatchFailure, TransactionSigner};
pub use worker::SigningWorker;
