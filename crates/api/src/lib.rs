//! Wire-facing data model and the external-collaborator traits the
//! signing pipeline is built against: queues, a KV store for durable
//! counters, a secrets source, token metadata, and the persistent
//! request/batch store.

mod kvstore;
mod model;
mod queue;
mod secrets;
mod store;
mod token_catalog;

pub use kvstore::{InMemoryKvStore, KVStore, RedisKvStore};
pub use model::{
    BatchStatus, BatchTransaction, DlqMessage, ErrorInfo, ProcessingMode, RequestStatus,
    SignedTransaction, SignedTransactionKind, WithdrawalRequest,
};
pub use queue::{InMemoryQueue, Queue, QueueMessage};
pub use secrets::{EnvSecretsSource, SecretsSource, StaticSecretsSource};
pub use store::{InMemoryStore, PersistentStore};
pub use token_catalog::{StaticTokenCatalog, TokenInfo, TokenLookup};
