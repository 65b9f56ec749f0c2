use umbra_data_structures::chain::Hash;

use crate::node::NodeError;

/// Error raised by containers, subscriptions and consumers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A subscription was offered to a consumer holding a different view key
    #[error("view secret key does not match the consumer")]
    ViewKeyMismatch,
    /// `advance_height` tried to move the container backwards
    #[error("container height cannot decrease from {current} to {requested}")]
    HeightDecrease {
        /// Height the container is at
        current: u32,
        /// Height that was requested
        requested: u32,
    },
    /// An unconfirmed transfer with the same descriptor already exists under
    /// a different transaction
    #[error("transfer of transaction {transaction_hash} already tracked as unconfirmed")]
    TransferExistsUnconfirmed {
        /// Transaction carrying the conflicting transfer
        transaction_hash: Hash,
    },
    /// `mark_transaction_confirmed` was called for a transaction that is not
    /// in the unconfirmed state
    #[error("transaction {transaction_hash} is not unconfirmed")]
    TransactionNotUnconfirmed {
        /// The offending transaction
        transaction_hash: Hash,
    },
    /// The node returned fewer global indices than the transaction has
    /// outputs
    #[error("global output indices do not cover transaction {transaction_hash}")]
    InvalidGlobalIndices {
        /// The transaction being confirmed
        transaction_hash: Hash,
    },
    /// A serialized container carries an unknown version tag
    #[error("unsupported transfers container version {0}")]
    UnsupportedContainerVersion(u32),
    /// A serialized transfers archive carries an unknown version tag
    #[error("unsupported transfers archive version {0}")]
    UnsupportedArchiveVersion(u32),
    /// Serialized state does not decode
    #[error("malformed transfers state: {0}")]
    Storage(String),
    /// A node call issued during scanning failed
    #[error("node error: {0}")]
    Node(#[from] NodeError),
    /// Key math failed while deriving one-time keys
    #[error("key derivation failed: {0}")]
    Key(#[from] umbra_crypto::key::Error),
    /// A lock was poisoned by a panicking thread
    #[error("mutex poison error")]
    MutexPoison,
    /// The blockchain synchronizer refused an operation
    #[error("synchronizer is running, stop it first")]
    SynchronizerRunning,
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_err: std::sync::PoisonError<T>) -> Self {
        Error::MutexPoison
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for transfers operations
pub type Result<T> = std::result::Result<T, Error>;
