use crate::node::NodeError;

/// Error raised by the blockchain synchronizer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The synchronizer is shutting down
    #[error("synchronization interrupted")]
    Interrupted,
    /// The node call failed
    #[error("node error: {0}")]
    Node(#[from] NodeError),
    /// A payload received from the node does not parse
    #[error("failed to parse chain data: {0}")]
    Chain(#[from] umbra_data_structures::error::Error),
    /// The node sent an interval that does not meet the local chain
    #[error(
        "malformed block interval: starts at {start_height} but local chain has {height} blocks"
    )]
    MalformedInterval {
        /// First height of the offending interval
        start_height: u32,
        /// Local chain length
        height: u32,
    },
    /// Blocks were offered at a height other than the chain top
    #[error("blocks attach at height {expected}, got {actual}")]
    BlockAttachMismatch {
        /// Local chain top
        expected: u32,
        /// Offered attach height
        actual: u32,
    },
    /// A consumer rejected a block interval
    #[error("a consumer failed to process blocks starting at height {start_height}")]
    ConsumerFailed {
        /// First height of the aborted interval
        start_height: u32,
    },
    /// A consumer failed while ingesting pool changes
    #[error("transfers error: {0}")]
    Transfers(#[from] crate::transfers::Error),
    /// The operation requires the worker to be stopped
    #[error("synchronizer is running, stop it first")]
    NotStopped,
    /// `start` was called twice
    #[error("synchronizer already started")]
    AlreadyStarted,
    /// `start` was called with no registered consumers
    #[error("cannot start without consumers")]
    NoConsumers,
    /// The referenced consumer is not registered
    #[error("unknown consumer")]
    UnknownConsumer,
    /// Stored state belongs to a different chain
    #[error("genesis block hash mismatch in stored state")]
    GenesisMismatch,
    /// Stored state does not deserialize
    #[error("malformed synchronizer state: {0}")]
    Storage(String),
}

/// Result type for synchronizer operations
pub type Result<T> = std::result::Result<T, Error>;
