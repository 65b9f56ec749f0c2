//! Interface to the remote node.
//!
//! The wallet core consumes this interface, it never implements it. Every
//! call is asynchronous: the implementation performs the request on its own
//! transport and invokes the callback exactly once with the result. The
//! synchronizer bridges each callback into a future and blocks its worker
//! thread on it.

use umbra_data_structures::{chain::Hash, transaction::Transaction};

/// Error delivered through a node callback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// Transport failure: the request never produced a response
    #[error("node transport failed: {0}")]
    Transport(String),
    /// The request was abandoned because the caller is shutting down
    #[error("request interrupted")]
    Interrupted,
    /// The node rejected the request
    #[error("node rejected request: {0}")]
    Rejected(String),
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Completion callback of an asynchronous node call
pub type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// A block as returned by a block range query. The body and transaction
/// blobs are optional; a hash-only entry is chain padding the wallet does
/// not need to scan.
#[derive(Clone, Debug, Default)]
pub struct RawBlock {
    /// Block hash
    pub block_hash: Hash,
    /// Serialized block body, if the node chose to send it
    pub block: Option<Vec<u8>>,
    /// Serialized transactions included in the block, coinbase excluded
    pub transactions: Vec<Vec<u8>>,
}

/// Response to `query_blocks`
#[derive(Clone, Debug, Default)]
pub struct QueryBlocksResponse {
    /// Height of the first returned block
    pub start_height: u32,
    /// Consecutive blocks starting at `start_height`
    pub blocks: Vec<RawBlock>,
}

/// Response to `get_pool_symmetric_difference`
#[derive(Clone, Debug, Default)]
pub struct PoolSymmetricDifference {
    /// Whether the `last_block_hash` the caller sent is still the chain tip
    pub is_last_known_block_actual: bool,
    /// Serialized pool transactions unknown to the caller
    pub added_transactions: Vec<Vec<u8>>,
    /// Hashes the caller knows that are no longer in the pool
    pub deleted_transaction_hashes: Vec<Hash>,
}

/// One sampled output, used as a ring member for outgoing transactions
#[derive(Clone, Debug)]
pub struct RandomOutputEntry {
    /// Global index of the output
    pub global_output_index: u32,
    /// One-time key of the output
    pub output_key: umbra_crypto::key::PublicKey,
}

/// Sampled outputs for one amount
#[derive(Clone, Debug)]
pub struct RandomAmountOutputs {
    /// The amount the outputs belong to
    pub amount: u64,
    /// Sampled outputs
    pub outputs: Vec<RandomOutputEntry>,
}

/// Client side of the node RPC surface the wallet core needs.
pub trait NodeClient: Send + Sync {
    /// Query a range of blocks. `known_blocks` is a locator (most recent
    /// first, ending with genesis); the node responds with blocks from the
    /// fork point on, possibly hash-only before `timestamp`.
    fn query_blocks(
        &self,
        known_blocks: Vec<Hash>,
        timestamp: u64,
        callback: Callback<QueryBlocksResponse>,
    );

    /// Compute the symmetric difference between the caller's view of the
    /// pool and the node's.
    fn get_pool_symmetric_difference(
        &self,
        known_tx_hashes: Vec<Hash>,
        last_block_hash: Hash,
        callback: Callback<PoolSymmetricDifference>,
    );

    /// Fetch the global output indices of a confirmed transaction.
    fn get_transaction_outs_global_indices(&self, transaction_hash: Hash, callback: Callback<Vec<u32>>);

    /// Sample random outputs per amount for ring construction.
    fn get_random_outs_by_amounts(
        &self,
        amounts: Vec<u64>,
        outs_count: u32,
        callback: Callback<Vec<RandomAmountOutputs>>,
    );

    /// Submit a transaction to the network.
    fn relay_transaction(&self, transaction: Transaction, callback: Callback<()>);

    /// Best chain height the node has announced so far.
    fn last_known_block_height(&self) -> u32;
}
