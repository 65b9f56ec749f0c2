//! Constants used across the wallet core.

/// Block height recorded for transactions that are still in the pool.
pub const UNCONFIRMED_TRANSACTION_HEIGHT: u32 = u32::MAX;

/// Global output index recorded for outputs of unconfirmed transactions.
pub const UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX: u32 = u32::MAX;

/// Unlock times below this value are block heights, above it Unix timestamps.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// Height slack granted when interpreting an unlock time as a block height.
pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u32 = 1;

/// Clock slack granted when interpreting an unlock time as a timestamp.
pub const LOCKED_TX_ALLOWED_DELTA_SECONDS: u64 = 60 * 60 * 2;

/// Confirmations an output needs before it is considered spendable.
pub const DEFAULT_TRANSACTION_SPENDABLE_AGE: u32 = 10;

/// Seconds a locally submitted transaction may sit in the pool before the
/// unconfirmed cache drops it.
pub const UNCONFIRMED_TRANSACTION_LIVE_TIME: u64 = 60 * 60 * 24;

/// How long the synchronizer worker sleeps between idle polls.
pub const SYNC_IDLE_SLEEP_MILLIS: u64 = 200;

/// Pause before retrying when the node reports more blocks than it returned.
pub const SYNC_RETRY_SLEEP_MILLIS: u64 = 100;

/// Version tag of a serialized transfers container.
pub const TRANSFERS_CONTAINER_STORAGE_VERSION: u32 = 1;

/// Version tag of a serialized transfers synchronizer archive.
pub const TRANSFERS_STORAGE_ARCHIVE_VERSION: u32 = 0;

/// Version byte of the encrypted key container file.
pub const CONTAINER_STORAGE_VERSION: u8 = 1;

/// Version of the wallet snapshot stream. Versions 1..=4 load with
/// migration, newer versions are rejected.
pub const WALLET_SERIALIZATION_VERSION: u32 = 5;
