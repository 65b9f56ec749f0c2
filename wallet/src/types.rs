//! Type definitions shared by the wallet components.

use serde::{Deserialize, Serialize};

pub use umbra_crypto::key::{KeyImage, PublicKey, SecretKey};
pub use umbra_data_structures::{
    chain::{AccountKeys, AccountPublicAddress, Block, Hash, Hashable},
    transaction::{Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget},
};

/// Filter masks accepted by balance and output queries.
///
/// A query matches a transfer when both its state bit and its type bit are
/// present in the mask.
pub mod flags {
    /// Confirmed, aged and spendable
    pub const INCLUDE_STATE_UNLOCKED: u32 = 0x01;
    /// Unconfirmed, or confirmed but younger than the spendable age
    pub const INCLUDE_STATE_LOCKED: u32 = 0x02;
    /// Aged but still held by its unlock time
    pub const INCLUDE_STATE_SOFT_LOCKED: u32 = 0x04;
    /// Consumed by a confirmed or pool spend
    pub const INCLUDE_STATE_SPENT: u32 = 0x08;
    /// One-time key outputs
    pub const INCLUDE_TYPE_KEY: u32 = 0x100;
    /// Multisignature outputs
    pub const INCLUDE_TYPE_MULTISIGNATURE: u32 = 0x200;
    /// All state bits
    pub const INCLUDE_STATE_ALL: u32 = 0xff;
    /// All type bits
    pub const INCLUDE_TYPE_ALL: u32 = 0xff00;
    /// Key outputs ready to spend
    pub const INCLUDE_KEY_UNLOCKED: u32 = INCLUDE_TYPE_KEY | INCLUDE_STATE_UNLOCKED;
    /// Key outputs not yet ready to spend
    pub const INCLUDE_KEY_NOT_UNLOCKED: u32 =
        INCLUDE_TYPE_KEY | INCLUDE_STATE_LOCKED | INCLUDE_STATE_SOFT_LOCKED;
    /// Everything not yet ready to spend
    pub const INCLUDE_ALL_LOCKED: u32 =
        INCLUDE_TYPE_ALL | INCLUDE_STATE_LOCKED | INCLUDE_STATE_SOFT_LOCKED;
    /// Everything ready to spend
    pub const INCLUDE_ALL_UNLOCKED: u32 = INCLUDE_TYPE_ALL | INCLUDE_STATE_UNLOCKED;
    /// Everything the container tracks
    pub const INCLUDE_ALL: u32 = INCLUDE_TYPE_ALL | INCLUDE_STATE_ALL;
    /// Default query mask
    pub const INCLUDE_DEFAULT: u32 = INCLUDE_KEY_UNLOCKED;
}

/// Kind of a tracked output
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    /// One-time key output
    Key,
    /// Multisignature output
    Multisignature,
}

/// Position of a transaction inside the chain
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBlockInfo {
    /// Block height, `UNCONFIRMED_TRANSACTION_HEIGHT` for pool transactions
    pub height: u32,
    /// Block timestamp
    pub timestamp: u64,
    /// Position of the transaction inside the block
    pub transaction_index: u32,
}

impl TransactionBlockInfo {
    /// Block info for a transaction that is still in the pool
    pub fn unconfirmed() -> Self {
        TransactionBlockInfo {
            height: crate::constants::UNCONFIRMED_TRANSACTION_HEIGHT,
            timestamp: 0,
            transaction_index: 0,
        }
    }

    /// Whether this is the pool sentinel
    pub fn is_unconfirmed(&self) -> bool {
        self.height == crate::constants::UNCONFIRMED_TRANSACTION_HEIGHT
    }
}

/// Ledger-level metadata of a transaction that touches the wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInformation {
    /// Transaction hash
    pub transaction_hash: Hash,
    /// Transaction public key from the extra field
    pub public_key: PublicKey,
    /// Including block height, `UNCONFIRMED_TRANSACTION_HEIGHT` in the pool
    pub block_height: u32,
    /// Including block timestamp
    pub timestamp: u64,
    /// Unlock time of the transaction outputs
    pub unlock_time: u64,
    /// Sum of input amounts
    pub total_amount_in: u64,
    /// Sum of output amounts
    pub total_amount_out: u64,
    /// Raw extra blob
    pub extra: Vec<u8>,
    /// Payment id, zero when absent
    pub payment_id: Hash,
}

/// Type-specific part of an owned output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOutputTargetInfo {
    /// One-time key output
    Key {
        /// The one-time output key
        output_key: PublicKey,
    },
    /// Multisignature output
    Multisignature {
        /// Signatures required to spend
        required_signatures: u32,
    },
}

/// A single output owned by the wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutputInformation {
    /// Amount carried by the output
    pub amount: u64,
    /// Position in the global output set of its amount,
    /// `UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX` while unconfirmed
    pub global_output_index: u32,
    /// Position of the output inside its transaction
    pub output_in_transaction: u32,
    /// Containing transaction
    pub transaction_hash: Hash,
    /// Containing transaction public key
    pub transaction_public_key: PublicKey,
    /// Type-specific data
    pub target: TransactionOutputTargetInfo,
}

impl TransactionOutputInformation {
    /// Kind of this output
    pub fn output_type(&self) -> OutputType {
        match self.target {
            TransactionOutputTargetInfo::Key { .. } => OutputType::Key,
            TransactionOutputTargetInfo::Multisignature { .. } => OutputType::Multisignature,
        }
    }
}

/// An owned output as detected by the scanner, before it enters a container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutputInformationIn {
    /// The output itself
    pub output: TransactionOutputInformation,
    /// Key image, present for key outputs when the spend secret is known
    pub key_image: Option<KeyImage>,
}

/// Deduplication key of a transfer: two outputs with the same descriptor are
/// the same economic coin.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpentOutputDescriptor {
    /// Key outputs are identified by their key image
    KeyImage(KeyImage),
    /// Multisignature outputs by their amount and global index
    MultisignatureOutput {
        /// Output amount
        amount: u64,
        /// Global index within that amount
        global_output_index: u32,
    },
}

impl TransactionOutputInformationIn {
    /// The descriptor of this output, when it already has one. Key outputs
    /// without a key image (tracking wallets) and unconfirmed
    /// multisignature outputs have none yet.
    pub fn spent_output_descriptor(&self) -> Option<SpentOutputDescriptor> {
        match self.output.target {
            TransactionOutputTargetInfo::Key { .. } => {
                self.key_image.map(SpentOutputDescriptor::KeyImage)
            }
            TransactionOutputTargetInfo::Multisignature { .. } => {
                if self.output.global_output_index
                    == crate::constants::UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX
                {
                    None
                } else {
                    Some(SpentOutputDescriptor::MultisignatureOutput {
                        amount: self.output.amount,
                        global_output_index: self.output.global_output_index,
                    })
                }
            }
        }
    }
}

/// A spent output together with where it was spent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSpentOutputInformation {
    /// The output that was consumed
    pub output: TransactionOutputInformation,
    /// Key image of the spend, for key outputs
    pub key_image: Option<KeyImage>,
    /// Height of the spending block
    pub spending_block_height: u32,
    /// Timestamp of the spending block
    pub timestamp: u64,
    /// Spending transaction
    pub spending_transaction_hash: Hash,
    /// Position of the consuming input inside the spending transaction
    pub input_in_transaction: u32,
}

/// Earliest point of the chain a subscription cares about
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStart {
    /// Unix timestamp
    pub timestamp: u64,
    /// Block height
    pub height: u64,
}

/// A contiguous slice of block hashes plus its starting height
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockchainInterval {
    /// Height of the first hash
    pub start_height: u32,
    /// Consecutive block hashes
    pub blocks: Vec<Hash>,
}

/// A block as handed to consumers: always the hash, optionally the parsed
/// body with the coinbase and included transactions. A body-less block is
/// opaque chain padding that advances sync state only.
#[derive(Clone, Debug)]
pub struct CompleteBlock {
    /// Block hash
    pub block_hash: Hash,
    /// Parsed body, absent for hash-only advances
    pub block: Option<Block>,
    /// Coinbase plus included transactions, empty without a body
    pub transactions: Vec<Transaction>,
}

/// Everything needed to track one address
#[derive(Clone, Debug)]
pub struct AccountSubscription {
    /// Account keys
    pub keys: AccountKeys,
    /// Earliest chain point of interest
    pub sync_start: SyncStart,
    /// Confirmations before outputs become spendable
    pub transaction_spendable_age: u32,
}
