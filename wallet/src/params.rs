//! Runtime parameters of the wallet core.

use umbra_data_structures::chain::Hash;

use crate::constants;

/// Currency and policy parameters shared by every component.
#[derive(Clone, Debug)]
pub struct Params {
    /// Hash of the genesis block; sync states are rooted at it.
    pub genesis_block_hash: Hash,
    /// Confirmations an output needs before it can be spent.
    pub transaction_spendable_age: u32,
    /// Seconds before a locally submitted pool transaction expires.
    pub unconfirmed_transaction_live_time: u64,
}

impl Params {
    /// Parameters for the chain rooted at `genesis_block_hash`.
    pub fn new(genesis_block_hash: Hash) -> Self {
        Params {
            genesis_block_hash,
            ..Default::default()
        }
    }

    /// The consensus unlock-time rule: values below `MAX_BLOCK_NUMBER` are
    /// block heights, anything else is a Unix timestamp.
    pub fn is_transaction_spend_time_unlocked(
        &self,
        unlock_time: u64,
        block_height: u32,
        now: u64,
    ) -> bool {
        if unlock_time < constants::MAX_BLOCK_NUMBER {
            u64::from(block_height) + u64::from(constants::LOCKED_TX_ALLOWED_DELTA_BLOCKS)
                >= unlock_time
        } else {
            now + constants::LOCKED_TX_ALLOWED_DELTA_SECONDS >= unlock_time
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Params {
            genesis_block_hash: Hash::default(),
            transaction_spendable_age: constants::DEFAULT_TRANSACTION_SPENDABLE_AGE,
            unconfirmed_transaction_live_time: constants::UNCONFIRMED_TRANSACTION_LIVE_TIME,
        }
    }
}
