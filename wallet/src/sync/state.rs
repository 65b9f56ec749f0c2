//! Per-consumer chain state: the hashes of every block the consumer has
//! accepted, indexed by height and rooted at genesis.

use serde::{Deserialize, Serialize};

use umbra_data_structures::chain::Hash;

use super::error::Error;
use crate::types::BlockchainInterval;

/// Outcome of matching an incoming interval against the local chain
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckResult {
    /// The local chain diverges from the interval
    pub detach_required: bool,
    /// First height at which the chains differ
    pub detach_height: u32,
    /// The interval extends the local chain
    pub has_new_blocks: bool,
    /// Height at which new blocks attach
    pub new_block_height: u32,
}

/// Append-only vector of accepted block hashes, `blocks[0]` being genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizationState {
    blockchain: Vec<Hash>,
}

impl SynchronizationState {
    /// Fresh state containing only the genesis hash
    pub fn new(genesis_block_hash: Hash) -> Self {
        SynchronizationState {
            blockchain: vec![genesis_block_hash],
        }
    }

    /// Number of blocks tracked
    pub fn height(&self) -> u32 {
        self.blockchain.len() as u32
    }

    /// The genesis hash this state is rooted at
    pub fn genesis_block_hash(&self) -> Hash {
        self.blockchain[0]
    }

    /// Build the locator sent to the node: the last ten hashes, then
    /// exponentially sparser samples, ending with genesis.
    pub fn short_history(&self) -> Vec<Hash> {
        let mut history = Vec::new();
        let size = self.blockchain.len();
        let mut i = 0usize;
        let mut current_multiplier = 1usize;
        let mut current_back_offset = 1usize;
        let mut genesis_included = false;

        while current_back_offset < size {
            history.push(self.blockchain[size - current_back_offset]);
            if size - current_back_offset == 0 {
                genesis_included = true;
            }
            if i < 10 {
                current_back_offset += 1;
            } else {
                current_multiplier *= 2;
                current_back_offset += current_multiplier;
            }
            i += 1;
        }

        if !genesis_included {
            history.push(self.blockchain[0]);
        }

        history
    }

    /// Walk the interval against the local chain and report whether a
    /// detach and/or an attach is needed. An interval starting past the end
    /// of the local chain is malformed.
    pub fn check_interval(&self, interval: &BlockchainInterval) -> Result<CheckResult, Error> {
        let size = self.blockchain.len();
        let start = interval.start_height as usize;

        if start > size {
            return Err(Error::MalformedInterval {
                start_height: interval.start_height,
                height: size as u32,
            });
        }

        let mut result = CheckResult::default();
        let interval_end = start + interval.blocks.len();
        let iteration_end = std::cmp::min(size, interval_end);

        for i in start..iteration_end {
            if self.blockchain[i] != interval.blocks[i - start] {
                result.detach_required = true;
                result.detach_height = i as u32;
                break;
            }
        }

        if result.detach_required {
            result.has_new_blocks = true;
            result.new_block_height = result.detach_height;
            return Ok(result);
        }

        if interval_end > size {
            result.has_new_blocks = true;
            result.new_block_height = size as u32;
        }

        Ok(result)
    }

    /// Drop every block at or above `height`
    pub fn detach(&mut self, height: u32) {
        debug_assert!((height as usize) < self.blockchain.len());
        self.blockchain.truncate(height as usize);
    }

    /// Append hashes; they must attach exactly at the current top.
    pub fn add_blocks(&mut self, block_hashes: &[Hash], height: u32) -> Result<(), Error> {
        if self.height() != height {
            return Err(Error::BlockAttachMismatch {
                expected: self.height(),
                actual: height,
            });
        }

        self.blockchain.extend_from_slice(block_hashes);

        Ok(())
    }

    /// Serialize into a state blob
    pub fn save(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serialization of sync state cannot fail")
    }

    /// Deserialize from a state blob
    pub fn load(bytes: &[u8]) -> Result<Self, Error> {
        bincode::deserialize(bytes).map_err(|err| Error::Storage(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> Hash {
        Hash([byte; 32])
    }

    fn state_of(count: u8) -> SynchronizationState {
        let mut state = SynchronizationState::new(hash(0));
        let hashes: Vec<Hash> = (1..count).map(hash).collect();
        state.add_blocks(&hashes, 1).unwrap();
        state
    }

    #[test]
    fn test_short_history_of_tiny_chain_is_dense() {
        let state = state_of(4);
        // Offsets 1, 2, 3 from the top, then genesis.
        assert_eq!(
            vec![hash(3), hash(2), hash(1), hash(0)],
            state.short_history()
        );
    }

    #[test]
    fn test_short_history_goes_sparse_after_ten() {
        let state = state_of(100);
        let history = state.short_history();

        // Dense tail: offsets 1..=11 (the first ten steps each advance by
        // one), then 13, 17, 25, 41, 73, then genesis.
        let offsets: Vec<usize> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 17, 25, 41, 73];
        let mut expected: Vec<Hash> =
            offsets.iter().map(|off| hash((100 - off) as u8)).collect();
        expected.push(hash(0));

        assert_eq!(expected, history);
    }

    #[test]
    fn test_short_history_includes_genesis_once() {
        let state = state_of(2);
        assert_eq!(vec![hash(1), hash(0)], state.short_history());
    }

    #[test]
    fn test_check_interval_nothing_changed() {
        let state = state_of(5);
        let interval = BlockchainInterval {
            start_height: 2,
            blocks: vec![hash(2), hash(3), hash(4)],
        };

        let result = state.check_interval(&interval).unwrap();
        assert!(!result.detach_required);
        assert!(!result.has_new_blocks);
    }

    #[test]
    fn test_check_interval_new_blocks() {
        let state = state_of(5);
        let interval = BlockchainInterval {
            start_height: 3,
            blocks: vec![hash(3), hash(4), hash(5), hash(6)],
        };

        let result = state.check_interval(&interval).unwrap();
        assert!(!result.detach_required);
        assert!(result.has_new_blocks);
        assert_eq!(5, result.new_block_height);
    }

    #[test]
    fn test_check_interval_detach() {
        let state = state_of(5);
        let interval = BlockchainInterval {
            start_height: 2,
            blocks: vec![hash(2), hash(0xAA), hash(0xBB)],
        };

        let result = state.check_interval(&interval).unwrap();
        assert!(result.detach_required);
        assert_eq!(3, result.detach_height);
        assert!(result.has_new_blocks);
        assert_eq!(3, result.new_block_height);
    }

    #[test]
    fn test_check_interval_past_end_is_malformed() {
        let state = state_of(5);
        let interval = BlockchainInterval {
            start_height: 6,
            blocks: vec![hash(6)],
        };

        assert!(matches!(
            state.check_interval(&interval),
            Err(Error::MalformedInterval { .. })
        ));
    }

    #[test]
    fn test_detach_then_add() {
        let mut state = state_of(5);
        state.detach(3);
        assert_eq!(3, state.height());

        state.add_blocks(&[hash(0xAA)], 3).unwrap();
        assert_eq!(4, state.height());

        assert!(state.add_blocks(&[hash(0xBB)], 7).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let state = state_of(20);
        let blob = state.save();

        assert_eq!(state, SynchronizationState::load(&blob).unwrap());
    }
}
