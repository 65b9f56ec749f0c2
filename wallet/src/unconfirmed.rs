//! Cache of locally submitted, not yet mined transactions.
//!
//! Outputs consumed by a pending send are recorded here so balance queries
//! can exclude them before the network echoes the spend back. Entries that
//! outstay the configured live time are expired and reported so the facade
//! can flag the transaction as deleted.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};

use umbra_crypto::key::PublicKey;
use umbra_data_structures::{
    chain::{Hash, Hashable},
    transaction::Transaction,
};

use crate::types::TransactionOutputInformation;

/// Identity of an output independent of its global index: the transaction
/// key plus the output position.
pub type TransactionOutputId = (PublicKey, u32);

fn output_id(output: &TransactionOutputInformation) -> TransactionOutputId {
    (output.transaction_public_key, output.output_in_transaction)
}

/// One pending outgoing transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnconfirmedTransferDetails {
    /// The transaction body, kept for re-relay
    pub transaction: Transaction,
    /// User-facing transaction id
    pub transaction_id: u64,
    /// Declared amount of the send
    pub amount: u64,
    /// Total amount of the consumed outputs
    pub outs_amount: u64,
    /// Unix time the transaction was sent
    pub sent_time: u64,
    /// Outputs the transaction consumed
    pub used_outputs: Vec<TransactionOutputId>,
}

/// The cache itself. The reverse output index is derived state and is
/// rebuilt when deserializing.
#[derive(Debug, Serialize)]
pub struct UnconfirmedTransactionsCache {
    live_time: u64,
    transactions: BTreeMap<Hash, UnconfirmedTransferDetails>,
    #[serde(skip)]
    used_outputs: HashSet<TransactionOutputId>,
}

impl UnconfirmedTransactionsCache {
    /// Cache expiring entries after `live_time` seconds
    pub fn new(live_time: u64) -> Self {
        UnconfirmedTransactionsCache {
            live_time,
            transactions: BTreeMap::new(),
            used_outputs: HashSet::new(),
        }
    }

    /// Record a sent transaction and lock the outputs it consumed
    pub fn add(
        &mut self,
        transaction: &Transaction,
        transaction_id: u64,
        amount: u64,
        sent_time: u64,
        used_outputs: &[TransactionOutputInformation],
    ) {
        let mut outs_amount = 0u64;
        let mut ids = Vec::with_capacity(used_outputs.len());
        for output in used_outputs {
            let id = output_id(output);
            ids.push(id);
            self.used_outputs.insert(id);
            outs_amount = outs_amount.saturating_add(output.amount);
        }

        self.transactions.insert(
            transaction.hash(),
            UnconfirmedTransferDetails {
                transaction: transaction.clone(),
                transaction_id,
                amount,
                outs_amount,
                sent_time,
                used_outputs: ids,
            },
        );
    }

    /// Forget a transaction, releasing its outputs
    pub fn erase(&mut self, transaction_hash: &Hash) {
        if let Some(details) = self.transactions.remove(transaction_hash) {
            for id in &details.used_outputs {
                self.used_outputs.remove(id);
            }
        }
    }

    /// Whether an output is locked by a pending send
    pub fn is_used(&self, output: &TransactionOutputInformation) -> bool {
        self.used_outputs.contains(&output_id(output))
    }

    /// User-facing id of a pending transaction
    pub fn find_transaction_id(&self, transaction_hash: &Hash) -> Option<u64> {
        self.transactions
            .get(transaction_hash)
            .map(|details| details.transaction_id)
    }

    /// Re-point a pending transaction at another user-facing id
    pub fn update_transaction_id(&mut self, transaction_hash: &Hash, transaction_id: u64) {
        if let Some(details) = self.transactions.get_mut(transaction_hash) {
            details.transaction_id = transaction_id;
        }
    }

    /// Total amount of outputs locked by pending sends
    pub fn count_outs_amount(&self) -> u64 {
        self.transactions
            .values()
            .map(|details| details.outs_amount)
            .fold(0u64, u64::saturating_add)
    }

    /// Total declared amount of pending sends
    pub fn count_transactions_amount(&self) -> u64 {
        self.transactions
            .values()
            .map(|details| details.amount)
            .fold(0u64, u64::saturating_add)
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Expire entries sent at or before `now - live_time`, returning their
    /// user-facing ids.
    pub fn delete_outdated(&mut self, now: u64) -> Vec<u64> {
        let deadline = now.saturating_sub(self.live_time);
        let expired: Vec<Hash> = self
            .transactions
            .iter()
            .filter(|(_, details)| details.sent_time <= deadline)
            .map(|(hash, _)| *hash)
            .collect();

        let mut deleted = Vec::with_capacity(expired.len());
        for hash in expired {
            if let Some(details) = self.transactions.remove(&hash) {
                log::debug!("pending transaction {} timed out", hash);
                for id in &details.used_outputs {
                    self.used_outputs.remove(id);
                }
                deleted.push(details.transaction_id);
            }
        }

        deleted
    }

    /// Drop everything
    pub fn reset(&mut self) {
        self.transactions.clear();
        self.used_outputs.clear();
    }

    fn collect_used_outputs(&mut self) {
        let mut used = HashSet::new();
        for details in self.transactions.values() {
            used.extend(details.used_outputs.iter().copied());
        }
        self.used_outputs = used;
    }
}

impl<'de> Deserialize<'de> for UnconfirmedTransactionsCache {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct CacheDto {
            live_time: u64,
            transactions: BTreeMap<Hash, UnconfirmedTransferDetails>,
        }

        let dto = CacheDto::deserialize(deserializer)?;
        let mut cache = UnconfirmedTransactionsCache {
            live_time: dto.live_time,
            transactions: dto.transactions,
            used_outputs: HashSet::new(),
        };
        cache.collect_used_outputs();

        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionOutputTargetInfo;

    fn output(tx_key: u8, index: u32, amount: u64) -> TransactionOutputInformation {
        TransactionOutputInformation {
            amount,
            global_output_index: 5,
            output_in_transaction: index,
            transaction_hash: Hash([tx_key; 32]),
            transaction_public_key: PublicKey([tx_key; 32]),
            target: TransactionOutputTargetInfo::Key {
                output_key: PublicKey([9; 32]),
            },
        }
    }

    fn transaction(seed: u8) -> Transaction {
        let mut transaction = Transaction::default();
        transaction.prefix.extra = vec![0x02, 1, seed];
        transaction
    }

    #[test]
    fn test_add_locks_outputs() {
        let mut cache = UnconfirmedTransactionsCache::new(100);
        let spent = [output(1, 0, 30), output(1, 1, 40)];

        cache.add(&transaction(1), 7, 65, 1000, &spent);

        assert!(cache.is_used(&spent[0]));
        assert!(cache.is_used(&spent[1]));
        assert!(!cache.is_used(&output(2, 0, 10)));
        assert_eq!(70, cache.count_outs_amount());
        assert_eq!(65, cache.count_transactions_amount());
        assert_eq!(Some(7), cache.find_transaction_id(&transaction(1).hash()));
    }

    #[test]
    fn test_erase_releases_outputs() {
        let mut cache = UnconfirmedTransactionsCache::new(100);
        let spent = [output(1, 0, 30)];
        cache.add(&transaction(1), 7, 30, 1000, &spent);

        cache.erase(&transaction(1).hash());

        assert!(!cache.is_used(&spent[0]));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_outdated() {
        let mut cache = UnconfirmedTransactionsCache::new(100);
        cache.add(&transaction(1), 1, 10, 1000, &[output(1, 0, 10)]);
        cache.add(&transaction(2), 2, 20, 1950, &[output(2, 0, 20)]);

        let deleted = cache.delete_outdated(2000);

        assert_eq!(vec![1], deleted);
        assert_eq!(1, cache.len());
        assert!(!cache.is_used(&output(1, 0, 10)));
        assert!(cache.is_used(&output(2, 0, 20)));
    }

    #[test]
    fn test_serialization_rebuilds_used_outputs() {
        let mut cache = UnconfirmedTransactionsCache::new(100);
        let spent = [output(1, 0, 30)];
        cache.add(&transaction(1), 7, 30, 1000, &spent);

        let bytes = bincode::serialize(&cache).unwrap();
        let restored: UnconfirmedTransactionsCache = bincode::deserialize(&bytes).unwrap();

        assert!(restored.is_used(&spent[0]));
        assert_eq!(30, restored.count_outs_amount());
    }
}
