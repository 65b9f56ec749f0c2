//! User-facing transaction history.
//!
//! Containers track outputs; this cache tracks the transactions a user sees:
//! one record per send or receive with its signed balance change, fee and
//! lifecycle state, plus the per-recipient transfer legs of outgoing sends.
//! It owns the unconfirmed-transactions cache so that a locally submitted
//! send is tied to its history record until it is mined or times out.
//!
//! Transfer legs live in one flat vector; a transaction references its legs
//! as a contiguous `(first_transfer_id, transfer_count)` range. Cancelled
//! and failed transactions are compacted away when the cache is serialized.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use umbra_data_structures::{
    chain::{Hash, Hashable},
    transaction::Transaction,
};

use crate::{
    constants,
    storage::serialization::{WalletDetails, WalletTransactionDto, WalletTransferDto, WalletTransactionState},
    types::{TransactionInformation, TransactionOutputInformation},
    unconfirmed::UnconfirmedTransactionsCache,
};

/// Index of a transaction record inside the history
pub type TransactionId = u64;

/// Index of a transfer leg inside the history
pub type TransferId = u64;

/// One user-visible transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTransaction {
    /// Transaction hash, zero until the transaction is built
    pub hash: Hash,
    /// Lifecycle state
    pub state: WalletTransactionState,
    /// First transfer leg, `None` for incoming transactions
    pub first_transfer_id: Option<TransferId>,
    /// Number of transfer legs
    pub transfer_count: u64,
    /// Signed change of the wallet balance
    pub total_amount: i64,
    /// Fee paid, zero for coinbase
    pub fee: u64,
    /// Local time the send was created, zero for incoming
    pub sent_time: u64,
    /// Including block timestamp
    pub timestamp: u64,
    /// Including block height
    pub block_height: u32,
    /// Whether this is a coinbase reward
    pub is_coinbase: bool,
    /// Unlock time of the outputs
    pub unlock_time: u64,
    /// Raw extra blob
    pub extra: Vec<u8>,
}

/// One leg of an outgoing transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTransfer {
    /// Destination address
    pub address: String,
    /// Amount sent to it
    pub amount: u64,
}

/// What a chain notification did to the history
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HistoryEvent {
    /// An externally observed transaction entered the history
    TransactionCreated(TransactionId),
    /// An existing record changed state
    TransactionUpdated(TransactionId),
}

/// The history cache
#[derive(Debug)]
pub struct UserTransactionsCache {
    transactions: Vec<UserTransaction>,
    transfers: Vec<UserTransfer>,
    unconfirmed: UnconfirmedTransactionsCache,
}

impl UserTransactionsCache {
    /// History whose pending sends expire after `mempool_tx_live_time`
    /// seconds.
    pub fn new(mempool_tx_live_time: u64) -> Self {
        UserTransactionsCache {
            transactions: Vec::new(),
            transfers: Vec::new(),
            unconfirmed: UnconfirmedTransactionsCache::new(mempool_tx_live_time),
        }
    }

    /// Number of transaction records
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Number of transfer legs
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    /// Declared amount of all pending sends
    pub fn unconfirmed_transactions_amount(&self) -> u64 {
        self.unconfirmed.count_transactions_amount()
    }

    /// Amount of outputs locked by pending sends
    pub fn unconfirmed_outs_amount(&self) -> u64 {
        self.unconfirmed.count_outs_amount()
    }

    /// Whether an output is locked by a pending send
    pub fn is_used(&self, output: &TransactionOutputInformation) -> bool {
        self.unconfirmed.is_used(output)
    }

    /// Record a send the user just created. The transaction itself does not
    /// exist yet; `update_transaction` fills it in once built.
    pub fn add_new_transaction(
        &mut self,
        amount: u64,
        fee: u64,
        extra: Vec<u8>,
        transfers: Vec<UserTransfer>,
        unlock_time: u64,
        sent_time: u64,
    ) -> TransactionId {
        let first_transfer_id = if transfers.is_empty() {
            None
        } else {
            Some(self.insert_transfers(transfers))
        };
        let transfer_count = first_transfer_id
            .map(|first| self.transfers.len() as u64 - first)
            .unwrap_or(0);

        self.insert_transaction(UserTransaction {
            hash: Hash::default(),
            state: WalletTransactionState::Created,
            first_transfer_id,
            transfer_count,
            total_amount: -(amount as i64),
            fee,
            sent_time,
            timestamp: 0,
            block_height: constants::UNCONFIRMED_TRANSACTION_HEIGHT,
            is_coinbase: false,
            unlock_time,
            extra,
        })
    }

    /// Attach the built transaction to its record and lock the outputs it
    /// consumes.
    pub fn update_transaction(
        &mut self,
        transaction_id: TransactionId,
        transaction: &Transaction,
        amount: u64,
        sent_time: u64,
        used_outputs: &[TransactionOutputInformation],
    ) {
        if let Some(record) = self.transactions.get_mut(transaction_id as usize) {
            record.hash = transaction.hash();
            record.extra = transaction.prefix.extra.clone();
            self.unconfirmed
                .add(transaction, transaction_id, amount, sent_time, used_outputs);
        }
    }

    /// The relay succeeded; the record becomes an active pending send.
    pub fn mark_transaction_sent(&mut self, transaction_id: TransactionId, sent_time: u64) {
        if let Some(record) = self.transactions.get_mut(transaction_id as usize) {
            record.sent_time = sent_time;
            record.state = WalletTransactionState::Succeeded;
        }
    }

    /// The relay failed or was cancelled; the consumed outputs unlock.
    pub fn mark_transaction_failed(&mut self, transaction_id: TransactionId, cancelled: bool) {
        if let Some(record) = self.transactions.get_mut(transaction_id as usize) {
            record.state = if cancelled {
                WalletTransactionState::Cancelled
            } else {
                WalletTransactionState::Failed
            };
            let hash = record.hash;
            self.unconfirmed.erase(&hash);
        }
    }

    /// A container reported a transaction. Ties it back to a pending send
    /// when there is one, otherwise records it as an external transaction.
    pub fn on_transaction_updated(
        &mut self,
        information: &TransactionInformation,
        tx_balance: i64,
    ) -> HistoryEvent {
        let pending = self
            .unconfirmed
            .find_transaction_id(&information.transaction_hash);
        let id = match pending {
            Some(id) => {
                self.unconfirmed.erase(&information.transaction_hash);
                Some(id)
            }
            None => self.find_transaction_by_hash(&information.transaction_hash),
        };

        let is_coinbase = information.total_amount_in == 0;

        match id {
            None => {
                let id = self.insert_transaction(UserTransaction {
                    hash: information.transaction_hash,
                    state: WalletTransactionState::Succeeded,
                    first_transfer_id: None,
                    transfer_count: 0,
                    total_amount: tx_balance,
                    fee: if is_coinbase {
                        0
                    } else {
                        information
                            .total_amount_in
                            .saturating_sub(information.total_amount_out)
                    },
                    sent_time: 0,
                    timestamp: information.timestamp,
                    block_height: information.block_height,
                    is_coinbase,
                    unlock_time: information.unlock_time,
                    extra: information.extra.clone(),
                });

                HistoryEvent::TransactionCreated(id)
            }
            Some(id) => {
                if let Some(record) = self.transactions.get_mut(id as usize) {
                    record.block_height = information.block_height;
                    record.timestamp = information.timestamp;
                    record.state = WalletTransactionState::Succeeded;
                }

                HistoryEvent::TransactionUpdated(id)
            }
        }
    }

    /// A container dropped a transaction (reorg); the record survives in
    /// the deleted state.
    pub fn on_transaction_deleted(&mut self, transaction_hash: &Hash) -> Option<HistoryEvent> {
        self.unconfirmed.erase(transaction_hash);

        let id = self.find_transaction_by_hash(transaction_hash)?;
        if let Some(record) = self.transactions.get_mut(id as usize) {
            record.block_height = constants::UNCONFIRMED_TRANSACTION_HEIGHT;
            record.timestamp = 0;
            record.state = WalletTransactionState::Deleted;
        }

        Some(HistoryEvent::TransactionUpdated(id))
    }

    /// Expire pending sends older than the live time, flipping their
    /// records to deleted. Returns the affected ids.
    pub fn delete_outdated_transactions(&mut self, now: u64) -> Vec<TransactionId> {
        let deleted = self.unconfirmed.delete_outdated(now);

        for id in &deleted {
            if let Some(record) = self.transactions.get_mut(*id as usize) {
                record.state = WalletTransactionState::Deleted;
            }
        }

        deleted
    }

    /// Look up a record by transaction hash
    pub fn find_transaction_by_hash(&self, transaction_hash: &Hash) -> Option<TransactionId> {
        self.transactions
            .iter()
            .position(|record| record.hash == *transaction_hash)
            .map(|index| index as TransactionId)
    }

    /// The record at `transaction_id`
    pub fn transaction(&self, transaction_id: TransactionId) -> Option<&UserTransaction> {
        self.transactions.get(transaction_id as usize)
    }

    /// The transfer leg at `transfer_id`
    pub fn transfer(&self, transfer_id: TransferId) -> Option<&UserTransfer> {
        self.transfers.get(transfer_id as usize)
    }

    /// The transaction owning `transfer_id`
    pub fn find_transaction_by_transfer(&self, transfer_id: TransferId) -> Option<TransactionId> {
        self.transactions
            .iter()
            .position(|record| match record.first_transfer_id {
                Some(first) => {
                    transfer_id >= first && transfer_id < first + record.transfer_count
                }
                None => false,
            })
            .map(|index| index as TransactionId)
    }

    /// Transfer legs of one transaction
    pub fn transfers_by_transaction(&self, transaction_id: TransactionId) -> Vec<UserTransfer> {
        let record = match self.transactions.get(transaction_id as usize) {
            Some(record) => record,
            None => return Vec::new(),
        };

        match record.first_transfer_id {
            Some(first) => {
                let first = first as usize;
                let last = first + record.transfer_count as usize;
                self.transfers[first..last.min(self.transfers.len())].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Drop everything
    pub fn reset(&mut self) {
        self.transactions.clear();
        self.transfers.clear();
        self.unconfirmed.reset();
    }

    /// Export the history in the wallet snapshot DTO form, with cancelled
    /// and failed transactions compacted away.
    pub fn details(&self) -> WalletDetails {
        let (transactions, transfers) = self.good_items();

        WalletDetails {
            transactions: transactions
                .iter()
                .map(|record| WalletTransactionDto {
                    state: record.state,
                    timestamp: record.timestamp,
                    block_height: record.block_height,
                    hash: record.hash,
                    total_amount: record.total_amount,
                    fee: record.fee,
                    creation_time: record.sent_time,
                    unlock_time: record.unlock_time,
                    extra: hex::encode(&record.extra),
                })
                .collect(),
            transfers: transfers
                .iter()
                .enumerate()
                .map(|(id, transfer)| {
                    (
                        id as u64,
                        WalletTransferDto {
                            address: transfer.address.clone(),
                            amount: transfer.amount,
                            transfer_type: 0,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Transactions and compacted transfers worth persisting: everything
    /// except cancelled and failed sends.
    fn good_items(&self) -> (Vec<UserTransaction>, Vec<UserTransfer>) {
        let mut transactions = Vec::new();
        let mut transfers = Vec::new();
        let mut offset: u64 = 0;

        for record in &self.transactions {
            let good = record.state != WalletTransactionState::Cancelled
                && record.state != WalletTransactionState::Failed;

            if !good {
                offset += record.first_transfer_id.map(|_| record.transfer_count).unwrap_or(0);
                continue;
            }

            let mut kept = record.clone();
            if let Some(first) = kept.first_transfer_id {
                let start = first as usize;
                let end = start + kept.transfer_count as usize;
                transfers.extend_from_slice(&self.transfers[start..end.min(self.transfers.len())]);
                kept.first_transfer_id = Some(first - offset);
            }
            transactions.push(kept);
        }

        (transactions, transfers)
    }

    fn insert_transaction(&mut self, transaction: UserTransaction) -> TransactionId {
        self.transactions.push(transaction);
        self.transactions.len() as TransactionId - 1
    }

    fn insert_transfers(&mut self, transfers: Vec<UserTransfer>) -> TransferId {
        let first = self.transfers.len() as TransferId;
        self.transfers.extend(transfers);
        first
    }

    /// Re-point pending-send records at their history ids after a load.
    fn update_unconfirmed_transactions(&mut self) {
        for (id, record) in self.transactions.iter().enumerate() {
            if record.block_height == constants::UNCONFIRMED_TRANSACTION_HEIGHT {
                self.unconfirmed
                    .update_transaction_id(&record.hash, id as TransactionId);
            }
        }
    }
}

impl Serialize for UserTransactionsCache {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct CacheDto<'a> {
            transactions: Vec<UserTransaction>,
            transfers: Vec<UserTransfer>,
            unconfirmed: &'a UnconfirmedTransactionsCache,
        }

        let (transactions, transfers) = self.good_items();
        CacheDto {
            transactions,
            transfers,
            unconfirmed: &self.unconfirmed,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UserTransactionsCache {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct CacheDto {
            transactions: Vec<UserTransaction>,
            transfers: Vec<UserTransfer>,
            unconfirmed: UnconfirmedTransactionsCache,
        }

        let dto = CacheDto::deserialize(deserializer)?;
        let mut cache = UserTransactionsCache {
            transactions: dto.transactions,
            transfers: dto.transfers,
            unconfirmed: dto.unconfirmed,
        };
        cache.update_unconfirmed_transactions();

        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_crypto::key::PublicKey;
    use umbra_data_structures::extra;

    fn transaction(seed: u8) -> Transaction {
        let mut transaction = Transaction::default();
        transaction.prefix.extra = extra::serialize(&[extra::ExtraField::Nonce(vec![0x01, seed])]);
        transaction
    }

    fn information(hash: Hash, block_height: u32, amount_in: u64, amount_out: u64) -> TransactionInformation {
        TransactionInformation {
            transaction_hash: hash,
            public_key: PublicKey::default(),
            block_height,
            timestamp: 1_600_000_000,
            unlock_time: 0,
            total_amount_in: amount_in,
            total_amount_out: amount_out,
            extra: vec![],
            payment_id: Hash::default(),
        }
    }

    fn output(amount: u64) -> TransactionOutputInformation {
        TransactionOutputInformation {
            amount,
            global_output_index: 1,
            output_in_transaction: 0,
            transaction_hash: Hash([1; 32]),
            transaction_public_key: PublicKey([2; 32]),
            target: crate::types::TransactionOutputTargetInfo::Key {
                output_key: PublicKey([3; 32]),
            },
        }
    }

    #[test]
    fn test_external_transaction_is_created_once() {
        let mut cache = UserTransactionsCache::new(100);
        let info = information(Hash([5; 32]), 12, 0, 50);

        let event = cache.on_transaction_updated(&info, 50);
        assert_eq!(HistoryEvent::TransactionCreated(0), event);

        let record = cache.transaction(0).unwrap();
        assert!(record.is_coinbase);
        assert_eq!(0, record.fee);
        assert_eq!(50, record.total_amount);

        // Seeing the same transaction again only updates it.
        let event = cache.on_transaction_updated(&info, 50);
        assert_eq!(HistoryEvent::TransactionUpdated(0), event);
        assert_eq!(1, cache.transaction_count());
    }

    #[test]
    fn test_outgoing_send_lifecycle() {
        let mut cache = UserTransactionsCache::new(100);
        let tx = transaction(1);

        let id = cache.add_new_transaction(
            900,
            10,
            vec![],
            vec![UserTransfer {
                address: "recipient".into(),
                amount: 900,
            }],
            0,
            1_000,
        );
        cache.update_transaction(id, &tx, 900, 1_000, &[output(1000)]);
        cache.mark_transaction_sent(id, 1_001);

        assert!(cache.is_used(&output(1000)));
        assert_eq!(-900, cache.transaction(id).unwrap().total_amount);
        assert_eq!(Some(id), cache.find_transaction_by_hash(&tx.hash()));
        assert_eq!(Some(id), cache.find_transaction_by_transfer(0));

        // The send gets mined: the pending entry resolves to the record.
        let info = information(tx.hash(), 30, 1000, 990);
        let event = cache.on_transaction_updated(&info, -900);
        assert_eq!(HistoryEvent::TransactionUpdated(id), event);
        assert_eq!(30, cache.transaction(id).unwrap().block_height);
        assert!(!cache.is_used(&output(1000)));
    }

    #[test]
    fn test_failed_send_releases_outputs() {
        let mut cache = UserTransactionsCache::new(100);
        let tx = transaction(1);

        let id = cache.add_new_transaction(900, 10, vec![], vec![], 0, 1_000);
        cache.update_transaction(id, &tx, 900, 1_000, &[output(1000)]);
        cache.mark_transaction_failed(id, false);

        assert!(!cache.is_used(&output(1000)));
        assert_eq!(
            WalletTransactionState::Failed,
            cache.transaction(id).unwrap().state
        );
    }

    #[test]
    fn test_timed_out_send_flips_to_deleted() {
        let mut cache = UserTransactionsCache::new(100);
        let tx = transaction(1);

        let id = cache.add_new_transaction(900, 10, vec![], vec![], 0, 1_000);
        cache.update_transaction(id, &tx, 900, 1_000, &[output(1000)]);
        cache.mark_transaction_sent(id, 1_000);

        let deleted = cache.delete_outdated_transactions(1_200);

        assert_eq!(vec![id], deleted);
        assert_eq!(
            WalletTransactionState::Deleted,
            cache.transaction(id).unwrap().state
        );
        assert!(!cache.is_used(&output(1000)));
    }

    #[test]
    fn test_reorged_transaction_turns_deleted() {
        let mut cache = UserTransactionsCache::new(100);
        let info = information(Hash([5; 32]), 12, 0, 50);
        cache.on_transaction_updated(&info, 50);

        let event = cache.on_transaction_deleted(&Hash([5; 32]));

        assert_eq!(Some(HistoryEvent::TransactionUpdated(0)), event);
        let record = cache.transaction(0).unwrap();
        assert_eq!(WalletTransactionState::Deleted, record.state);
        assert_eq!(constants::UNCONFIRMED_TRANSACTION_HEIGHT, record.block_height);
    }

    #[test]
    fn test_serialization_compacts_failed_sends() {
        let mut cache = UserTransactionsCache::new(100);

        let failed = cache.add_new_transaction(
            100,
            1,
            vec![],
            vec![UserTransfer {
                address: "a".into(),
                amount: 100,
            }],
            0,
            1_000,
        );
        cache.mark_transaction_failed(failed, false);

        let good = cache.add_new_transaction(
            200,
            1,
            vec![],
            vec![UserTransfer {
                address: "b".into(),
                amount: 200,
            }],
            0,
            1_000,
        );
        cache.update_transaction(good, &transaction(2), 200, 1_000, &[output(300)]);
        cache.mark_transaction_sent(good, 1_000);

        let bytes = bincode::serialize(&cache).unwrap();
        let restored: UserTransactionsCache = bincode::deserialize(&bytes).unwrap();

        // Only the good send survives, with its transfer range re-based.
        assert_eq!(1, restored.transaction_count());
        assert_eq!(1, restored.transfer_count());
        let survivor = restored
            .find_transaction_by_hash(&transaction(2).hash())
            .unwrap();
        assert_eq!(
            vec![UserTransfer {
                address: "b".into(),
                amount: 200,
            }],
            restored.transfers_by_transaction(survivor)
        );
        // The pending entry is re-pointed at the surviving record.
        assert!(restored.is_used(&output(300)));
    }

    #[test]
    fn test_details_export() {
        let mut cache = UserTransactionsCache::new(100);
        cache.on_transaction_updated(&information(Hash([5; 32]), 12, 0, 50), 50);

        let details = cache.details();

        assert_eq!(1, details.transactions.len());
        assert_eq!(12, details.transactions[0].block_height);
        assert!(details.transfers.is_empty());
    }
}
