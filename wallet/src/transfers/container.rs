//! Per-address store of owned outputs.
//!
//! Three stores back the container: unconfirmed transfers, available
//! (confirmed, unspent) transfers and spent transfers. Each store is an
//! arena of records addressed by a stable numeric id, with secondary
//! indices by descriptor and by containing (and for spent, spending)
//! transaction. All public operations are atomic under the container lock.

use std::{
    collections::{BTreeMap, HashMap},
    io::{Read, Write},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use umbra_crypto::key::KeyImage;
use umbra_data_structures::{
    chain::{Hash, Hashable},
    transaction::{Transaction, TransactionInput},
};

use super::{Error, Result};
use crate::{
    constants,
    params::Params,
    types::{
        flags, OutputType, SpentOutputDescriptor, TransactionBlockInfo, TransactionInformation,
        TransactionOutputInformation, TransactionOutputInformationIn,
        TransactionSpentOutputInformation,
    },
};

fn wall_clock() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// An output inside a container, extended with its chain position and
/// visibility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct TransferRecord {
    output: TransactionOutputInformation,
    key_image: Option<KeyImage>,
    unlock_time: u64,
    block_height: u32,
    transaction_index: u32,
    visible: bool,
}

impl TransferRecord {
    fn descriptor(&self) -> Option<SpentOutputDescriptor> {
        TransactionOutputInformationIn {
            output: self.output.clone(),
            key_image: self.key_image,
        }
        .spent_output_descriptor()
    }
}

/// A transfer that has been consumed, tagged with its spending transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct SpentTransferRecord {
    transfer: TransferRecord,
    spending_block_height: u32,
    spending_block_timestamp: u64,
    spending_transaction_hash: Hash,
    input_in_transaction: u32,
}

/// Arena of transfer records with descriptor and transaction indices.
#[derive(Default)]
struct TransferStore {
    next_id: u64,
    records: BTreeMap<u64, TransferRecord>,
    by_descriptor: HashMap<SpentOutputDescriptor, Vec<u64>>,
    by_transaction: HashMap<Hash, Vec<u64>>,
}

impl TransferStore {
    fn from_records(records: Vec<TransferRecord>) -> Self {
        let mut store = TransferStore::default();
        for record in records {
            store.insert(record);
        }
        store
    }

    fn insert(&mut self, record: TransferRecord) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        if let Some(descriptor) = record.descriptor() {
            self.by_descriptor.entry(descriptor).or_default().push(id);
        }
        self.by_transaction
            .entry(record.output.transaction_hash)
            .or_default()
            .push(id);
        self.records.insert(id, record);

        id
    }

    fn remove(&mut self, id: u64) -> Option<TransferRecord> {
        let record = self.records.remove(&id)?;

        if let Some(descriptor) = record.descriptor() {
            if let Some(ids) = self.by_descriptor.get_mut(&descriptor) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.by_descriptor.remove(&descriptor);
                }
            }
        }
        if let Some(ids) = self.by_transaction.get_mut(&record.output.transaction_hash) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_transaction.remove(&record.output.transaction_hash);
            }
        }

        Some(record)
    }

    fn ids_by_descriptor(&self, descriptor: &SpentOutputDescriptor) -> Vec<u64> {
        self.by_descriptor
            .get(descriptor)
            .cloned()
            .unwrap_or_default()
    }

    fn ids_by_transaction(&self, transaction_hash: &Hash) -> Vec<u64> {
        self.by_transaction
            .get(transaction_hash)
            .cloned()
            .unwrap_or_default()
    }

    fn take_by_transaction(&mut self, transaction_hash: &Hash) -> Vec<TransferRecord> {
        self.ids_by_transaction(transaction_hash)
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    fn contains_output(&self, transaction_hash: &Hash, output_in_transaction: u32) -> bool {
        self.ids_by_transaction(transaction_hash)
            .into_iter()
            .filter_map(|id| self.records.get(&id))
            .any(|record| record.output.output_in_transaction == output_in_transaction)
    }

    fn set_visible(&mut self, id: u64, visible: bool) {
        if let Some(record) = self.records.get_mut(&id) {
            record.visible = visible;
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn records_in_order(&self) -> Vec<TransferRecord> {
        self.records.values().cloned().collect()
    }
}

/// Arena of spent records with the additional spending-transaction index.
#[derive(Default)]
struct SpentTransferStore {
    next_id: u64,
    records: BTreeMap<u64, SpentTransferRecord>,
    by_descriptor: HashMap<SpentOutputDescriptor, Vec<u64>>,
    by_transaction: HashMap<Hash, Vec<u64>>,
    by_spending_transaction: HashMap<Hash, Vec<u64>>,
}

impl SpentTransferStore {
    fn from_records(records: Vec<SpentTransferRecord>) -> Self {
        let mut store = SpentTransferStore::default();
        for record in records {
            store.insert(record);
        }
        store
    }

    fn insert(&mut self, record: SpentTransferRecord) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        if let Some(descriptor) = record.transfer.descriptor() {
            self.by_descriptor.entry(descriptor).or_default().push(id);
        }
        self.by_transaction
            .entry(record.transfer.output.transaction_hash)
            .or_default()
            .push(id);
        self.by_spending_transaction
            .entry(record.spending_transaction_hash)
            .or_default()
            .push(id);
        self.records.insert(id, record);

        id
    }

    fn remove(&mut self, id: u64) -> Option<SpentTransferRecord> {
        let record = self.records.remove(&id)?;

        if let Some(descriptor) = record.transfer.descriptor() {
            Self::unindex(&mut self.by_descriptor, &descriptor, id);
        }
        Self::unindex(
            &mut self.by_transaction,
            &record.transfer.output.transaction_hash,
            id,
        );
        Self::unindex(
            &mut self.by_spending_transaction,
            &record.spending_transaction_hash,
            id,
        );

        Some(record)
    }

    fn unindex<K: std::hash::Hash + Eq + Clone>(
        index: &mut HashMap<K, Vec<u64>>,
        key: &K,
        id: u64,
    ) {
        if let Some(ids) = index.get_mut(key) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                index.remove(key);
            }
        }
    }

    fn ids_by_descriptor(&self, descriptor: &SpentOutputDescriptor) -> Vec<u64> {
        self.by_descriptor
            .get(descriptor)
            .cloned()
            .unwrap_or_default()
    }

    fn ids_by_transaction(&self, transaction_hash: &Hash) -> Vec<u64> {
        self.by_transaction
            .get(transaction_hash)
            .cloned()
            .unwrap_or_default()
    }

    fn ids_by_spending_transaction(&self, transaction_hash: &Hash) -> Vec<u64> {
        self.by_spending_transaction
            .get(transaction_hash)
            .cloned()
            .unwrap_or_default()
    }

    fn take_by_spending_transaction(&mut self, transaction_hash: &Hash) -> Vec<SpentTransferRecord> {
        self.ids_by_spending_transaction(transaction_hash)
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    fn contains_output(&self, transaction_hash: &Hash, output_in_transaction: u32) -> bool {
        self.ids_by_transaction(transaction_hash)
            .into_iter()
            .filter_map(|id| self.records.get(&id))
            .any(|record| record.transfer.output.output_in_transaction == output_in_transaction)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn records_in_order(&self) -> Vec<SpentTransferRecord> {
        self.records.values().cloned().collect()
    }
}

struct Inner {
    transactions: BTreeMap<Hash, TransactionInformation>,
    unconfirmed: TransferStore,
    available: TransferStore,
    spent: SpentTransferStore,
    current_height: u32,
    transaction_spendable_age: u32,
}

#[derive(Serialize, Deserialize)]
struct ContainerDto {
    version: u32,
    transactions: Vec<TransactionInformation>,
    unconfirmed: Vec<TransferRecord>,
    available: Vec<TransferRecord>,
    spent: Vec<SpentTransferRecord>,
    current_height: u32,
    transaction_spendable_age: u32,
}

/// Everything `detach` undid, so subscribers can be told about it.
#[derive(Clone, Debug, Default)]
pub struct DetachResult {
    /// Transactions removed from the container, most recent block first
    pub deleted_transaction_hashes: Vec<Hash>,
    /// Outputs that reverted from spent back to unspent
    pub locked_transfers: Vec<TransactionOutputInformation>,
}

/// The per-address transfer store.
pub struct TransfersContainer {
    params: Params,
    inner: Mutex<Inner>,
}

impl TransfersContainer {
    /// Empty container spending outputs after `transaction_spendable_age`
    /// confirmations.
    pub fn new(params: Params, transaction_spendable_age: u32) -> Self {
        TransfersContainer {
            params,
            inner: Mutex::new(Inner {
                transactions: BTreeMap::new(),
                unconfirmed: TransferStore::default(),
                available: TransferStore::default(),
                spent: SpentTransferStore::default(),
                current_height: 0,
                transaction_spendable_age,
            }),
        }
    }

    /// Ingest a transaction: record the listed owned outputs and mark any
    /// tracked output consumed by the transaction inputs as spent. Returns
    /// whether anything changed.
    pub fn add_transaction(
        &self,
        block: &TransactionBlockInfo,
        transaction: &Transaction,
        transfers: &[TransactionOutputInformationIn],
    ) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        let transaction_hash = transaction.hash();

        let mut added = Self::add_transaction_outputs(&mut inner, block, transaction, transfers)?;
        added |= Self::add_transaction_inputs(&mut inner, block, &transaction_hash, transaction);

        if added && !inner.transactions.contains_key(&transaction_hash) {
            let information = TransactionInformation {
                transaction_hash,
                public_key: transaction.transaction_public_key().unwrap_or_default(),
                block_height: block.height,
                timestamp: block.timestamp,
                unlock_time: transaction.prefix.unlock_time,
                total_amount_in: transaction.total_amount_in(),
                total_amount_out: transaction.total_amount_out(),
                extra: transaction.prefix.extra.clone(),
                payment_id: transaction.payment_id().unwrap_or_default(),
            };
            inner.transactions.insert(transaction_hash, information);
        }

        Ok(added)
    }

    fn add_transaction_outputs(
        inner: &mut Inner,
        block: &TransactionBlockInfo,
        transaction: &Transaction,
        transfers: &[TransactionOutputInformationIn],
    ) -> Result<bool> {
        let mut added = false;
        let transaction_hash = transaction.hash();

        for transfer in transfers {
            let mut record = TransferRecord {
                output: transfer.output.clone(),
                key_image: transfer.key_image,
                unlock_time: transaction.prefix.unlock_time,
                block_height: block.height,
                transaction_index: block.transaction_index,
                visible: true,
            };

            if block.is_unconfirmed() {
                record.output.global_output_index =
                    constants::UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX;

                if inner
                    .unconfirmed
                    .contains_output(&transaction_hash, record.output.output_in_transaction)
                {
                    continue;
                }

                if let Some(descriptor) = record.descriptor() {
                    let conflicting = inner
                        .unconfirmed
                        .ids_by_descriptor(&descriptor)
                        .into_iter()
                        .filter_map(|id| inner.unconfirmed.records.get(&id))
                        .any(|other| other.output.transaction_hash != transaction_hash);
                    if conflicting {
                        return Err(Error::TransferExistsUnconfirmed { transaction_hash });
                    }
                }

                let descriptor = record.descriptor();
                inner.unconfirmed.insert(record);
                added = true;
                if let Some(descriptor) = descriptor {
                    Self::update_visibility(inner, &descriptor);
                }
            } else {
                if inner
                    .available
                    .contains_output(&transaction_hash, record.output.output_in_transaction)
                    || inner
                        .spent
                        .contains_output(&transaction_hash, record.output.output_in_transaction)
                {
                    continue;
                }

                let descriptor = record.descriptor();
                inner.available.insert(record);
                added = true;
                if let Some(descriptor) = descriptor {
                    Self::update_visibility(inner, &descriptor);
                }
            }
        }

        Ok(added)
    }

    fn add_transaction_inputs(
        inner: &mut Inner,
        block: &TransactionBlockInfo,
        transaction_hash: &Hash,
        transaction: &Transaction,
    ) -> bool {
        let mut added = false;

        for (input_index, input) in transaction.prefix.inputs.iter().enumerate() {
            let descriptor = match input {
                TransactionInput::Key { key_image, .. } => {
                    SpentOutputDescriptor::KeyImage(*key_image)
                }
                TransactionInput::Multisignature {
                    amount,
                    output_index,
                    ..
                } => SpentOutputDescriptor::MultisignatureOutput {
                    amount: *amount,
                    global_output_index: *output_index,
                },
                TransactionInput::Coinbase { .. } => continue,
            };

            if let Some(&id) = inner.available.ids_by_descriptor(&descriptor).first() {
                if let Some(record) = inner.available.remove(id) {
                    inner.spent.insert(SpentTransferRecord {
                        transfer: record,
                        spending_block_height: block.height,
                        spending_block_timestamp: block.timestamp,
                        spending_transaction_hash: *transaction_hash,
                        input_in_transaction: input_index as u32,
                    });
                    added = true;
                }
            } else if let Some(&id) = inner.spent.ids_by_descriptor(&descriptor).first() {
                // The output is already spent. A confirmed spend supersedes
                // an earlier pool spend of the same descriptor.
                let retag = inner
                    .spent
                    .records
                    .get(&id)
                    .map(|record| {
                        record.spending_block_height == constants::UNCONFIRMED_TRANSACTION_HEIGHT
                            && !block.is_unconfirmed()
                    })
                    .unwrap_or(false);
                if retag {
                    if let Some(mut record) = inner.spent.remove(id) {
                        record.spending_block_height = block.height;
                        record.spending_block_timestamp = block.timestamp;
                        record.spending_transaction_hash = *transaction_hash;
                        record.input_in_transaction = input_index as u32;
                        inner.spent.insert(record);
                        added = true;
                    }
                }
            }

            Self::update_visibility(inner, &descriptor);
        }

        added
    }

    /// Recompute the visibility of every unspent record sharing
    /// `descriptor`. A record is visible when it is the only unspent holder
    /// of its descriptor and no spent record claims it.
    fn update_visibility(inner: &mut Inner, descriptor: &SpentOutputDescriptor) {
        let unconfirmed_ids = inner.unconfirmed.ids_by_descriptor(descriptor);
        let available_ids = inner.available.ids_by_descriptor(descriptor);
        let spent_exists = !inner.spent.ids_by_descriptor(descriptor).is_empty();

        let visible = unconfirmed_ids.len() + available_ids.len() <= 1 && !spent_exists;

        for id in unconfirmed_ids {
            inner.unconfirmed.set_visible(id, visible);
        }
        for id in available_ids {
            inner.available.set_visible(id, visible);
        }
    }

    /// Promote an unconfirmed transaction to its confirmed place in the
    /// chain, filling in the global output indices.
    pub fn mark_transaction_confirmed(
        &self,
        block: &TransactionBlockInfo,
        transaction_hash: &Hash,
        global_indices: &[u32],
    ) -> Result<()> {
        let mut inner = self.inner.lock()?;

        let unconfirmed_height = inner
            .transactions
            .get(transaction_hash)
            .map(|info| info.block_height == constants::UNCONFIRMED_TRANSACTION_HEIGHT)
            .unwrap_or(false);
        if !unconfirmed_height {
            return Err(Error::TransactionNotUnconfirmed {
                transaction_hash: *transaction_hash,
            });
        }

        // Validate before mutating anything.
        let covered = inner
            .unconfirmed
            .ids_by_transaction(transaction_hash)
            .into_iter()
            .filter_map(|id| inner.unconfirmed.records.get(&id))
            .all(|record| (record.output.output_in_transaction as usize) < global_indices.len());
        if !covered {
            return Err(Error::InvalidGlobalIndices {
                transaction_hash: *transaction_hash,
            });
        }

        if let Some(info) = inner.transactions.get_mut(transaction_hash) {
            info.block_height = block.height;
            info.timestamp = block.timestamp;
        }

        for mut record in inner.unconfirmed.take_by_transaction(transaction_hash) {
            record.output.global_output_index =
                global_indices[record.output.output_in_transaction as usize];
            record.block_height = block.height;
            record.transaction_index = block.transaction_index;

            let descriptor = record.descriptor();
            inner.available.insert(record);
            if let Some(descriptor) = descriptor {
                Self::update_visibility(&mut inner, &descriptor);
            }
        }

        // Spends performed by this transaction move from the pool to the
        // block alongside it.
        for id in inner.spent.ids_by_spending_transaction(transaction_hash) {
            if let Some(record) = inner.spent.records.get_mut(&id) {
                record.spending_block_height = block.height;
                record.spending_block_timestamp = block.timestamp;
            }
        }

        Ok(())
    }

    /// Forget an unconfirmed transaction: its outputs disappear and outputs
    /// it spent revert to unspent. Returns false when the transaction is
    /// unknown or already confirmed.
    pub fn delete_unconfirmed_transaction(&self, transaction_hash: &Hash) -> Result<bool> {
        let mut inner = self.inner.lock()?;

        let unconfirmed = inner
            .transactions
            .get(transaction_hash)
            .map(|info| info.block_height == constants::UNCONFIRMED_TRANSACTION_HEIGHT)
            .unwrap_or(false);
        if !unconfirmed {
            return Ok(false);
        }

        Self::delete_transaction_transfers(&mut inner, transaction_hash);
        inner.transactions.remove(transaction_hash);

        Ok(true)
    }

    fn delete_transaction_transfers(inner: &mut Inner, transaction_hash: &Hash) {
        for record in inner.spent.take_by_spending_transaction(transaction_hash) {
            let mut transfer = record.transfer;
            transfer.visible = true;
            let descriptor = transfer.descriptor();
            inner.available.insert(transfer);
            if let Some(descriptor) = descriptor {
                Self::update_visibility(inner, &descriptor);
            }
        }

        for record in inner.unconfirmed.take_by_transaction(transaction_hash) {
            if let Some(descriptor) = record.descriptor() {
                Self::update_visibility(inner, &descriptor);
            }
        }
    }

    /// Undo every effect of blocks at or above `height`.
    pub fn detach(&self, height: u32) -> Result<DetachResult> {
        let mut inner = self.inner.lock()?;
        let mut result = DetachResult::default();

        // Spends recorded in detached blocks are undone first. An output
        // whose own block is also detached disappears entirely.
        let detached_spend_ids: Vec<u64> = inner
            .spent
            .records
            .iter()
            .filter(|(_, record)| {
                record.spending_block_height != constants::UNCONFIRMED_TRANSACTION_HEIGHT
                    && record.spending_block_height >= height
            })
            .map(|(id, _)| *id)
            .collect();

        for id in detached_spend_ids {
            if let Some(record) = inner.spent.remove(id) {
                let mut transfer = record.transfer;
                let descriptor = transfer.descriptor();
                if transfer.block_height < height {
                    transfer.visible = true;
                    result.locked_transfers.push(transfer.output.clone());
                    inner.available.insert(transfer);
                }
                // The spent claim on this descriptor is gone either way; a
                // sibling hidden by it may become the sole unspent holder.
                if let Some(descriptor) = descriptor {
                    Self::update_visibility(&mut inner, &descriptor);
                }
            }
        }

        // Outputs created in detached blocks.
        let detached_output_ids: Vec<u64> = inner
            .available
            .records
            .iter()
            .filter(|(_, record)| record.block_height >= height)
            .map(|(id, _)| *id)
            .collect();

        for id in detached_output_ids {
            if let Some(record) = inner.available.remove(id) {
                if let Some(descriptor) = record.descriptor() {
                    Self::update_visibility(&mut inner, &descriptor);
                }
            }
        }

        // Transactions included in detached blocks, most recent first.
        let mut detached_transactions: Vec<(u32, Hash)> = inner
            .transactions
            .iter()
            .filter(|(_, info)| {
                info.block_height != constants::UNCONFIRMED_TRANSACTION_HEIGHT
                    && info.block_height >= height
            })
            .map(|(hash, info)| (info.block_height, *hash))
            .collect();
        detached_transactions.sort_by(|a, b| b.cmp(a));

        for (_, hash) in detached_transactions {
            inner.transactions.remove(&hash);
            result.deleted_transaction_hashes.push(hash);
        }

        inner.current_height = std::cmp::min(inner.current_height, height.saturating_sub(1));

        log::debug!(
            "container detached at height {}: {} transactions deleted, {} transfers relocked",
            height,
            result.deleted_transaction_hashes.len(),
            result.locked_transfers.len()
        );

        Ok(result)
    }

    /// Raise the container height, returning the outputs whose unlock
    /// predicate flipped to true.
    pub fn advance_height(&self, height: u32) -> Result<Vec<TransactionOutputInformation>> {
        let mut inner = self.inner.lock()?;

        if height < inner.current_height {
            return Err(Error::HeightDecrease {
                current: inner.current_height,
                requested: height,
            });
        }

        let now = wall_clock();
        let previous_height = inner.current_height;
        let age = inner.transaction_spendable_age;

        let unlocked = inner
            .available
            .records
            .values()
            .filter(|record| record.visible)
            .filter(|record| {
                !self.is_unlocked(record, previous_height, age, now)
                    && self.is_unlocked(record, height, age, now)
            })
            .map(|record| record.output.clone())
            .collect();

        inner.current_height = height;

        Ok(unlocked)
    }

    fn is_unlocked(&self, record: &TransferRecord, height: u32, age: u32, now: u64) -> bool {
        record.block_height.saturating_add(age) <= height
            && self
                .params
                .is_transaction_spend_time_unlocked(record.unlock_time, height, now)
    }

    fn available_state(&self, record: &TransferRecord, inner: &Inner, now: u64) -> u32 {
        if record.block_height.saturating_add(inner.transaction_spendable_age)
            > inner.current_height
        {
            flags::INCLUDE_STATE_LOCKED
        } else if self.params.is_transaction_spend_time_unlocked(
            record.unlock_time,
            inner.current_height,
            now,
        ) {
            flags::INCLUDE_STATE_UNLOCKED
        } else {
            flags::INCLUDE_STATE_SOFT_LOCKED
        }
    }

    fn is_included(output_type: OutputType, state: u32, mask: u32) -> bool {
        let type_bit = match output_type {
            OutputType::Key => flags::INCLUDE_TYPE_KEY,
            OutputType::Multisignature => flags::INCLUDE_TYPE_MULTISIGNATURE,
        };

        mask & type_bit != 0 && mask & state != 0
    }

    fn for_each_included(
        &self,
        inner: &Inner,
        mask: u32,
        mut f: impl FnMut(&TransactionOutputInformation),
    ) {
        let now = wall_clock();

        for record in inner.unconfirmed.records.values() {
            if record.visible
                && Self::is_included(
                    record.output.output_type(),
                    flags::INCLUDE_STATE_LOCKED,
                    mask,
                )
            {
                f(&record.output);
            }
        }

        for record in inner.available.records.values() {
            let state = self.available_state(record, inner, now);
            if record.visible && Self::is_included(record.output.output_type(), state, mask) {
                f(&record.output);
            }
        }

        for record in inner.spent.records.values() {
            if record.transfer.visible
                && Self::is_included(
                    record.transfer.output.output_type(),
                    flags::INCLUDE_STATE_SPENT,
                    mask,
                )
            {
                f(&record.transfer.output);
            }
        }
    }

    /// Sum of visible transfers matching the mask
    pub fn balance(&self, mask: u32) -> Result<u64> {
        let inner = self.inner.lock()?;
        let mut amount = 0u64;
        self.for_each_included(&inner, mask, |output| {
            amount = amount.saturating_add(output.amount);
        });

        Ok(amount)
    }

    /// Visible transfers matching the mask
    pub fn get_outputs(&self, mask: u32) -> Result<Vec<TransactionOutputInformation>> {
        let inner = self.inner.lock()?;
        let mut outputs = Vec::new();
        self.for_each_included(&inner, mask, |output| outputs.push(output.clone()));

        Ok(outputs)
    }

    /// Outputs of one transaction matching the mask
    pub fn get_transaction_outputs(
        &self,
        transaction_hash: &Hash,
        mask: u32,
    ) -> Result<Vec<TransactionOutputInformation>> {
        let inner = self.inner.lock()?;
        let now = wall_clock();
        let mut outputs = Vec::new();

        for id in inner.unconfirmed.ids_by_transaction(transaction_hash) {
            if let Some(record) = inner.unconfirmed.records.get(&id) {
                if Self::is_included(
                    record.output.output_type(),
                    flags::INCLUDE_STATE_LOCKED,
                    mask,
                ) {
                    outputs.push(record.output.clone());
                }
            }
        }
        for id in inner.available.ids_by_transaction(transaction_hash) {
            if let Some(record) = inner.available.records.get(&id) {
                let state = self.available_state(record, &inner, now);
                if Self::is_included(record.output.output_type(), state, mask) {
                    outputs.push(record.output.clone());
                }
            }
        }
        for id in inner.spent.ids_by_transaction(transaction_hash) {
            if let Some(record) = inner.spent.records.get(&id) {
                if Self::is_included(
                    record.transfer.output.output_type(),
                    flags::INCLUDE_STATE_SPENT,
                    mask,
                ) {
                    outputs.push(record.transfer.output.clone());
                }
            }
        }

        Ok(outputs)
    }

    /// Outputs consumed by one transaction. Only type bits of the mask are
    /// meaningful here.
    pub fn get_transaction_inputs(
        &self,
        transaction_hash: &Hash,
        mask: u32,
    ) -> Result<Vec<TransactionOutputInformation>> {
        let inner = self.inner.lock()?;
        let mut inputs = Vec::new();

        for id in inner.spent.ids_by_spending_transaction(transaction_hash) {
            if let Some(record) = inner.spent.records.get(&id) {
                let type_bit = match record.transfer.output.output_type() {
                    OutputType::Key => flags::INCLUDE_TYPE_KEY,
                    OutputType::Multisignature => flags::INCLUDE_TYPE_MULTISIGNATURE,
                };
                if mask & type_bit != 0 {
                    inputs.push(record.transfer.output.clone());
                }
            }
        }

        Ok(inputs)
    }

    /// Every spent transfer with its spending context
    pub fn get_spent_outputs(&self) -> Result<Vec<TransactionSpentOutputInformation>> {
        let inner = self.inner.lock()?;

        Ok(inner
            .spent
            .records
            .values()
            .map(|record| TransactionSpentOutputInformation {
                output: record.transfer.output.clone(),
                key_image: record.transfer.key_image,
                spending_block_height: record.spending_block_height,
                timestamp: record.spending_block_timestamp,
                spending_transaction_hash: record.spending_transaction_hash,
                input_in_transaction: record.input_in_transaction,
            })
            .collect())
    }

    /// Hashes of tracked transactions still in the pool
    pub fn get_unconfirmed_transactions(&self) -> Result<Vec<Hash>> {
        let inner = self.inner.lock()?;

        Ok(inner
            .transactions
            .iter()
            .filter(|(_, info)| info.block_height == constants::UNCONFIRMED_TRANSACTION_HEIGHT)
            .map(|(hash, _)| *hash)
            .collect())
    }

    /// Ledger metadata of a tracked transaction
    pub fn get_transaction_information(
        &self,
        transaction_hash: &Hash,
    ) -> Result<Option<TransactionInformation>> {
        let inner = self.inner.lock()?;

        Ok(inner.transactions.get(transaction_hash).cloned())
    }

    /// Number of tracked transactions
    pub fn transactions_count(&self) -> Result<usize> {
        Ok(self.inner.lock()?.transactions.len())
    }

    /// Number of tracked transfers across all states
    pub fn transfers_count(&self) -> Result<usize> {
        let inner = self.inner.lock()?;

        Ok(inner.unconfirmed.len() + inner.available.len() + inner.spent.len())
    }

    /// The height the container has been advanced to
    pub fn current_height(&self) -> Result<u32> {
        Ok(self.inner.lock()?.current_height)
    }

    /// Serialize the container state
    pub fn save<W: Write>(&self, destination: &mut W) -> Result<()> {
        let inner = self.inner.lock()?;
        let dto = ContainerDto {
            version: constants::TRANSFERS_CONTAINER_STORAGE_VERSION,
            transactions: inner.transactions.values().cloned().collect(),
            unconfirmed: inner.unconfirmed.records_in_order(),
            available: inner.available.records_in_order(),
            spent: inner.spent.records_in_order(),
            current_height: inner.current_height,
            transaction_spendable_age: inner.transaction_spendable_age,
        };

        Ok(bincode::serialize_into(destination, &dto)?)
    }

    /// Replace the container state with a previously serialized one
    pub fn load<R: Read>(&self, source: &mut R) -> Result<()> {
        let dto: ContainerDto = bincode::deserialize_from(source)?;

        if dto.version != constants::TRANSFERS_CONTAINER_STORAGE_VERSION {
            return Err(Error::UnsupportedContainerVersion(dto.version));
        }

        let mut inner = self.inner.lock()?;
        inner.transactions = dto
            .transactions
            .into_iter()
            .map(|info| (info.transaction_hash, info))
            .collect();
        inner.unconfirmed = TransferStore::from_records(dto.unconfirmed);
        inner.available = TransferStore::from_records(dto.available);
        inner.spent = SpentTransferStore::from_records(dto.spent);
        inner.current_height = dto.current_height;
        inner.transaction_spendable_age = dto.transaction_spendable_age;

        Ok(())
    }
}
