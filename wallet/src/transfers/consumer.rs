//! Per-view-key scanner.
//!
//! One consumer serves every subscription sharing a view secret. It scans
//! block and pool transactions for outputs addressed to any of its spend
//! keys, asks the node for global output indices of confirmed matches, and
//! drives each subscription's container. Scanning is parallelized over a
//! bounded worker pool; results are re-ordered by chain position before the
//! single-threaded apply phase so containers always observe ledger order.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
};

use futures::channel::oneshot;

use umbra_crypto::key::{
    derive_secret_key, generate_key_derivation, generate_key_image, secret_key_to_public_key,
    underive_public_key, KeyDerivation, PublicKey, SecretKey,
};
use umbra_data_structures::{
    chain::{AccountPublicAddress, Hash, Hashable},
    transaction::{Transaction, TransactionOutputTarget},
};

use super::{subscription::TransfersSubscription, Error, Result};
use crate::{
    node::{NodeClient, NodeError},
    observers::ObserverList,
    params::Params,
    sync,
    types::{
        AccountSubscription, CompleteBlock, SyncStart, TransactionBlockInfo,
        TransactionOutputInformation, TransactionOutputInformationIn, TransactionOutputTargetInfo,
    },
};

/// Consumer-level events, fanned out by the transfers synchronizer
pub trait ConsumerObserver: Send + Sync {
    /// Blocks were accepted for this view key
    fn on_blocks_added(&self, _view_public_key: &PublicKey, _block_hashes: &[Hash]) {}

    /// Tracked state above `height` was discarded
    fn on_blockchain_detach(&self, _view_public_key: &PublicKey, _height: u32) {}

    /// A transaction changed in the listed containers
    fn on_transaction_updated(
        &self,
        _view_public_key: &PublicKey,
        _transaction_hash: &Hash,
        _containers: &[AccountPublicAddress],
    ) {
    }

    /// A pool transaction is about to be dropped from every container
    fn on_transaction_deletion_started(&self, _view_public_key: &PublicKey, _transaction_hash: &Hash) {
    }

    /// The drop finished
    fn on_transaction_deletion_finished(
        &self,
        _view_public_key: &PublicKey,
        _transaction_hash: &Hash,
    ) {
    }
}

struct ConsumerInner {
    subscriptions: BTreeMap<PublicKey, Arc<TransfersSubscription>>,
    spend_keys: HashSet<PublicKey>,
    sync_start: SyncStart,
}

struct PreprocessedTransaction {
    /// Owned outputs per spend key
    outputs: HashMap<PublicKey, Vec<TransactionOutputInformationIn>>,
    /// Global indices of every transaction output, empty for pool entries
    global_indices: Vec<u32>,
}

struct ScanItem<'a> {
    block_info: TransactionBlockInfo,
    transaction: &'a Transaction,
}

/// Scanner and dispatcher for all subscriptions under one view key
pub struct TransfersConsumer {
    params: Params,
    node: Arc<dyn NodeClient>,
    view_public_key: PublicKey,
    view_secret_key: SecretKey,
    inner: RwLock<ConsumerInner>,
    observers: ObserverList<dyn ConsumerObserver>,
}

impl TransfersConsumer {
    /// Consumer for the wallet holding `view_secret_key`
    pub fn new(
        params: Params,
        node: Arc<dyn NodeClient>,
        view_secret_key: SecretKey,
    ) -> Result<Self> {
        let view_public_key = secret_key_to_public_key(&view_secret_key)?;

        Ok(TransfersConsumer {
            params,
            node,
            view_public_key,
            view_secret_key,
            inner: RwLock::new(ConsumerInner {
                subscriptions: BTreeMap::new(),
                spend_keys: HashSet::new(),
                sync_start: SyncStart {
                    timestamp: u64::MAX,
                    height: u64::MAX,
                },
            }),
            observers: ObserverList::new(),
        })
    }

    /// The view public key identifying this consumer
    pub fn view_public_key(&self) -> PublicKey {
        self.view_public_key
    }

    /// Register an observer for consumer-level events
    pub fn add_observer(&self, observer: &Arc<dyn ConsumerObserver>) {
        self.observers.add(observer);
    }

    /// Unregister an observer
    pub fn remove_observer(&self, observer: &Arc<dyn ConsumerObserver>) {
        self.observers.remove(observer);
    }

    /// Add a subscription; its keys must carry this consumer's view secret.
    pub fn add_subscription(
        &self,
        subscription: AccountSubscription,
    ) -> Result<Arc<TransfersSubscription>> {
        if subscription.keys.view_secret_key != self.view_secret_key {
            return Err(Error::ViewKeyMismatch);
        }

        let mut inner = self.inner.write()?;
        let spend_public_key = subscription.keys.address.spend_public_key;

        let entry = inner
            .subscriptions
            .entry(spend_public_key)
            .or_insert_with(|| {
                Arc::new(TransfersSubscription::new(self.params.clone(), subscription))
            })
            .clone();
        inner.spend_keys.insert(spend_public_key);
        Self::update_sync_start(&mut inner);

        Ok(entry)
    }

    /// Remove a subscription. Returns true when the consumer became empty.
    pub fn remove_subscription(&self, address: &AccountPublicAddress) -> Result<bool> {
        let mut inner = self.inner.write()?;
        inner.subscriptions.remove(&address.spend_public_key);
        inner.spend_keys.remove(&address.spend_public_key);
        Self::update_sync_start(&mut inner);

        Ok(inner.subscriptions.is_empty())
    }

    /// Look up a subscription by address
    pub fn get_subscription(
        &self,
        address: &AccountPublicAddress,
    ) -> Result<Option<Arc<TransfersSubscription>>> {
        let inner = self.inner.read()?;

        Ok(inner.subscriptions.get(&address.spend_public_key).cloned())
    }

    /// Addresses of every subscription
    pub fn subscriptions(&self) -> Result<Vec<AccountPublicAddress>> {
        let inner = self.inner.read()?;

        Ok(inner
            .subscriptions
            .values()
            .map(|subscription| *subscription.address())
            .collect())
    }

    /// Earliest chain point any subscription cares about
    pub fn sync_start(&self) -> Result<SyncStart> {
        Ok(self.inner.read()?.sync_start)
    }

    /// Track a locally submitted transaction as unconfirmed
    pub fn add_unconfirmed_transaction(&self, transaction: &Transaction) -> Result<()> {
        let block_info = TransactionBlockInfo::unconfirmed();
        let preprocessed = self.preprocess(&block_info, transaction)?;
        self.process_transaction(&block_info, transaction, &preprocessed)?;

        Ok(())
    }

    /// Drop a locally submitted transaction from every container
    pub fn remove_unconfirmed_transaction(&self, transaction_hash: &Hash) -> Result<()> {
        let subscriptions = self.subscription_list()?;
        for subscription in subscriptions {
            subscription.delete_unconfirmed_transaction(transaction_hash)?;
        }

        Ok(())
    }

    /// Pool transactions any container currently tracks
    pub fn known_pool_tx_ids(&self) -> Result<Vec<Hash>> {
        let subscriptions = self.subscription_list()?;
        let mut known = BTreeSet::new();

        for subscription in subscriptions {
            known.extend(subscription.container().get_unconfirmed_transactions()?);
        }

        Ok(known.into_iter().collect())
    }

    fn subscription_list(&self) -> Result<Vec<Arc<TransfersSubscription>>> {
        let inner = self.inner.read()?;

        Ok(inner.subscriptions.values().cloned().collect())
    }

    fn update_sync_start(inner: &mut ConsumerInner) {
        let mut sync_start = SyncStart {
            timestamp: u64::MAX,
            height: u64::MAX,
        };

        for subscription in inner.subscriptions.values() {
            let start = subscription.sync_start();
            sync_start.timestamp = std::cmp::min(sync_start.timestamp, start.timestamp);
            sync_start.height = std::cmp::min(sync_start.height, start.height);
        }

        inner.sync_start = sync_start;
    }

    /// Find outputs of `transaction` addressed to any of our spend keys.
    fn find_outputs(
        &self,
        derivation: &KeyDerivation,
        transaction: &Transaction,
    ) -> Result<HashMap<PublicKey, Vec<u32>>> {
        let inner = self.inner.read()?;
        let mut outputs: HashMap<PublicKey, Vec<u32>> = HashMap::new();

        for (index, output) in transaction.prefix.outputs.iter().enumerate() {
            let index = index as u32;
            match &output.target {
                TransactionOutputTarget::Key(output_key) => {
                    if let Ok(spend_key) = underive_public_key(derivation, index, output_key) {
                        if inner.spend_keys.contains(&spend_key) {
                            outputs.entry(spend_key).or_default().push(index);
                        }
                    }
                }
                TransactionOutputTarget::Multisignature { keys, .. } => {
                    for key in keys {
                        if let Ok(spend_key) = underive_public_key(derivation, index, key) {
                            if inner.spend_keys.contains(&spend_key) {
                                outputs.entry(spend_key).or_default().push(index);
                            }
                        }
                    }
                }
            }
        }

        Ok(outputs)
    }

    fn get_global_indices(&self, transaction_hash: Hash) -> Result<Vec<u32>> {
        let (sender, receiver) = oneshot::channel();
        self.node.get_transaction_outs_global_indices(
            transaction_hash,
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        );

        let indices =
            futures::executor::block_on(receiver).unwrap_or(Err(NodeError::Interrupted))?;

        Ok(indices)
    }

    fn preprocess(
        &self,
        block_info: &TransactionBlockInfo,
        transaction: &Transaction,
    ) -> Result<PreprocessedTransaction> {
        let mut preprocessed = PreprocessedTransaction {
            outputs: HashMap::new(),
            global_indices: Vec::new(),
        };

        let transaction_public_key = match transaction.transaction_public_key() {
            Some(key) => key,
            None => return Ok(preprocessed),
        };

        let derivation =
            match generate_key_derivation(&transaction_public_key, &self.view_secret_key) {
                Ok(derivation) => derivation,
                // A malformed transaction key is not ours to report.
                Err(_) => return Ok(preprocessed),
            };

        let found = self.find_outputs(&derivation, transaction)?;
        if found.is_empty() {
            return Ok(preprocessed);
        }

        if !block_info.is_unconfirmed() {
            preprocessed.global_indices = self.get_global_indices(transaction.hash())?;
        }

        let transaction_hash = transaction.hash();
        for (spend_key, indices) in found {
            let subscription = {
                let inner = self.inner.read()?;
                inner.subscriptions.get(&spend_key).cloned()
            };
            let subscription = match subscription {
                Some(subscription) => subscription,
                None => continue,
            };

            let transfers = self.create_transfers(
                block_info,
                transaction,
                &transaction_hash,
                &transaction_public_key,
                &derivation,
                subscription.keys().spend_secret_key.clone(),
                &indices,
                &preprocessed.global_indices,
            )?;
            preprocessed.outputs.insert(spend_key, transfers);
        }

        Ok(preprocessed)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_transfers(
        &self,
        block_info: &TransactionBlockInfo,
        transaction: &Transaction,
        transaction_hash: &Hash,
        transaction_public_key: &PublicKey,
        derivation: &KeyDerivation,
        spend_secret_key: SecretKey,
        indices: &[u32],
        global_indices: &[u32],
    ) -> Result<Vec<TransactionOutputInformationIn>> {
        let mut transfers = Vec::with_capacity(indices.len());

        for &index in indices {
            let output = transaction
                .prefix
                .outputs
                .get(index as usize)
                .ok_or(Error::InvalidGlobalIndices {
                    transaction_hash: *transaction_hash,
                })?;

            let global_output_index = if block_info.is_unconfirmed() {
                crate::constants::UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX
            } else {
                *global_indices.get(index as usize).ok_or(
                    Error::InvalidGlobalIndices {
                        transaction_hash: *transaction_hash,
                    },
                )?
            };

            let (target, key_image) = match &output.target {
                TransactionOutputTarget::Key(output_key) => {
                    let key_image = if spend_secret_key.is_null() {
                        // Tracking wallets cannot compute key images.
                        None
                    } else {
                        let ephemeral_secret =
                            derive_secret_key(derivation, index, &spend_secret_key);
                        Some(generate_key_image(output_key, &ephemeral_secret))
                    };

                    (
                        TransactionOutputTargetInfo::Key {
                            output_key: *output_key,
                        },
                        key_image,
                    )
                }
                TransactionOutputTarget::Multisignature {
                    required_signature_count,
                    ..
                } => (
                    TransactionOutputTargetInfo::Multisignature {
                        required_signatures: *required_signature_count,
                    },
                    None,
                ),
            };

            transfers.push(TransactionOutputInformationIn {
                output: TransactionOutputInformation {
                    amount: output.amount,
                    global_output_index,
                    output_in_transaction: index,
                    transaction_hash: *transaction_hash,
                    transaction_public_key: *transaction_public_key,
                    target,
                },
                key_image,
            });
        }

        Ok(transfers)
    }

    /// Apply one preprocessed transaction to every subscription. Returns the
    /// addresses whose containers changed.
    fn process_transaction(
        &self,
        block_info: &TransactionBlockInfo,
        transaction: &Transaction,
        preprocessed: &PreprocessedTransaction,
    ) -> Result<Vec<AccountPublicAddress>> {
        let transaction_hash = transaction.hash();
        let subscriptions = self.subscription_list()?;
        let empty: Vec<TransactionOutputInformationIn> = Vec::new();
        let mut affected = Vec::new();

        for subscription in subscriptions {
            let outputs = preprocessed
                .outputs
                .get(&subscription.address().spend_public_key)
                .unwrap_or(&empty);

            if !block_info.is_unconfirmed() {
                if let Some(info) = subscription
                    .container()
                    .get_transaction_information(&transaction_hash)?
                {
                    if info.block_height == crate::constants::UNCONFIRMED_TRANSACTION_HEIGHT {
                        // The pool transaction got mined.
                        subscription.mark_transaction_confirmed(
                            block_info,
                            &transaction_hash,
                            &preprocessed.global_indices,
                        )?;
                        affected.push(*subscription.address());
                    }
                    // Already confirmed here; another subscription needed it.
                    continue;
                }
            }

            if subscription.add_transaction(block_info, transaction, outputs)? {
                affected.push(*subscription.address());
            }
        }

        Ok(affected)
    }

    fn process_blocks(&self, blocks: &[CompleteBlock], start_height: u32) -> Result<()> {
        let sync_start = self.sync_start()?;
        let mut items: Vec<ScanItem<'_>> = Vec::new();

        for (offset, block) in blocks.iter().enumerate() {
            let body = match &block.block {
                Some(body) => body,
                // Hash-only advance.
                None => continue,
            };

            if sync_start.timestamp > 0 && body.header.timestamp < sync_start.timestamp {
                continue;
            }

            let mut block_info = TransactionBlockInfo {
                height: start_height + offset as u32,
                timestamp: body.header.timestamp,
                transaction_index: 0,
            };

            for transaction in &block.transactions {
                if transaction.transaction_public_key().is_some() {
                    items.push(ScanItem {
                        block_info,
                        transaction,
                    });
                }
                block_info.transaction_index += 1;
            }
        }

        let preprocessed = self.preprocess_parallel(items)?;

        for (block_info, transaction, preprocessed) in &preprocessed {
            self.process_transaction(block_info, transaction, preprocessed)?;
        }

        let new_height = start_height + blocks.len() as u32 - 1;
        for subscription in self.subscription_list()? {
            subscription.advance_height(new_height)?;
        }

        let block_hashes: Vec<Hash> = blocks.iter().map(|block| block.block_hash).collect();
        self.observers
            .notify(|observer| observer.on_blocks_added(&self.view_public_key, &block_hashes));

        Ok(())
    }

    /// Scan items on a worker pool, then return the results sorted back
    /// into chain order.
    fn preprocess_parallel<'a>(
        &self,
        items: Vec<ScanItem<'a>>,
    ) -> Result<Vec<(TransactionBlockInfo, &'a Transaction, PreprocessedTransaction)>> {
        let workers = std::cmp::max(2, num_cpus::get());
        let (sender, receiver) = std::sync::mpsc::channel::<ScanItem<'a>>();
        for item in items {
            // The receiver outlives this loop, sends cannot fail.
            let _ = sender.send(item);
        }
        drop(sender);

        let receiver = Mutex::new(receiver);
        let results = Mutex::new(Vec::new());
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let stop = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }

                    let item = {
                        let receiver = match receiver.lock() {
                            Ok(receiver) => receiver,
                            Err(_) => break,
                        };
                        match receiver.try_recv() {
                            Ok(item) => item,
                            Err(_) => break,
                        }
                    };

                    match self.preprocess(&item.block_info, item.transaction) {
                        Ok(preprocessed) => {
                            if let Ok(mut results) = results.lock() {
                                results.push((item.block_info, item.transaction, preprocessed));
                            }
                        }
                        Err(err) => {
                            if let Ok(mut slot) = first_error.lock() {
                                slot.get_or_insert(err);
                            }
                            stop.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                });
            }
        });

        if let Some(err) = first_error.into_inner()? {
            return Err(err);
        }

        let mut preprocessed = results.into_inner()?;
        preprocessed.sort_by_key(|(block_info, _, _)| {
            (block_info.height, block_info.transaction_index)
        });

        Ok(preprocessed)
    }
}

impl sync::BlockchainConsumer for TransfersConsumer {
    fn view_public_key(&self) -> PublicKey {
        self.view_public_key
    }

    fn sync_start(&self) -> SyncStart {
        self.sync_start().unwrap_or(SyncStart {
            timestamp: u64::MAX,
            height: u64::MAX,
        })
    }

    fn known_pool_tx_ids(&self) -> Vec<Hash> {
        self.known_pool_tx_ids().unwrap_or_default()
    }

    fn on_blockchain_detach(&self, height: u32) {
        let subscriptions = self.subscription_list().unwrap_or_default();
        for subscription in subscriptions {
            if let Err(err) = subscription.on_blockchain_detach(height) {
                log::warn!("subscription detach at {} failed: {}", height, err);
            }
        }

        self.observers
            .notify(|observer| observer.on_blockchain_detach(&self.view_public_key, height));
    }

    fn on_new_blocks(&self, blocks: &[CompleteBlock], start_height: u32) -> bool {
        match self.process_blocks(blocks, start_height) {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "block batch starting at {} abandoned: {}",
                    start_height,
                    err
                );
                let subscriptions = self.subscription_list().unwrap_or_default();
                for subscription in subscriptions {
                    subscription.on_error(&err, start_height);
                }
                false
            }
        }
    }

    fn on_pool_updated(
        &self,
        added_transactions: &[Transaction],
        deleted_transactions: &[Hash],
    ) -> sync::Result<()> {
        let block_info = TransactionBlockInfo::unconfirmed();

        for transaction in added_transactions {
            if transaction.transaction_public_key().is_none() {
                continue;
            }

            let result = self
                .preprocess(&block_info, transaction)
                .and_then(|preprocessed| {
                    self.process_transaction(&block_info, transaction, &preprocessed)
                });

            match result {
                Ok(affected) => {
                    if !affected.is_empty() {
                        let hash = transaction.hash();
                        self.observers.notify(|observer| {
                            observer.on_transaction_updated(&self.view_public_key, &hash, &affected)
                        });
                    }
                }
                Err(err) => {
                    let subscriptions = self.subscription_list().unwrap_or_default();
                    for subscription in subscriptions {
                        subscription
                            .on_error(&err, crate::constants::UNCONFIRMED_TRANSACTION_HEIGHT);
                    }
                    return Err(sync::Error::Transfers(err));
                }
            }
        }

        for transaction_hash in deleted_transactions {
            self.observers.notify(|observer| {
                observer.on_transaction_deletion_started(&self.view_public_key, transaction_hash)
            });

            let subscriptions = self
                .subscription_list()
                .map_err(sync::Error::Transfers)?;
            for subscription in subscriptions {
                subscription
                    .delete_unconfirmed_transaction(transaction_hash)
                    .map_err(sync::Error::Transfers)?;
            }

            self.observers.notify(|observer| {
                observer.on_transaction_deletion_finished(&self.view_public_key, transaction_hash)
            });
        }

        Ok(())
    }
}
