//! Background blockchain synchronization.
//!
//! A single worker thread drives a four-state machine with strict priority
//! `stopped > blockchain_sync > pool_sync > idle`. External events can only
//! raise the future state; the worker snapshots it, lowers it to the state
//! that follows on success, and runs the corresponding pass. Whenever
//! something happens, a full blockchain pass therefore precedes a pool pass
//! precedes idling.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::{Read, Write},
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use futures::channel::oneshot;

use umbra_crypto::key::PublicKey;
use umbra_data_structures::{
    chain::{Block, Hash},
    transaction::Transaction,
};

use crate::{
    constants,
    node::{NodeClient, NodeError, PoolSymmetricDifference, QueryBlocksResponse},
    observers::ObserverList,
    types::{BlockchainInterval, CompleteBlock, SyncStart},
};

mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::{CheckResult, SynchronizationState};

/// A party interested in chain updates, registered with the synchronizer.
/// One consumer serves every subscription sharing a view key.
pub trait BlockchainConsumer: Send + Sync {
    /// View public key identifying the consumer
    fn view_public_key(&self) -> PublicKey;

    /// Earliest chain point this consumer cares about
    fn sync_start(&self) -> SyncStart;

    /// Pool transactions this consumer currently tracks
    fn known_pool_tx_ids(&self) -> Vec<Hash>;

    /// The chain was cut back to `height`
    fn on_blockchain_detach(&self, height: u32);

    /// New blocks attach at `start_height`. Returns false if the consumer
    /// could not apply them; the whole cycle is then abandoned.
    fn on_new_blocks(&self, blocks: &[CompleteBlock], start_height: u32) -> bool;

    /// The pool gained `added_transactions` and lost `deleted_transactions`
    fn on_pool_updated(
        &self,
        added_transactions: &[Transaction],
        deleted_transactions: &[Hash],
    ) -> Result<()>;
}

/// Events emitted by the synchronizer worker
pub trait BlockchainSynchronizerObserver: Send + Sync {
    /// The chain advanced to `processed` of the node's reported `total`
    fn synchronization_progress_updated(&self, _processed: u32, _total: u32) {}

    /// A sync cycle finished, successfully or not
    fn synchronization_completed(&self, _result: Result<()>) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum State {
    Idle = 0,
    PoolSync = 1,
    BlockchainSync = 2,
    Stopped = 3,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Idle,
            1 => State::PoolSync,
            2 => State::BlockchainSync,
            _ => State::Stopped,
        }
    }
}

struct ConsumerEntry {
    consumer: Arc<dyn BlockchainConsumer>,
    state: SynchronizationState,
}

/// The background synchronization engine.
pub struct BlockchainSynchronizer {
    node: Arc<dyn NodeClient>,
    genesis_block_hash: Hash,
    future_state: AtomicU8,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    consumers: Mutex<BTreeMap<PublicKey, ConsumerEntry>>,
    observers: ObserverList<dyn BlockchainSynchronizerObserver>,
    last_block_id: Mutex<Hash>,
    should_sync_consumers_pool: AtomicBool,
    wakeup_mutex: Mutex<()>,
    wakeup: Condvar,
}

impl BlockchainSynchronizer {
    /// Synchronizer for the chain rooted at `genesis_block_hash`, pulling
    /// from `node`.
    pub fn new(node: Arc<dyn NodeClient>, genesis_block_hash: Hash) -> Self {
        BlockchainSynchronizer {
            node,
            genesis_block_hash,
            future_state: AtomicU8::new(State::Stopped as u8),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
            consumers: Mutex::new(BTreeMap::new()),
            observers: ObserverList::new(),
            last_block_id: Mutex::new(genesis_block_hash),
            should_sync_consumers_pool: AtomicBool::new(true),
            wakeup_mutex: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }

    /// Register an observer for progress and completion events
    pub fn add_observer(&self, observer: &Arc<dyn BlockchainSynchronizerObserver>) {
        self.observers.add(observer);
    }

    /// Unregister a previously added observer
    pub fn remove_observer(&self, observer: &Arc<dyn BlockchainSynchronizerObserver>) {
        self.observers.remove(observer);
    }

    /// Register a consumer. Only allowed while stopped.
    pub fn add_consumer(&self, consumer: Arc<dyn BlockchainConsumer>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::NotStopped);
        }

        let mut consumers = self.lock_consumers();
        consumers.insert(
            consumer.view_public_key(),
            ConsumerEntry {
                state: SynchronizationState::new(self.genesis_block_hash),
                consumer,
            },
        );
        self.should_sync_consumers_pool.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Unregister a consumer. Only allowed while stopped.
    pub fn remove_consumer(&self, view_public_key: &PublicKey) -> Result<bool> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::NotStopped);
        }

        Ok(self.lock_consumers().remove(view_public_key).is_some())
    }

    /// Serialized sync state of a consumer. Only allowed while stopped.
    pub fn get_consumer_state(&self, view_public_key: &PublicKey) -> Result<Vec<u8>> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::NotStopped);
        }

        let consumers = self.lock_consumers();
        consumers
            .get(view_public_key)
            .map(|entry| entry.state.save())
            .ok_or(Error::UnknownConsumer)
    }

    /// Replace the sync state of a consumer. Only allowed while stopped.
    pub fn set_consumer_state(&self, view_public_key: &PublicKey, bytes: &[u8]) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::NotStopped);
        }

        let state = SynchronizationState::load(bytes)?;
        if state.genesis_block_hash() != self.genesis_block_hash {
            return Err(Error::GenesisMismatch);
        }

        let mut consumers = self.lock_consumers();
        let entry = consumers
            .get_mut(view_public_key)
            .ok_or(Error::UnknownConsumer)?;
        entry.state = state;

        Ok(())
    }

    /// Launch the worker thread. Requires at least one consumer.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.lock_consumers().is_empty() {
            return Err(Error::NoConsumers);
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        self.future_state
            .store(State::BlockchainSync as u8, Ordering::SeqCst);
        self.should_sync_consumers_pool.store(true, Ordering::SeqCst);

        let this = Arc::clone(self);
        let handle = std::thread::spawn(move || this.working_procedure());
        *self.worker.lock().expect("worker handle poisoned") = Some(handle);

        log::debug!("blockchain synchronizer started");

        Ok(())
    }

    /// Request a stop and join the worker. Idempotent.
    pub fn stop(&self) {
        self.future_state
            .store(State::Stopped as u8, Ordering::SeqCst);
        self.wakeup.notify_all();

        let handle = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
            log::debug!("blockchain synchronizer stopped");
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the worker thread is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The node announced a new top block
    pub fn last_known_block_height_updated(&self) {
        self.raise_future_state(State::BlockchainSync);
    }

    /// The node announced a pool change
    pub fn pool_changed(&self) {
        self.raise_future_state(State::PoolSync);
    }

    /// Persist the synchronizer prefix (the genesis anchor)
    pub fn save<W: Write>(&self, destination: &mut W) -> Result<()> {
        destination
            .write_all(&self.genesis_block_hash.0)
            .map_err(|err| Error::Storage(err.to_string()))
    }

    /// Verify a previously saved prefix against this synchronizer
    pub fn load<R: Read>(&self, source: &mut R) -> Result<()> {
        let mut stored = [0u8; 32];
        source
            .read_exact(&mut stored)
            .map_err(|err| Error::Storage(err.to_string()))?;

        if Hash(stored) != self.genesis_block_hash {
            return Err(Error::GenesisMismatch);
        }

        Ok(())
    }

    fn lock_consumers(&self) -> std::sync::MutexGuard<'_, BTreeMap<PublicKey, ConsumerEntry>> {
        self.consumers.lock().expect("consumer map poisoned")
    }

    fn future(&self) -> State {
        State::from_u8(self.future_state.load(Ordering::SeqCst))
    }

    fn should_stop(&self) -> bool {
        self.future() == State::Stopped
    }

    /// Raise the future state to `state` if it has higher priority than the
    /// current one.
    fn raise_future_state(&self, state: State) -> bool {
        let mut current = self.future_state.load(Ordering::SeqCst);
        loop {
            if state <= State::from_u8(current) {
                return false;
            }
            match self.future_state.compare_exchange(
                current,
                state as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.wakeup.notify_all();
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Lower the future state from `from` to `to`; a no-op when something
    /// raised it in between.
    fn lower_future_state(&self, from: State, to: State) {
        let _ = self.future_state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Force the future state to idle unless a stop is pending.
    fn demote_to_idle(&self) {
        let mut current = self.future_state.load(Ordering::SeqCst);
        loop {
            if State::from_u8(current) == State::Stopped {
                return;
            }
            match self.future_state.compare_exchange(
                current,
                State::Idle as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn working_procedure(self: Arc<Self>) {
        loop {
            match self.future() {
                State::Stopped => break,
                State::BlockchainSync => {
                    self.lower_future_state(State::BlockchainSync, State::PoolSync);
                    self.start_blockchain_sync();
                }
                State::PoolSync => {
                    self.lower_future_state(State::PoolSync, State::Idle);
                    self.start_pool_sync();
                }
                State::Idle => {
                    let guard = self.wakeup_mutex.lock().expect("wakeup mutex poisoned");
                    let _ = self.wakeup.wait_timeout(
                        guard,
                        Duration::from_millis(constants::SYNC_IDLE_SLEEP_MILLIS),
                    );
                }
            }
        }
    }

    fn notify_completed(&self, result: Result<()>) {
        self.observers
            .notify(|observer| observer.synchronization_completed(result.clone()));
    }

    fn map_node_error(error: NodeError) -> Error {
        match error {
            NodeError::Interrupted => Error::Interrupted,
            other => Error::Node(other),
        }
    }

    fn query_blocks_blocking(
        &self,
        known_blocks: Vec<Hash>,
        timestamp: u64,
    ) -> std::result::Result<QueryBlocksResponse, NodeError> {
        let (sender, receiver) = oneshot::channel();
        self.node.query_blocks(
            known_blocks,
            timestamp,
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        );

        futures::executor::block_on(receiver).unwrap_or(Err(NodeError::Interrupted))
    }

    fn pool_difference_blocking(
        &self,
        known_tx_hashes: Vec<Hash>,
        last_block_hash: Hash,
    ) -> std::result::Result<PoolSymmetricDifference, NodeError> {
        let (sender, receiver) = oneshot::channel();
        self.node.get_pool_symmetric_difference(
            known_tx_hashes,
            last_block_hash,
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        );

        futures::executor::block_on(receiver).unwrap_or(Err(NodeError::Interrupted))
    }

    /// The locator of the shortest consumer plus the component-wise minimum
    /// of all sync starts.
    fn get_common_history(&self) -> (Vec<Hash>, SyncStart) {
        let consumers = self.lock_consumers();

        let mut shortest: Option<&ConsumerEntry> = None;
        let mut sync_start = SyncStart {
            timestamp: u64::MAX,
            height: u64::MAX,
        };

        for entry in consumers.values() {
            let start = entry.consumer.sync_start();
            sync_start.timestamp = std::cmp::min(sync_start.timestamp, start.timestamp);
            sync_start.height = std::cmp::min(sync_start.height, start.height);

            match shortest {
                Some(candidate) if candidate.state.height() <= entry.state.height() => {}
                _ => shortest = Some(entry),
            }
        }

        let locator = shortest
            .map(|entry| entry.state.short_history())
            .unwrap_or_default();

        (locator, sync_start)
    }

    fn start_blockchain_sync(&self) {
        let (known_blocks, sync_start) = self.get_common_history();
        if known_blocks.is_empty() {
            return;
        }

        log::debug!(
            "requesting blocks, locator of {} hashes, start timestamp {}",
            known_blocks.len(),
            sync_start.timestamp
        );

        match self.query_blocks_blocking(known_blocks, sync_start.timestamp) {
            Err(err) => {
                self.notify_completed(Err(Self::map_node_error(err)));
                self.demote_to_idle();
            }
            Ok(response) => self.process_blocks(response),
        }
    }

    fn process_blocks(&self, response: QueryBlocksResponse) {
        let new_height = response.start_height + response.blocks.len() as u32;
        let mut interval = BlockchainInterval {
            start_height: response.start_height,
            blocks: Vec::with_capacity(response.blocks.len()),
        };
        let mut blocks = Vec::with_capacity(response.blocks.len());

        for raw in &response.blocks {
            if self.should_stop() {
                break;
            }

            interval.blocks.push(raw.block_hash);
            let mut complete = CompleteBlock {
                block_hash: raw.block_hash,
                block: None,
                transactions: Vec::new(),
            };

            if let Some(body) = &raw.block {
                let block = match Block::from_bytes(body) {
                    Ok(block) => block,
                    Err(err) => {
                        log::warn!("block {} does not parse: {}", raw.block_hash, err);
                        self.notify_completed(Err(Error::Chain(err)));
                        self.demote_to_idle();
                        return;
                    }
                };

                let mut transactions = Vec::with_capacity(1 + raw.transactions.len());
                transactions.push(block.miner_transaction.clone());
                for blob in &raw.transactions {
                    match Transaction::from_bytes(blob) {
                        Ok(transaction) => transactions.push(transaction),
                        Err(err) => {
                            log::warn!(
                                "transaction in block {} does not parse: {}",
                                raw.block_hash,
                                err
                            );
                            self.notify_completed(Err(Error::Chain(err)));
                            self.demote_to_idle();
                            return;
                        }
                    }
                }

                complete.block = Some(block);
                complete.transactions = transactions;
            }

            blocks.push(complete);
        }

        if !self.should_stop() {
            let result = {
                let mut consumers = self.lock_consumers();
                Self::update_consumers(&mut consumers, &interval, &blocks)
            };

            match result {
                Err(err) => {
                    log::warn!("blockchain sync cycle aborted: {}", err);
                    self.notify_completed(Err(err));
                    self.demote_to_idle();
                }
                Ok(changed) => {
                    let node_height = self.node.last_known_block_height();
                    let node_is_ahead = node_height > new_height;
                    if !changed && node_is_ahead {
                        std::thread::sleep(Duration::from_millis(
                            constants::SYNC_RETRY_SLEEP_MILLIS,
                        ));
                    }
                    if changed || node_is_ahead {
                        self.observers.notify(|observer| {
                            observer.synchronization_progress_updated(
                                new_height,
                                std::cmp::max(node_height, new_height),
                            )
                        });
                        self.raise_future_state(State::BlockchainSync);
                    }
                }
            }

            if let Some(last) = interval.blocks.last() {
                *self.last_block_id.lock().expect("last block id poisoned") = *last;
            }
        }

        if self.should_stop() {
            self.notify_completed(Err(Error::Interrupted));
        }
    }

    fn update_consumers(
        consumers: &mut BTreeMap<PublicKey, ConsumerEntry>,
        interval: &BlockchainInterval,
        blocks: &[CompleteBlock],
    ) -> Result<bool> {
        let mut something_changed = false;

        for entry in consumers.values_mut() {
            let check = entry.state.check_interval(interval)?;

            if check.detach_required {
                log::debug!("consumer detach at height {}", check.detach_height);
                entry.consumer.on_blockchain_detach(check.detach_height);
                entry.state.detach(check.detach_height);
            }

            if check.has_new_blocks {
                let offset = (check.new_block_height - interval.start_height) as usize;
                if entry
                    .consumer
                    .on_new_blocks(&blocks[offset..], check.new_block_height)
                {
                    entry
                        .state
                        .add_blocks(&interval.blocks[offset..], check.new_block_height)?;
                    something_changed = true;
                } else {
                    return Err(Error::ConsumerFailed {
                        start_height: check.new_block_height,
                    });
                }
            }
        }

        Ok(something_changed)
    }

    fn get_union_pool_history(&self) -> Vec<Hash> {
        let consumers = self.lock_consumers();
        let mut union = BTreeSet::new();
        for entry in consumers.values() {
            union.extend(entry.consumer.known_pool_tx_ids());
        }

        union.into_iter().collect()
    }

    fn get_intersected_pool_history(&self) -> Vec<Hash> {
        let consumers = self.lock_consumers();
        let mut iter = consumers.values();

        let mut intersection: BTreeSet<Hash> = match iter.next() {
            Some(entry) => entry.consumer.known_pool_tx_ids().into_iter().collect(),
            None => return Vec::new(),
        };

        for entry in iter {
            let known: BTreeSet<Hash> = entry.consumer.known_pool_tx_ids().into_iter().collect();
            intersection = intersection.intersection(&known).copied().collect();
        }

        intersection.into_iter().collect()
    }

    fn last_block_id(&self) -> Hash {
        *self.last_block_id.lock().expect("last block id poisoned")
    }

    fn start_pool_sync(&self) {
        let first_sync = self.should_sync_consumers_pool.load(Ordering::SeqCst);

        let union_response =
            match self.pool_difference_blocking(self.get_union_pool_history(), self.last_block_id())
            {
                Err(err) => {
                    self.notify_completed(Err(Self::map_node_error(err)));
                    self.demote_to_idle();
                    return;
                }
                Ok(response) => response,
            };

        if !union_response.is_last_known_block_actual {
            self.raise_future_state(State::BlockchainSync);
            return;
        }

        if !first_sync {
            let result = self.process_pool_transactions(
                &union_response.added_transactions,
                &union_response.deleted_transaction_hashes,
            );
            self.notify_completed(result);
            return;
        }

        // First pool pass after start: also ask with the intersection of all
        // consumers' known hashes so deletions some consumers missed are
        // learned, then merge both deletion lists.
        let intersected_response = match self
            .pool_difference_blocking(self.get_intersected_pool_history(), self.last_block_id())
        {
            Err(err) => {
                self.notify_completed(Err(Self::map_node_error(err)));
                self.demote_to_idle();
                return;
            }
            Ok(response) => response,
        };

        if !intersected_response.is_last_known_block_actual {
            self.raise_future_state(State::BlockchainSync);
            return;
        }

        let deleted: BTreeSet<Hash> = union_response
            .deleted_transaction_hashes
            .iter()
            .chain(intersected_response.deleted_transaction_hashes.iter())
            .copied()
            .collect();
        let deleted: Vec<Hash> = deleted.into_iter().collect();

        let result =
            self.process_pool_transactions(&intersected_response.added_transactions, &deleted);
        if result.is_ok() {
            self.should_sync_consumers_pool.store(false, Ordering::SeqCst);
        }
        self.notify_completed(result);
    }

    fn process_pool_transactions(
        &self,
        added_blobs: &[Vec<u8>],
        deleted: &[Hash],
    ) -> Result<()> {
        let mut added = Vec::with_capacity(added_blobs.len());
        for blob in added_blobs {
            added.push(Transaction::from_bytes(blob)?);
        }

        log::debug!(
            "pool update: {} added, {} deleted",
            added.len(),
            deleted.len()
        );

        let consumers = self.lock_consumers();
        for entry in consumers.values() {
            if self.should_stop() {
                return Err(Error::Interrupted);
            }

            entry.consumer.on_pool_updated(&added, deleted)?;
        }

        Ok(())
    }
}

impl Drop for BlockchainSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}
