//! Multiplexing of many view-key consumers over one blockchain
//! synchronizer, plus save/load orchestration of their state.

use std::{
    collections::BTreeMap,
    io::{Read, Write},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use umbra_crypto::key::PublicKey;
use umbra_data_structures::chain::{AccountPublicAddress, Hash};

use super::{
    consumer::{ConsumerObserver, TransfersConsumer},
    subscription::TransfersSubscription,
    Error, Result,
};
use crate::{
    constants,
    node::NodeClient,
    observers::ObserverList,
    params::Params,
    sync::{BlockchainConsumer, BlockchainSynchronizer, SynchronizationState},
    types::AccountSubscription,
};

#[derive(Serialize, Deserialize)]
struct SubscriptionStateDto {
    address: AccountPublicAddress,
    container: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ConsumerStateDto {
    view_public_key: PublicKey,
    state: Vec<u8>,
    subscriptions: Vec<SubscriptionStateDto>,
}

#[derive(Serialize, Deserialize)]
struct ArchiveDto {
    version: u32,
    consumers: Vec<ConsumerStateDto>,
}

/// Forwards consumer events to the externally registered observers.
struct EventsRelay {
    observers: ObserverList<dyn ConsumerObserver>,
}

impl ConsumerObserver for EventsRelay {
    fn on_blocks_added(&self, view_public_key: &PublicKey, block_hashes: &[Hash]) {
        self.observers
            .notify(|observer| observer.on_blocks_added(view_public_key, block_hashes));
    }

    fn on_blockchain_detach(&self, view_public_key: &PublicKey, height: u32) {
        self.observers
            .notify(|observer| observer.on_blockchain_detach(view_public_key, height));
    }

    fn on_transaction_updated(
        &self,
        view_public_key: &PublicKey,
        transaction_hash: &Hash,
        containers: &[AccountPublicAddress],
    ) {
        self.observers.notify(|observer| {
            observer.on_transaction_updated(view_public_key, transaction_hash, containers)
        });
    }

    fn on_transaction_deletion_started(&self, view_public_key: &PublicKey, transaction_hash: &Hash) {
        self.observers.notify(|observer| {
            observer.on_transaction_deletion_started(view_public_key, transaction_hash)
        });
    }

    fn on_transaction_deletion_finished(
        &self,
        view_public_key: &PublicKey,
        transaction_hash: &Hash,
    ) {
        self.observers.notify(|observer| {
            observer.on_transaction_deletion_finished(view_public_key, transaction_hash)
        });
    }
}

/// Owner of every consumer, keyed by view public key. The documented
/// persisted order is view key ascending.
pub struct TransfersSynchronizer {
    params: Params,
    node: Arc<dyn NodeClient>,
    synchronizer: Arc<BlockchainSynchronizer>,
    consumers: Mutex<BTreeMap<PublicKey, Arc<TransfersConsumer>>>,
    relay: Arc<EventsRelay>,
}

impl TransfersSynchronizer {
    /// Multiplexer over `synchronizer`, creating consumers against `node`.
    pub fn new(
        params: Params,
        node: Arc<dyn NodeClient>,
        synchronizer: Arc<BlockchainSynchronizer>,
    ) -> Self {
        TransfersSynchronizer {
            params,
            node,
            synchronizer,
            consumers: Mutex::new(BTreeMap::new()),
            relay: Arc::new(EventsRelay {
                observers: ObserverList::new(),
            }),
        }
    }

    /// Register an observer for per-view-key events
    pub fn add_observer(&self, observer: &Arc<dyn ConsumerObserver>) {
        self.relay.observers.add(observer);
    }

    /// Unregister an observer
    pub fn remove_observer(&self, observer: &Arc<dyn ConsumerObserver>) {
        self.relay.observers.remove(observer);
    }

    /// Subscribe an address. The consumer for its view key is created and
    /// registered with the blockchain synchronizer on first use, which
    /// requires the synchronizer to be stopped.
    pub fn add_subscription(
        &self,
        subscription: AccountSubscription,
    ) -> Result<Arc<TransfersSubscription>> {
        let view_public_key = subscription.keys.address.view_public_key;
        let mut consumers = self.consumers.lock()?;

        let consumer = match consumers.get(&view_public_key) {
            Some(consumer) => Arc::clone(consumer),
            None => {
                let consumer = Arc::new(TransfersConsumer::new(
                    self.params.clone(),
                    Arc::clone(&self.node),
                    subscription.keys.view_secret_key.clone(),
                )?);
                if consumer.view_public_key() != view_public_key {
                    return Err(Error::ViewKeyMismatch);
                }

                let relay: Arc<dyn ConsumerObserver> = self.relay.clone();
                consumer.add_observer(&relay);

                let registered: Arc<dyn BlockchainConsumer> = consumer.clone();
                self.synchronizer
                    .add_consumer(registered)
                    .map_err(|_| Error::SynchronizerRunning)?;

                consumers.insert(view_public_key, Arc::clone(&consumer));
                consumer
            }
        };

        consumer.add_subscription(subscription)
    }

    /// Unsubscribe an address; the consumer is dropped with its last
    /// subscription. Returns false for unknown addresses.
    pub fn remove_subscription(&self, address: &AccountPublicAddress) -> Result<bool> {
        let mut consumers = self.consumers.lock()?;

        let consumer = match consumers.get(&address.view_public_key) {
            Some(consumer) => Arc::clone(consumer),
            None => return Ok(false),
        };

        if consumer.remove_subscription(address)? {
            self.synchronizer
                .remove_consumer(&address.view_public_key)
                .map_err(|_| Error::SynchronizerRunning)?;
            consumers.remove(&address.view_public_key);
        }

        Ok(true)
    }

    /// Look up a subscription by address
    pub fn get_subscription(
        &self,
        address: &AccountPublicAddress,
    ) -> Result<Option<Arc<TransfersSubscription>>> {
        let consumers = self.consumers.lock()?;

        match consumers.get(&address.view_public_key) {
            Some(consumer) => consumer.get_subscription(address),
            None => Ok(None),
        }
    }

    /// Every subscribed address across all consumers
    pub fn subscriptions(&self) -> Result<Vec<AccountPublicAddress>> {
        let consumers = self.consumers.lock()?;
        let mut all = Vec::new();

        for consumer in consumers.values() {
            all.extend(consumer.subscriptions()?);
        }

        Ok(all)
    }

    /// Serialize every consumer's sync state and containers. Requires the
    /// blockchain synchronizer to be stopped.
    pub fn save<W: Write>(&self, destination: &mut W) -> Result<()> {
        if self.synchronizer.is_running() {
            return Err(Error::SynchronizerRunning);
        }

        self.synchronizer
            .save(destination)
            .map_err(|err| Error::Storage(err.to_string()))?;

        let consumers = self.consumers.lock()?;
        let mut archive = ArchiveDto {
            version: constants::TRANSFERS_STORAGE_ARCHIVE_VERSION,
            consumers: Vec::with_capacity(consumers.len()),
        };

        for (view_public_key, consumer) in consumers.iter() {
            let state = self
                .synchronizer
                .get_consumer_state(view_public_key)
                .map_err(|err| Error::Storage(err.to_string()))?;

            let mut subscriptions = Vec::new();
            for address in consumer.subscriptions()? {
                if let Some(subscription) = consumer.get_subscription(&address)? {
                    let mut container = Vec::new();
                    subscription.container().save(&mut container)?;
                    subscriptions.push(SubscriptionStateDto { address, container });
                }
            }

            archive.consumers.push(ConsumerStateDto {
                view_public_key: *view_public_key,
                state,
                subscriptions,
            });
        }

        Ok(bincode::serialize_into(destination, &archive)?)
    }

    /// Restore consumer state saved by [`Self::save`]. The archive is fully
    /// parsed and validated before anything is applied, so a corrupt stream
    /// leaves the in-memory state untouched. Consumers present in the
    /// archive but not registered here are skipped.
    pub fn load<R: Read>(&self, source: &mut R) -> Result<()> {
        if self.synchronizer.is_running() {
            return Err(Error::SynchronizerRunning);
        }

        self.synchronizer
            .load(source)
            .map_err(|err| Error::Storage(err.to_string()))?;

        let archive: ArchiveDto = bincode::deserialize_from(source)?;
        if archive.version > constants::TRANSFERS_STORAGE_ARCHIVE_VERSION {
            return Err(Error::UnsupportedArchiveVersion(archive.version));
        }

        let consumers = self.consumers.lock()?;

        // Validation pass: every blob must decode before any is applied.
        struct PendingConsumer {
            view_public_key: PublicKey,
            state: Vec<u8>,
            subscriptions: Vec<(Arc<TransfersSubscription>, Vec<u8>)>,
        }

        let mut pending = Vec::new();
        for consumer_dto in archive.consumers {
            let consumer = match consumers.get(&consumer_dto.view_public_key) {
                Some(consumer) => consumer,
                None => {
                    log::debug!(
                        "skipping stored state of unknown consumer {}",
                        consumer_dto.view_public_key
                    );
                    continue;
                }
            };

            SynchronizationState::load(&consumer_dto.state)
                .map_err(|err| Error::Storage(err.to_string()))?;

            let mut subscriptions = Vec::new();
            for subscription_dto in consumer_dto.subscriptions {
                let subscription = match consumer.get_subscription(&subscription_dto.address)? {
                    Some(subscription) => subscription,
                    None => continue,
                };

                let staging =
                    super::container::TransfersContainer::new(self.params.clone(), 0);
                staging.load(&mut subscription_dto.container.as_slice())?;

                subscriptions.push((subscription, subscription_dto.container));
            }

            pending.push(PendingConsumer {
                view_public_key: consumer_dto.view_public_key,
                state: consumer_dto.state,
                subscriptions,
            });
        }

        // Apply pass.
        for consumer in pending {
            self.synchronizer
                .set_consumer_state(&consumer.view_public_key, &consumer.state)
                .map_err(|err| Error::Storage(err.to_string()))?;

            for (subscription, container) in consumer.subscriptions {
                subscription.container().load(&mut container.as_slice())?;
            }
        }

        Ok(())
    }
}

impl Drop for TransfersSynchronizer {
    fn drop(&mut self) {
        self.synchronizer.stop();

        if let Ok(consumers) = self.consumers.lock() {
            for view_public_key in consumers.keys() {
                let _ = self.synchronizer.remove_consumer(view_public_key);
            }
        }
    }
}
