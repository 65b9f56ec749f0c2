//! One tracked address: a transfers container plus its observer surface.
//!
//! Every state change flows through here so that the matching notification
//! is emitted right after the container releases its lock.

use std::sync::Arc;

use umbra_data_structures::{
    chain::{AccountKeys, AccountPublicAddress, Hash, Hashable},
    transaction::Transaction,
};

use super::{container::TransfersContainer, Error, Result};
use crate::{
    constants,
    observers::ObserverList,
    params::Params,
    types::{
        AccountSubscription, SyncStart, TransactionBlockInfo, TransactionOutputInformation,
        TransactionOutputInformationIn,
    },
};

/// Events of a single tracked address
pub trait TransfersObserver: Send + Sync {
    /// A transaction touching this address appeared or changed state
    fn on_transaction_updated(&self, _address: &AccountPublicAddress, _transaction_hash: &Hash) {}

    /// A previously reported transaction is gone
    fn on_transaction_deleted(&self, _address: &AccountPublicAddress, _transaction_hash: &Hash) {}

    /// Processing failed at `height`; tracked state above it was discarded
    fn on_error(&self, _address: &AccountPublicAddress, _height: u32, _error: &Error) {}

    /// Outputs became spendable
    fn on_transfers_unlocked(
        &self,
        _address: &AccountPublicAddress,
        _unlocked: &[TransactionOutputInformation],
    ) {
    }

    /// Outputs reverted to the locked state
    fn on_transfers_locked(
        &self,
        _address: &AccountPublicAddress,
        _locked: &[TransactionOutputInformation],
    ) {
    }
}

/// A single subscribed address and its transfers
pub struct TransfersSubscription {
    subscription: AccountSubscription,
    transfers: TransfersContainer,
    observers: ObserverList<dyn TransfersObserver>,
}

impl TransfersSubscription {
    /// Track the address described by `subscription`
    pub fn new(params: Params, subscription: AccountSubscription) -> Self {
        let transfers =
            TransfersContainer::new(params, subscription.transaction_spendable_age);

        TransfersSubscription {
            subscription,
            transfers,
            observers: ObserverList::new(),
        }
    }

    /// Keys of the tracked address
    pub fn keys(&self) -> &AccountKeys {
        &self.subscription.keys
    }

    /// Public address being tracked
    pub fn address(&self) -> &AccountPublicAddress {
        &self.subscription.keys.address
    }

    /// Earliest chain point this subscription cares about
    pub fn sync_start(&self) -> SyncStart {
        self.subscription.sync_start
    }

    /// The underlying container
    pub fn container(&self) -> &TransfersContainer {
        &self.transfers
    }

    /// Register an observer
    pub fn add_observer(&self, observer: &Arc<dyn TransfersObserver>) {
        self.observers.add(observer);
    }

    /// Unregister an observer
    pub fn remove_observer(&self, observer: &Arc<dyn TransfersObserver>) {
        self.observers.remove(observer);
    }

    /// The chain was cut back to `height`
    pub fn on_blockchain_detach(&self, height: u32) -> Result<()> {
        let result = self.transfers.detach(height)?;

        for hash in &result.deleted_transaction_hashes {
            self.observers
                .notify(|observer| observer.on_transaction_deleted(self.address(), hash));
        }
        if !result.locked_transfers.is_empty() {
            self.observers.notify(|observer| {
                observer.on_transfers_locked(self.address(), &result.locked_transfers)
            });
        }

        Ok(())
    }

    /// Processing failed; discard state above `height` and tell observers.
    pub fn on_error(&self, error: &Error, height: u32) {
        if height != constants::UNCONFIRMED_TRANSACTION_HEIGHT {
            match self.transfers.detach(height) {
                Ok(result) => {
                    for hash in &result.deleted_transaction_hashes {
                        self.observers.notify(|observer| {
                            observer.on_transaction_deleted(self.address(), hash)
                        });
                    }
                }
                Err(detach_error) => {
                    log::warn!(
                        "container detach at {} after error failed: {}",
                        height,
                        detach_error
                    );
                }
            }
        }

        self.observers
            .notify(|observer| observer.on_error(self.address(), height, error));
    }

    /// Raise the container height, notifying about newly spendable outputs
    pub fn advance_height(&self, height: u32) -> Result<()> {
        let unlocked = self.transfers.advance_height(height)?;

        if !unlocked.is_empty() {
            self.observers
                .notify(|observer| observer.on_transfers_unlocked(self.address(), &unlocked));
        }

        Ok(())
    }

    /// Ingest a transaction; observers hear about it when anything changed
    pub fn add_transaction(
        &self,
        block: &TransactionBlockInfo,
        transaction: &Transaction,
        transfers: &[TransactionOutputInformationIn],
    ) -> Result<bool> {
        let added = self.transfers.add_transaction(block, transaction, transfers)?;

        if added {
            let hash = transaction.hash();
            self.observers
                .notify(|observer| observer.on_transaction_updated(self.address(), &hash));
        }

        Ok(added)
    }

    /// Promote a pool transaction to its confirmed position
    pub fn mark_transaction_confirmed(
        &self,
        block: &TransactionBlockInfo,
        transaction_hash: &Hash,
        global_indices: &[u32],
    ) -> Result<()> {
        self.transfers
            .mark_transaction_confirmed(block, transaction_hash, global_indices)?;

        self.observers
            .notify(|observer| observer.on_transaction_updated(self.address(), transaction_hash));

        Ok(())
    }

    /// Drop an unconfirmed transaction
    pub fn delete_unconfirmed_transaction(&self, transaction_hash: &Hash) -> Result<bool> {
        let deleted = self.transfers.delete_unconfirmed_transaction(transaction_hash)?;

        if deleted {
            self.observers.notify(|observer| {
                observer.on_transaction_deleted(self.address(), transaction_hash)
            });
        }

        Ok(deleted)
    }
}
