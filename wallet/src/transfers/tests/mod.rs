use std::sync::{Arc, Mutex};

use umbra_data_structures::chain::{AccountPublicAddress, Hash, Hashable};

use super::{
    consumer::TransfersConsumer,
    container::TransfersContainer,
    subscription::{TransfersObserver, TransfersSubscription},
    synchronizer::TransfersSynchronizer,
    Error,
};
use crate::{
    constants,
    params::Params,
    sync::{BlockchainConsumer, BlockchainSynchronizer},
    types::{flags, TransactionBlockInfo},
};


use factories::*;

const SPENDABLE_AGE: u32 = 5;

fn container() -> TransfersContainer {
    TransfersContainer::new(Params::default(), SPENDABLE_AGE)
}

#[test]
fn test_incoming_transfer_locks_then_unlocks() {
    let container = container();
    let keys = account();
    let tx = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .create();

    let added = container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &tx,
            &[output_in(&tx, 0, 40, fake_key_image(1))],
        )
        .unwrap();

    assert!(added);
    assert_eq!(
        1000,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_LOCKED)
            .unwrap()
    );
    assert_eq!(0, container.balance(flags::INCLUDE_DEFAULT).unwrap());

    let unlocked = container.advance_height(15).unwrap();

    assert_eq!(1, unlocked.len());
    assert_eq!(1000, unlocked[0].amount);
    assert_eq!(1000, container.balance(flags::INCLUDE_DEFAULT).unwrap());
    assert_eq!(
        0,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_LOCKED)
            .unwrap()
    );
}

#[test]
fn test_duplicate_add_is_a_no_op() {
    let container = container();
    let keys = account();
    let tx = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .create();
    let transfers = [output_in(&tx, 0, 40, fake_key_image(1))];
    let block = block_info(10, 1_600_000_000);

    assert!(container.add_transaction(&block, &tx, &transfers).unwrap());
    assert!(!container.add_transaction(&block, &tx, &transfers).unwrap());

    assert_eq!(1, container.transfers_count().unwrap());
    assert_eq!(1, container.transactions_count().unwrap());
}

#[test]
fn test_spend_moves_output_to_spent() {
    let container = container();
    let keys = account();
    let other = account();
    let fund = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &fund,
            &[output_in(&fund, 0, 40, fake_key_image(1))],
        )
        .unwrap();
    container.advance_height(15).unwrap();

    let spend = TransferTransaction::default()
        .spending(key_input(1000, fake_key_image(1)))
        .paying(&other.address, 900)
        .create();
    let added = container
        .add_transaction(&block_info(20, 1_600_000_600), &spend, &[])
        .unwrap();

    assert!(added);
    assert_eq!(0, container.balance(flags::INCLUDE_DEFAULT).unwrap());
    assert_eq!(
        1000,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_SPENT)
            .unwrap()
    );

    let spent = container.get_spent_outputs().unwrap();
    assert_eq!(1, spent.len());
    assert_eq!(spend.hash(), spent[0].spending_transaction_hash);
    assert_eq!(20, spent[0].spending_block_height);

    let inputs = container
        .get_transaction_inputs(&spend.hash(), flags::INCLUDE_TYPE_ALL)
        .unwrap();
    assert_eq!(1, inputs.len());
    assert_eq!(1000, inputs[0].amount);
}

#[test]
fn test_detach_restores_spent_output() {
    let container = container();
    let keys = account();
    let fund = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .create();
    let spend = TransferTransaction::default()
        .spending(key_input(1000, fake_key_image(1)))
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &fund,
            &[output_in(&fund, 0, 40, fake_key_image(1))],
        )
        .unwrap();
    container.advance_height(25).unwrap();
    container
        .add_transaction(&block_info(20, 1_600_000_600), &spend, &[])
        .unwrap();

    let result = container.detach(20).unwrap();

    assert_eq!(vec![spend.hash()], result.deleted_transaction_hashes);
    assert_eq!(1, result.locked_transfers.len());
    assert_eq!(1000, container.balance(flags::INCLUDE_DEFAULT).unwrap());
    assert_eq!(
        0,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_SPENT)
            .unwrap()
    );

    // Cutting below the funding block removes everything.
    let result = container.detach(10).unwrap();
    assert_eq!(vec![fund.hash()], result.deleted_transaction_hashes);
    assert_eq!(0, container.balance(flags::INCLUDE_ALL).unwrap());
    assert_eq!(0, container.transfers_count().unwrap());
}

#[test]
fn test_detach_then_replay_reaches_the_same_state() {
    let container = container();
    let keys = account();
    let other = account();
    let fund = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .create();
    let spend = TransferTransaction::default()
        .spending(key_input(1000, fake_key_image(1)))
        .paying(&other.address, 990)
        .create();
    let fund_block = block_info(10, 1_600_000_000);
    let spend_block = block_info(20, 1_600_000_600);
    let fund_transfers = [output_in(&fund, 0, 40, fake_key_image(1))];

    container
        .add_transaction(&fund_block, &fund, &fund_transfers)
        .unwrap();
    container
        .add_transaction(&spend_block, &spend, &[])
        .unwrap();
    container.advance_height(25).unwrap();

    let masks = [
        flags::INCLUDE_DEFAULT,
        flags::INCLUDE_ALL,
        flags::INCLUDE_KEY_NOT_UNLOCKED,
        flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_SPENT,
    ];
    let before: Vec<u64> = masks
        .iter()
        .map(|mask| container.balance(*mask).unwrap())
        .collect();
    let outputs_before = container.get_outputs(flags::INCLUDE_ALL).unwrap();

    container.detach(10).unwrap();
    container
        .add_transaction(&fund_block, &fund, &fund_transfers)
        .unwrap();
    container
        .add_transaction(&spend_block, &spend, &[])
        .unwrap();
    container.advance_height(25).unwrap();

    let after: Vec<u64> = masks
        .iter()
        .map(|mask| container.balance(*mask).unwrap())
        .collect();

    assert_eq!(before, after);
    assert_eq!(
        outputs_before,
        container.get_outputs(flags::INCLUDE_ALL).unwrap()
    );
}

#[test]
fn test_colliding_key_images_are_hidden_from_balance() {
    let container = container();
    let keys = account();
    let tx_a = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .with_nonce(1)
        .create();
    let tx_b = TransferTransaction::default()
        .paying(&keys.address, 500)
        .with_nonce(2)
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &tx_a,
            &[output_in(&tx_a, 0, 40, fake_key_image(7))],
        )
        .unwrap();
    container
        .add_transaction(
            &block_info(11, 1_600_000_060),
            &tx_b,
            &[output_in(&tx_b, 0, 41, fake_key_image(7))],
        )
        .unwrap();

    // Both carriers of the duplicated key image disappear from queries.
    assert_eq!(0, container.balance(flags::INCLUDE_ALL).unwrap());

    // Removing one of them restores the survivor.
    container.detach(11).unwrap();
    assert_eq!(
        1000,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_LOCKED)
            .unwrap()
    );
}

#[test]
fn test_detach_of_spent_collider_restores_sibling_visibility() {
    let container = container();
    let keys = account();
    // Two outputs carrying the same key image; the younger one gets spent,
    // then the reorg removes both its creation block and the spend.
    let tx_a = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .with_nonce(1)
        .create();
    let tx_b = TransferTransaction::default()
        .paying(&keys.address, 400)
        .with_nonce(2)
        .create();
    let spend = TransferTransaction::default()
        .spending(key_input(1000, fake_key_image(9)))
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &tx_a,
            &[output_in(&tx_a, 0, 40, fake_key_image(9))],
        )
        .unwrap();
    container
        .add_transaction(
            &block_info(8, 1_599_999_880),
            &tx_b,
            &[output_in(&tx_b, 0, 41, fake_key_image(9))],
        )
        .unwrap();
    container
        .add_transaction(&block_info(20, 1_600_000_600), &spend, &[])
        .unwrap();

    // The collision keeps the survivor hidden while a spent record claims
    // the key image.
    assert_eq!(0, container.balance(flags::INCLUDE_ALL).unwrap());

    // Cutting at the spent output's own block drops it and the spend; the
    // sibling is now the sole holder and returns to balance.
    let result = container.detach(10).unwrap();

    assert_eq!(
        vec![spend.hash(), tx_a.hash()],
        result.deleted_transaction_hashes
    );
    assert_eq!(
        400,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_LOCKED)
            .unwrap()
    );
    assert_eq!(1, container.transfers_count().unwrap());
}

#[test]
fn test_pool_transaction_is_promoted_on_confirmation() {
    let container = container();
    let keys = account();
    let tx = TransferTransaction::default()
        .paying(&keys.address, 500)
        .create();

    container
        .add_transaction(
            &TransactionBlockInfo::unconfirmed(),
            &tx,
            &[output_in(
                &tx,
                0,
                constants::UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
                fake_key_image(3),
            )],
        )
        .unwrap();

    assert_eq!(
        500,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_LOCKED)
            .unwrap()
    );
    assert_eq!(
        vec![tx.hash()],
        container.get_unconfirmed_transactions().unwrap()
    );

    container
        .mark_transaction_confirmed(&block_info(20, 1_600_000_600), &tx.hash(), &[70])
        .unwrap();

    assert!(container.get_unconfirmed_transactions().unwrap().is_empty());
    let outputs = container
        .get_transaction_outputs(&tx.hash(), flags::INCLUDE_ALL)
        .unwrap();
    assert_eq!(1, outputs.len());
    assert_eq!(70, outputs[0].global_output_index);
    assert_eq!(
        20,
        container
            .get_transaction_information(&tx.hash())
            .unwrap()
            .unwrap()
            .block_height
    );
}

#[test]
fn test_mark_confirmed_requires_an_unconfirmed_transaction() {
    let container = container();
    let keys = account();
    let tx = TransferTransaction::default()
        .paying(&keys.address, 500)
        .create();

    assert!(matches!(
        container.mark_transaction_confirmed(&block_info(20, 0), &tx.hash(), &[70]),
        Err(Error::TransactionNotUnconfirmed { .. })
    ));

    container
        .add_transaction(
            &block_info(10, 0),
            &tx,
            &[output_in(&tx, 0, 40, fake_key_image(1))],
        )
        .unwrap();

    assert!(matches!(
        container.mark_transaction_confirmed(&block_info(20, 0), &tx.hash(), &[70]),
        Err(Error::TransactionNotUnconfirmed { .. })
    ));
}

#[test]
fn test_pool_spend_reverts_when_the_transaction_is_dropped() {
    let container = container();
    let keys = account();
    let fund = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .create();
    let spend = TransferTransaction::default()
        .spending(key_input(1000, fake_key_image(1)))
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &fund,
            &[output_in(&fund, 0, 40, fake_key_image(1))],
        )
        .unwrap();
    container.advance_height(15).unwrap();

    container
        .add_transaction(&TransactionBlockInfo::unconfirmed(), &spend, &[])
        .unwrap();
    assert_eq!(0, container.balance(flags::INCLUDE_DEFAULT).unwrap());

    assert!(container
        .delete_unconfirmed_transaction(&spend.hash())
        .unwrap());
    assert_eq!(1000, container.balance(flags::INCLUDE_DEFAULT).unwrap());

    // Deleting twice is fine.
    assert!(!container
        .delete_unconfirmed_transaction(&spend.hash())
        .unwrap());
}

#[test]
fn test_confirmed_spend_supersedes_pool_spend() {
    let container = container();
    let keys = account();
    let fund = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .create();
    let pool_spend = TransferTransaction::default()
        .spending(key_input(1000, fake_key_image(1)))
        .with_nonce(1)
        .create();
    let mined_spend = TransferTransaction::default()
        .spending(key_input(1000, fake_key_image(1)))
        .with_nonce(2)
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &fund,
            &[output_in(&fund, 0, 40, fake_key_image(1))],
        )
        .unwrap();
    container.advance_height(15).unwrap();
    container
        .add_transaction(&TransactionBlockInfo::unconfirmed(), &pool_spend, &[])
        .unwrap();
    container
        .add_transaction(&block_info(20, 1_600_000_600), &mined_spend, &[])
        .unwrap();

    let spent = container.get_spent_outputs().unwrap();
    assert_eq!(1, spent.len());
    assert_eq!(mined_spend.hash(), spent[0].spending_transaction_hash);

    // Once the pool transaction goes away the spend stays with the mined
    // transaction and the balance does not double back.
    container
        .delete_unconfirmed_transaction(&pool_spend.hash())
        .unwrap();
    assert_eq!(0, container.balance(flags::INCLUDE_DEFAULT).unwrap());
    assert_eq!(
        1000,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_SPENT)
            .unwrap()
    );
}

#[test]
fn test_conflicting_unconfirmed_descriptor_is_rejected() {
    let container = container();
    let keys = account();
    let tx_a = TransferTransaction::default()
        .paying(&keys.address, 500)
        .with_nonce(1)
        .create();
    let tx_b = TransferTransaction::default()
        .paying(&keys.address, 500)
        .with_nonce(2)
        .create();

    container
        .add_transaction(
            &TransactionBlockInfo::unconfirmed(),
            &tx_a,
            &[output_in(
                &tx_a,
                0,
                constants::UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
                fake_key_image(4),
            )],
        )
        .unwrap();

    assert!(matches!(
        container.add_transaction(
            &TransactionBlockInfo::unconfirmed(),
            &tx_b,
            &[output_in(
                &tx_b,
                0,
                constants::UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
                fake_key_image(4),
            )],
        ),
        Err(Error::TransferExistsUnconfirmed { .. })
    ));
}

#[test]
fn test_aged_output_with_pending_unlock_time_is_soft_locked() {
    let container = container();
    let keys = account();
    let tx = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .with_unlock_time(100)
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &tx,
            &[output_in(&tx, 0, 40, fake_key_image(1))],
        )
        .unwrap();

    // Aged past the spendable age but still held by the unlock height.
    let unlocked = container.advance_height(20).unwrap();
    assert!(unlocked.is_empty());
    assert_eq!(
        1000,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_SOFT_LOCKED)
            .unwrap()
    );
    assert_eq!(0, container.balance(flags::INCLUDE_DEFAULT).unwrap());
    assert_eq!(
        0,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_LOCKED)
            .unwrap()
    );

    // The unlock height arrives (one block of slack is granted).
    let unlocked = container.advance_height(99).unwrap();
    assert_eq!(1, unlocked.len());
    assert_eq!(1000, container.balance(flags::INCLUDE_DEFAULT).unwrap());
}

#[test]
fn test_timestamp_unlock_time_keeps_output_soft_locked() {
    let container = container();
    let keys = account();
    let tx = TransferTransaction::default()
        .paying(&keys.address, 700)
        .with_unlock_time(u64::MAX / 2)
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &tx,
            &[output_in(&tx, 0, 40, fake_key_image(1))],
        )
        .unwrap();
    container.advance_height(1_000_000).unwrap();

    assert_eq!(
        700,
        container
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_SOFT_LOCKED)
            .unwrap()
    );
    assert_eq!(0, container.balance(flags::INCLUDE_ALL_UNLOCKED).unwrap());
}

#[test]
fn test_one_consumer_serves_several_spend_keys() {
    let keys_a = account();
    let mut keys_b = account();
    keys_b.address.view_public_key = keys_a.address.view_public_key;
    keys_b.view_secret_key = keys_a.view_secret_key.clone();

    let consumer = TransfersConsumer::new(
        Params::default(),
        index_node(),
        keys_a.view_secret_key.clone(),
    )
    .unwrap();
    let sub_a = consumer.add_subscription(subscription(&keys_a, 0)).unwrap();
    let sub_b = consumer.add_subscription(subscription(&keys_b, 0)).unwrap();

    let tx = TransferTransaction::default()
        .paying(&keys_a.address, 100)
        .paying(&keys_b.address, 200)
        .create();
    let blocks = vec![complete_block(10, vec![tx])];

    assert!(BlockchainConsumer::on_new_blocks(&consumer, &blocks, 10));

    assert_eq!(
        100,
        sub_a.container().balance(flags::INCLUDE_DEFAULT).unwrap()
    );
    assert_eq!(
        200,
        sub_b.container().balance(flags::INCLUDE_DEFAULT).unwrap()
    );

    // Dropping one subscription does not empty the consumer.
    assert!(!consumer.remove_subscription(&keys_a.address).unwrap());
    assert!(consumer.remove_subscription(&keys_b.address).unwrap());
}

#[test]
fn test_advance_height_cannot_move_backwards() {
    let container = container();
    container.advance_height(20).unwrap();

    assert!(matches!(
        container.advance_height(10),
        Err(Error::HeightDecrease {
            current: 20,
            requested: 10
        })
    ));
}

#[test]
fn test_container_serialization_is_idempotent() {
    let container = container();
    let keys = account();
    let other = account();
    let fund = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .paying(&other.address, 250)
        .create();
    let pool = TransferTransaction::default()
        .paying(&keys.address, 300)
        .create();
    let spend = TransferTransaction::default()
        .spending(key_input(1000, fake_key_image(1)))
        .create();

    container
        .add_transaction(
            &block_info(10, 1_600_000_000),
            &fund,
            &[output_in(&fund, 0, 40, fake_key_image(1))],
        )
        .unwrap();
    container
        .add_transaction(
            &TransactionBlockInfo::unconfirmed(),
            &pool,
            &[output_in(
                &pool,
                0,
                constants::UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
                fake_key_image(2),
            )],
        )
        .unwrap();
    container.advance_height(15).unwrap();
    container
        .add_transaction(&block_info(20, 1_600_000_600), &spend, &[])
        .unwrap();

    let mut first = Vec::new();
    container.save(&mut first).unwrap();

    let restored = TransfersContainer::new(Params::default(), 0);
    restored.load(&mut first.as_slice()).unwrap();

    let mut second = Vec::new();
    restored.save(&mut second).unwrap();

    assert_eq!(first, second);
    for mask in [
        flags::INCLUDE_DEFAULT,
        flags::INCLUDE_ALL,
        flags::INCLUDE_KEY_NOT_UNLOCKED,
        flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_SPENT,
    ] {
        assert_eq!(
            container.balance(mask).unwrap(),
            restored.balance(mask).unwrap()
        );
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl TransfersObserver for RecordingObserver {
    fn on_transaction_updated(&self, _address: &AccountPublicAddress, transaction_hash: &Hash) {
        self.push(format!("updated {}", transaction_hash));
    }

    fn on_transaction_deleted(&self, _address: &AccountPublicAddress, transaction_hash: &Hash) {
        self.push(format!("deleted {}", transaction_hash));
    }

    fn on_error(&self, _address: &AccountPublicAddress, height: u32, _error: &Error) {
        self.push(format!("error {}", height));
    }

    fn on_transfers_unlocked(
        &self,
        _address: &AccountPublicAddress,
        unlocked: &[crate::types::TransactionOutputInformation],
    ) {
        self.push(format!("unlocked {}", unlocked.len()));
    }

    fn on_transfers_locked(
        &self,
        _address: &AccountPublicAddress,
        locked: &[crate::types::TransactionOutputInformation],
    ) {
        self.push(format!("locked {}", locked.len()));
    }
}

#[test]
fn test_subscription_emits_update_unlock_and_delete_in_order() {
    let keys = account();
    let sub = TransfersSubscription::new(Params::default(), subscription(&keys, SPENDABLE_AGE));
    let observer = Arc::new(RecordingObserver::default());
    let handle: Arc<dyn TransfersObserver> = observer.clone();
    sub.add_observer(&handle);

    let tx = TransferTransaction::default()
        .paying(&keys.address, 1000)
        .create();
    sub.add_transaction(
        &block_info(10, 1_600_000_000),
        &tx,
        &[output_in(&tx, 0, 40, fake_key_image(1))],
    )
    .unwrap();
    sub.advance_height(15).unwrap();
    sub.on_blockchain_detach(10).unwrap();

    let events = observer.events();
    assert_eq!(
        vec![
            format!("updated {}", tx.hash()),
            "unlocked 1".to_string(),
            format!("deleted {}", tx.hash()),
        ],
        events
    );
}

#[test]
fn test_consumer_rejects_foreign_view_keys() {
    let keys = account();
    let stranger = account();
    let consumer =
        TransfersConsumer::new(Params::default(), index_node(), keys.view_secret_key.clone())
            .unwrap();

    assert!(matches!(
        consumer.add_subscription(subscription(&stranger, 0)),
        Err(Error::ViewKeyMismatch)
    ));
}

#[test]
fn test_consumer_scan_detects_owned_output() {
    let keys = account();
    let consumer =
        TransfersConsumer::new(Params::default(), index_node(), keys.view_secret_key.clone())
            .unwrap();
    let sub = consumer.add_subscription(subscription(&keys, 0)).unwrap();

    let tx = TransferTransaction::default()
        .paying(&keys.address, 700)
        .create();
    let blocks = vec![complete_block(10, vec![tx.clone()])];

    assert!(BlockchainConsumer::on_new_blocks(&consumer, &blocks, 10));

    assert_eq!(
        700,
        sub.container().balance(flags::INCLUDE_DEFAULT).unwrap()
    );
    let outputs = sub
        .container()
        .get_transaction_outputs(&tx.hash(), flags::INCLUDE_ALL)
        .unwrap();
    assert_eq!(1, outputs.len());
    assert_eq!(100, outputs[0].global_output_index);
}

#[test]
fn test_consumer_ignores_foreign_outputs() {
    let keys = account();
    let stranger = account();
    let consumer =
        TransfersConsumer::new(Params::default(), index_node(), keys.view_secret_key.clone())
            .unwrap();
    let sub = consumer.add_subscription(subscription(&keys, 0)).unwrap();

    let tx = TransferTransaction::default()
        .paying(&stranger.address, 700)
        .create();
    let blocks = vec![complete_block(10, vec![tx])];

    assert!(BlockchainConsumer::on_new_blocks(&consumer, &blocks, 10));
    assert_eq!(0, sub.container().balance(flags::INCLUDE_ALL).unwrap());
    assert_eq!(0, sub.container().transactions_count().unwrap());
}

#[test]
fn test_consumer_detects_spend_through_real_key_images() {
    let keys = account();
    let stranger = account();
    let consumer =
        TransfersConsumer::new(Params::default(), index_node(), keys.view_secret_key.clone())
            .unwrap();
    let sub = consumer.add_subscription(subscription(&keys, 0)).unwrap();

    let fund = TransferTransaction::default()
        .paying(&keys.address, 700)
        .create();
    let spend = TransferTransaction::default()
        .spending(key_input(700, expected_key_image(&keys, &fund, 0)))
        .paying(&stranger.address, 650)
        .create();

    let blocks = vec![
        complete_block(10, vec![fund]),
        complete_block(11, vec![spend]),
    ];
    assert!(BlockchainConsumer::on_new_blocks(&consumer, &blocks, 10));

    assert_eq!(0, sub.container().balance(flags::INCLUDE_DEFAULT).unwrap());
    assert_eq!(
        700,
        sub.container()
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_SPENT)
            .unwrap()
    );
}

#[test]
fn test_consumer_promotes_pool_transaction_when_mined() {
    let keys = account();
    let consumer =
        TransfersConsumer::new(Params::default(), index_node(), keys.view_secret_key.clone())
            .unwrap();
    let sub = consumer.add_subscription(subscription(&keys, 0)).unwrap();

    let tx = TransferTransaction::default()
        .paying(&keys.address, 500)
        .create();

    BlockchainConsumer::on_pool_updated(&consumer, &[tx.clone()], &[]).unwrap();

    assert_eq!(
        500,
        sub.container()
            .balance(flags::INCLUDE_TYPE_KEY | flags::INCLUDE_STATE_LOCKED)
            .unwrap()
    );
    assert_eq!(
        vec![tx.hash()],
        BlockchainConsumer::known_pool_tx_ids(&consumer)
    );

    let blocks = vec![complete_block(20, vec![tx.clone()])];
    assert!(BlockchainConsumer::on_new_blocks(&consumer, &blocks, 20));

    assert!(sub
        .container()
        .get_unconfirmed_transactions()
        .unwrap()
        .is_empty());
    let outputs = sub
        .container()
        .get_transaction_outputs(&tx.hash(), flags::INCLUDE_ALL)
        .unwrap();
    assert_eq!(100, outputs[0].global_output_index);
    assert_eq!(500, sub.container().balance(flags::INCLUDE_DEFAULT).unwrap());
}

#[test]
fn test_consumer_drops_deleted_pool_transactions() {
    let keys = account();
    let consumer =
        TransfersConsumer::new(Params::default(), index_node(), keys.view_secret_key.clone())
            .unwrap();
    let sub = consumer.add_subscription(subscription(&keys, 0)).unwrap();

    let tx = TransferTransaction::default()
        .paying(&keys.address, 500)
        .create();

    BlockchainConsumer::on_pool_updated(&consumer, &[tx.clone()], &[]).unwrap();
    assert_eq!(1, sub.container().transactions_count().unwrap());

    BlockchainConsumer::on_pool_updated(&consumer, &[], &[tx.hash()]).unwrap();
    assert_eq!(0, sub.container().transactions_count().unwrap());
    assert_eq!(0, sub.container().balance(flags::INCLUDE_ALL).unwrap());
}

#[test]
fn test_consumer_sync_start_is_the_minimum_over_subscriptions() {
    let keys = account();
    let consumer =
        TransfersConsumer::new(Params::default(), index_node(), keys.view_secret_key.clone())
            .unwrap();

    let mut early = subscription(&keys, 0);
    early.sync_start = crate::types::SyncStart {
        timestamp: 100,
        height: 50,
    };
    consumer.add_subscription(early).unwrap();

    let start = consumer.sync_start().unwrap();
    assert_eq!(100, start.timestamp);
    assert_eq!(50, start.height);
}

#[test]
fn test_transfers_synchronizer_save_load_round_trip() {
    let keys = account();
    let node = index_node();
    let genesis = Hash([0xEE; 32]);

    let build = || {
        let sync = Arc::new(BlockchainSynchronizer::new(node.clone(), genesis));
        let transfers = TransfersSynchronizer::new(Params::default(), node.clone(), sync);
        let sub = transfers.add_subscription(subscription(&keys, 0)).unwrap();
        (transfers, sub)
    };

    let (source, sub) = build();
    let tx = TransferTransaction::default()
        .paying(&keys.address, 800)
        .create();
    sub.add_transaction(
        &block_info(10, 1_600_000_000),
        &tx,
        &[output_in(&tx, 0, 40, fake_key_image(1))],
    )
    .unwrap();
    sub.advance_height(15).unwrap();

    let mut stream = Vec::new();
    source.save(&mut stream).unwrap();

    let (target, target_sub) = build();
    target.load(&mut stream.as_slice()).unwrap();

    assert_eq!(
        sub.container().balance(flags::INCLUDE_ALL).unwrap(),
        target_sub.container().balance(flags::INCLUDE_ALL).unwrap()
    );
    assert_eq!(
        800,
        target_sub
            .container()
            .balance(flags::INCLUDE_DEFAULT)
            .unwrap()
    );

    // Saving the restored state is byte-identical.
    let mut second = Vec::new();
    target.save(&mut second).unwrap();
    assert_eq!(stream, second);
}
