//! Ledger state-machine tests over a real LMDB environment.

use lattice_crypto::{random_keypair, sign_message, KeyPair};
use lattice_ledger::genesis::dev_genesis_key;
use lattice_ledger::{Ledger, LedgerConstants, ProcessResult, SignatureVerification};
use lattice_store::Store;
use lattice_types::{
    Account, Amount, Block, BlockHash, ChangeBlock, ConfirmationHeightInfo, Epoch, Link, Network,
    OpenBlock, PendingKey, ReceiveBlock, SendBlock, Signature, StateBlock,
};
use lattice_utils::Stats;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    ledger: Ledger,
    genesis_key: KeyPair,
    genesis_hash: BlockHash,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open_with_map_size(dir.path(), 64 * 1024 * 1024).unwrap());
    let constants = LedgerConstants::new(Network::Test);
    let genesis_hash = constants.genesis.hash();
    let ledger = Ledger::new(store, constants, Arc::new(Stats::new())).unwrap();
    Fixture {
        _dir: dir,
        ledger,
        genesis_key: dev_genesis_key(),
        genesis_hash,
    }
}

fn signed(mut block: Block, key: &KeyPair) -> Block {
    let signature = sign_message(block.hash().as_bytes(), &key.private);
    block.set_signature(signature);
    block
}

fn process(fixture: &Fixture, block: &Block) -> ProcessResult {
    let mut txn = fixture.ledger.store.tx_begin_write().unwrap();
    let result = fixture
        .ledger
        .process(&mut txn, block, SignatureVerification::Unknown)
        .unwrap();
    txn.commit().unwrap();
    result.code
}

/// A classic send from genesis leaving `remaining` behind.
fn genesis_send(fixture: &Fixture, previous: BlockHash, destination: Account, remaining: u128) -> Block {
    signed(
        Block::Send(SendBlock {
            previous,
            destination,
            balance: Amount::raw(remaining),
            signature: Signature::ZERO,
            work: 0,
        }),
        &fixture.genesis_key,
    )
}

#[test]
fn genesis_open_establishes_supply() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let genesis_account = ledger.constants.genesis_account;

    let txn = ledger.store.tx_begin_read().unwrap();
    let info = ledger.store.accounts.get(&txn, &genesis_account).unwrap().unwrap();
    assert_eq!(info.head, fixture.genesis_hash);
    assert_eq!(info.block_count, 1);
    assert_eq!(info.balance, Amount::MAX);
    assert_eq!(ledger.weight(&genesis_account), Amount::MAX);
    let confirmation = ledger
        .store
        .confirmation_height
        .get(&txn, &genesis_account)
        .unwrap();
    assert_eq!(confirmation.height, 1);
    let (_, sideband) = ledger.store.blocks.get(&txn, &fixture.genesis_hash).unwrap().unwrap();
    assert_eq!(sideband.height, 1);
}

#[test]
fn reopening_restores_state() {
    let dir = TempDir::new().unwrap();
    let genesis_account;
    {
        let store = Arc::new(Store::open_with_map_size(dir.path(), 64 * 1024 * 1024).unwrap());
        let constants = LedgerConstants::new(Network::Test);
        genesis_account = constants.genesis_account;
        Ledger::new(store, constants, Arc::new(Stats::new())).unwrap();
    }
    let store = Arc::new(Store::open_with_map_size(dir.path(), 64 * 1024 * 1024).unwrap());
    let ledger = Ledger::new(store, LedgerConstants::new(Network::Test), Arc::new(Stats::new())).unwrap();
    let txn = ledger.store.tx_begin_read().unwrap();
    assert_eq!(ledger.block_count(&txn).unwrap(), 1);
    assert_eq!(ledger.weight(&genesis_account), Amount::MAX);
}

#[test]
fn send_receive_round_trip() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let genesis_account = ledger.constants.genesis_account;
    let key = random_keypair();

    let send = genesis_send(&fixture, fixture.genesis_hash, key.account(), u128::MAX - 1);
    let send_hash = send.hash();
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);

    {
        let txn = ledger.store.tx_begin_read().unwrap();
        let pending = ledger
            .store
            .pending
            .get(&txn, &PendingKey::new(key.account(), send_hash))
            .unwrap()
            .unwrap();
        assert_eq!(pending.amount, Amount::raw(1));
        assert_eq!(pending.source, genesis_account);
    }

    let open = signed(
        Block::Open(OpenBlock {
            source: send_hash,
            representative: key.account(),
            account: key.account(),
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert_eq!(process(&fixture, &open), ProcessResult::Progress);

    let txn = ledger.store.tx_begin_read().unwrap();
    assert!(ledger
        .store
        .pending
        .get(&txn, &PendingKey::new(key.account(), send_hash))
        .unwrap()
        .is_none());
    assert_eq!(
        ledger.account_balance(&txn, &genesis_account).unwrap(),
        Amount::raw(u128::MAX - 1)
    );
    assert_eq!(
        ledger.account_balance(&txn, &key.account()).unwrap(),
        Amount::raw(1)
    );
    assert_eq!(ledger.weight(&key.account()), Amount::raw(1));
    assert_eq!(ledger.weight(&genesis_account), Amount::raw(u128::MAX - 1));

    // Sideband height invariant: open is height 1, send is height 2.
    let (_, open_sideband) = ledger.store.blocks.get(&txn, &open.hash()).unwrap().unwrap();
    assert_eq!(open_sideband.height, 1);
    let (_, send_sideband) = ledger.store.blocks.get(&txn, &send_hash).unwrap().unwrap();
    assert_eq!(send_sideband.height, 2);
}

#[test]
fn duplicate_block_is_old() {
    let fixture = fixture();
    let send = genesis_send(&fixture, fixture.genesis_hash, random_keypair().account(), u128::MAX - 1);
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);
    assert_eq!(process(&fixture, &send), ProcessResult::Old);
}

#[test]
fn send_must_strictly_decrease() {
    let fixture = fixture();
    let equal = genesis_send(&fixture, fixture.genesis_hash, random_keypair().account(), u128::MAX);
    assert_eq!(process(&fixture, &equal), ProcessResult::BalanceMismatch);
}

#[test]
fn bad_signature_rejected() {
    let fixture = fixture();
    let mut send = genesis_send(&fixture, fixture.genesis_hash, random_keypair().account(), 10);
    send.set_signature(Signature([0x55; 64]));
    assert_eq!(process(&fixture, &send), ProcessResult::BadSignature);
}

#[test]
fn fork_detected_on_competing_sends() {
    let fixture = fixture();
    let s1 = genesis_send(&fixture, fixture.genesis_hash, Account::new([0x11; 32]), u128::MAX - 1);
    let s2 = genesis_send(&fixture, fixture.genesis_hash, Account::new([0x22; 32]), u128::MAX - 2);
    assert_eq!(process(&fixture, &s1), ProcessResult::Progress);
    assert_eq!(process(&fixture, &s2), ProcessResult::Fork);
}

#[test]
fn gap_previous_and_source() {
    let fixture = fixture();
    let orphan = genesis_send(&fixture, BlockHash::new([0xEE; 32]), Account::new([1; 32]), 5);
    assert_eq!(process(&fixture, &orphan), ProcessResult::GapPrevious);

    let key = random_keypair();
    let open = signed(
        Block::Open(OpenBlock {
            source: BlockHash::new([0xDD; 32]),
            representative: key.account(),
            account: key.account(),
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert_eq!(process(&fixture, &open), ProcessResult::GapSource);
}

#[test]
fn receive_of_a_receive_is_unreceivable() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let key = random_keypair();

    let send = genesis_send(&fixture, fixture.genesis_hash, key.account(), u128::MAX - 5);
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);
    let open = signed(
        Block::Open(OpenBlock {
            source: send.hash(),
            representative: key.account(),
            account: key.account(),
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert_eq!(process(&fixture, &open), ProcessResult::Progress);

    // A receive naming the open block (a receive) as source has no pending
    // entry to consume.
    let receive = signed(
        Block::Receive(ReceiveBlock {
            previous: open.hash(),
            source: open.hash(),
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert_eq!(process(&fixture, &receive), ProcessResult::Unreceivable);
    let txn = ledger.store.tx_begin_read().unwrap();
    assert_eq!(ledger.account_balance(&txn, &key.account()).unwrap(), Amount::raw(5));
}

#[test]
fn burn_account_cannot_be_opened() {
    let fixture = fixture();
    let send = genesis_send(&fixture, fixture.genesis_hash, Account::BURN, u128::MAX - 3);
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);

    let state_open = Block::State(StateBlock {
        account: Account::BURN,
        previous: BlockHash::ZERO,
        representative: Account::BURN,
        balance: Amount::raw(3),
        link: Link::from(send.hash()),
        signature: Signature([1; 64]),
        work: 0,
    });
    assert_eq!(process(&fixture, &state_open), ProcessResult::OpenedBurnAccount);
}

#[test]
fn state_send_receive_and_change() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let genesis_account = ledger.constants.genesis_account;
    let key = random_keypair();

    // State send from genesis.
    let send = signed(
        Block::State(StateBlock {
            account: genesis_account,
            previous: fixture.genesis_hash,
            representative: genesis_account,
            balance: Amount::raw(u128::MAX - 50),
            link: Link::from(key.account()),
            signature: Signature::ZERO,
            work: 0,
        }),
        &fixture.genesis_key,
    );
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);

    // State open on the destination.
    let open = signed(
        Block::State(StateBlock {
            account: key.account(),
            previous: BlockHash::ZERO,
            representative: key.account(),
            balance: Amount::raw(50),
            link: Link::from(send.hash()),
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert_eq!(process(&fixture, &open), ProcessResult::Progress);
    assert_eq!(ledger.weight(&key.account()), Amount::raw(50));

    // State change: same balance, new representative.
    let rep = Account::new([0x77; 32]);
    let change = signed(
        Block::State(StateBlock {
            account: key.account(),
            previous: open.hash(),
            representative: rep,
            balance: Amount::raw(50),
            link: Link::ZERO,
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert_eq!(process(&fixture, &change), ProcessResult::Progress);
    assert_eq!(ledger.weight(&key.account()), Amount::ZERO);
    assert_eq!(ledger.weight(&rep), Amount::raw(50));

    // A receive whose stated balance disagrees with the pending amount.
    let send2 = signed(
        Block::State(StateBlock {
            account: genesis_account,
            previous: send.hash(),
            representative: genesis_account,
            balance: Amount::raw(u128::MAX - 80),
            link: Link::from(key.account()),
            signature: Signature::ZERO,
            work: 0,
        }),
        &fixture.genesis_key,
    );
    assert_eq!(process(&fixture, &send2), ProcessResult::Progress);
    let wrong_amount = signed(
        Block::State(StateBlock {
            account: key.account(),
            previous: change.hash(),
            representative: rep,
            balance: Amount::raw(60),
            link: Link::from(send2.hash()),
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert_eq!(process(&fixture, &wrong_amount), ProcessResult::BalanceMismatch);
}

#[test]
fn epoch_blocks_are_strict() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let genesis_account = ledger.constants.genesis_account;
    let epoch_link = ledger.constants.epochs.link(Epoch::Epoch1).unwrap();

    // Epoch upgrade signed by the epoch signer (the genesis key).
    let epoch = signed(
        Block::State(StateBlock {
            account: genesis_account,
            previous: fixture.genesis_hash,
            representative: genesis_account,
            balance: Amount::MAX,
            link: epoch_link,
            signature: Signature::ZERO,
            work: 0,
        }),
        &fixture.genesis_key,
    );
    assert_eq!(process(&fixture, &epoch), ProcessResult::Progress);
    {
        let txn = ledger.store.tx_begin_read().unwrap();
        let info = ledger.store.accounts.get(&txn, &genesis_account).unwrap().unwrap();
        assert_eq!(info.epoch, Epoch::Epoch1);
        assert_eq!(info.balance, Amount::MAX);
    }

    // Weight is untouched by epoch bumps.
    assert_eq!(ledger.weight(&genesis_account), Amount::MAX);

    // A second epoch-1 upgrade is out of sequence.
    let repeat = signed(
        Block::State(StateBlock {
            account: genesis_account,
            previous: epoch.hash(),
            representative: genesis_account,
            balance: Amount::MAX,
            link: epoch_link,
            signature: Signature::ZERO,
            work: 0,
        }),
        &fixture.genesis_key,
    );
    assert_eq!(process(&fixture, &repeat), ProcessResult::BlockPosition);

    // An epoch block that moves value is rejected.
    let thief = signed(
        Block::State(StateBlock {
            account: genesis_account,
            previous: epoch.hash(),
            representative: genesis_account,
            balance: Amount::raw(u128::MAX - 1),
            link: epoch_link,
            signature: Signature::ZERO,
            work: 0,
        }),
        &fixture.genesis_key,
    );
    assert_eq!(process(&fixture, &thief), ProcessResult::BalanceMismatch);
}

#[test]
fn rollback_send_restores_balance_and_pending() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let genesis_account = ledger.constants.genesis_account;
    let destination = Account::new([0x42; 32]);

    let send = genesis_send(&fixture, fixture.genesis_hash, destination, u128::MAX - 7);
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);
    assert_eq!(ledger.weight(&genesis_account), Amount::raw(u128::MAX - 7));

    let mut txn = ledger.store.tx_begin_write().unwrap();
    let rolled_back = ledger.rollback(&mut txn, &send.hash()).unwrap();
    txn.commit().unwrap();

    assert_eq!(rolled_back.len(), 1);
    assert_eq!(rolled_back[0].hash(), send.hash());
    let txn = ledger.store.tx_begin_read().unwrap();
    assert!(!ledger.store.blocks.exists(&txn, &send.hash()).unwrap());
    assert!(ledger
        .store
        .pending
        .get(&txn, &PendingKey::new(destination, send.hash()))
        .unwrap()
        .is_none());
    assert_eq!(ledger.account_balance(&txn, &genesis_account).unwrap(), Amount::MAX);
    assert_eq!(ledger.weight(&genesis_account), Amount::MAX);
    let info = ledger.store.accounts.get(&txn, &genesis_account).unwrap().unwrap();
    assert_eq!(info.head, fixture.genesis_hash);
    assert_eq!(info.block_count, 1);
}

#[test]
fn rollback_cascades_to_receiving_chain() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let key = random_keypair();

    let send = genesis_send(&fixture, fixture.genesis_hash, key.account(), u128::MAX - 9);
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);
    let open = signed(
        Block::Open(OpenBlock {
            source: send.hash(),
            representative: key.account(),
            account: key.account(),
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert_eq!(process(&fixture, &open), ProcessResult::Progress);

    // Rolling back the send undoes the open on the other chain too.
    let mut txn = ledger.store.tx_begin_write().unwrap();
    ledger.rollback(&mut txn, &send.hash()).unwrap();
    txn.commit().unwrap();

    let txn = ledger.store.tx_begin_read().unwrap();
    assert!(!ledger.store.blocks.exists(&txn, &send.hash()).unwrap());
    assert!(!ledger.store.blocks.exists(&txn, &open.hash()).unwrap());
    assert!(!ledger.store.accounts.exists(&txn, &key.account()).unwrap());
    assert_eq!(ledger.weight(&key.account()), Amount::ZERO);
}

#[test]
fn rollback_of_confirmed_block_fails() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let genesis_account = ledger.constants.genesis_account;

    let send = genesis_send(&fixture, fixture.genesis_hash, Account::new([9; 32]), u128::MAX - 2);
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);

    // Cement the send.
    let mut txn = ledger.store.tx_begin_write().unwrap();
    ledger
        .store
        .confirmation_height
        .put(
            &mut txn,
            &genesis_account,
            &ConfirmationHeightInfo {
                height: 2,
                frontier: send.hash(),
            },
        )
        .unwrap();
    txn.commit().unwrap();

    let mut txn = ledger.store.tx_begin_write().unwrap();
    assert!(ledger.rollback(&mut txn, &send.hash()).is_err());
    txn.abort();

    // State unchanged.
    let txn = ledger.store.tx_begin_read().unwrap();
    assert!(ledger.store.blocks.exists(&txn, &send.hash()).unwrap());
}

#[test]
fn change_block_moves_weight() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let genesis_account = ledger.constants.genesis_account;
    let rep = Account::new([0x33; 32]);

    let change = signed(
        Block::Change(ChangeBlock {
            previous: fixture.genesis_hash,
            representative: rep,
            signature: Signature::ZERO,
            work: 0,
        }),
        &fixture.genesis_key,
    );
    assert_eq!(process(&fixture, &change), ProcessResult::Progress);
    assert_eq!(ledger.weight(&rep), Amount::MAX);
    assert_eq!(ledger.weight(&genesis_account), Amount::ZERO);

    // Rolling back restores the genesis self-delegation.
    let mut txn = ledger.store.tx_begin_write().unwrap();
    ledger.rollback(&mut txn, &change.hash()).unwrap();
    txn.commit().unwrap();
    assert_eq!(ledger.weight(&rep), Amount::ZERO);
    assert_eq!(ledger.weight(&genesis_account), Amount::MAX);
}

#[test]
fn chain_queries_resolve_amounts_and_roots() {
    let fixture = fixture();
    let ledger = &fixture.ledger;
    let genesis_account = ledger.constants.genesis_account;
    let key = random_keypair();

    let send = genesis_send(&fixture, fixture.genesis_hash, key.account(), u128::MAX - 25);
    assert_eq!(process(&fixture, &send), ProcessResult::Progress);

    let txn = ledger.store.tx_begin_read().unwrap();
    assert_eq!(
        ledger.amount(&txn, &send.hash()).unwrap(),
        Some(Amount::raw(25))
    );
    assert_eq!(
        ledger.account(&txn, &send.hash()).unwrap(),
        Some(genesis_account)
    );
    assert_eq!(
        ledger.latest(&txn, &genesis_account).unwrap(),
        Some(send.hash())
    );
    // An account with no chain roots at itself.
    assert_eq!(
        ledger.latest_root(&txn, &key.account()).unwrap(),
        key.account().into()
    );
    assert_eq!(
        ledger.latest_root(&txn, &genesis_account).unwrap(),
        send.hash().into()
    );

    // could_fit: an open whose source exists fits; a chained block whose
    // previous is absent does not.
    let open = signed(
        Block::Open(OpenBlock {
            source: send.hash(),
            representative: key.account(),
            account: key.account(),
            signature: Signature::ZERO,
            work: 0,
        }),
        &key,
    );
    assert!(ledger.could_fit(&txn, &open).unwrap());
    let dangling = genesis_send(&fixture, BlockHash::new([0x99; 32]), key.account(), 1);
    assert!(!ledger.could_fit(&txn, &dangling).unwrap());
}

#[test]
fn forked_block_and_successor_queries() {
    let fixture = fixture();
    let ledger = &fixture.ledger;

    let s1 = genesis_send(&fixture, fixture.genesis_hash, Account::new([0x11; 32]), u128::MAX - 1);
    let s2 = genesis_send(&fixture, fixture.genesis_hash, Account::new([0x22; 32]), u128::MAX - 2);
    assert_eq!(process(&fixture, &s1), ProcessResult::Progress);

    let txn = ledger.store.tx_begin_read().unwrap();
    let forked = ledger.forked_block(&txn, &s2).unwrap().unwrap();
    assert_eq!(forked.hash(), s1.hash());
    assert!(ledger.forked_block(&txn, &s1).unwrap().is_none());

    let successor = ledger.successor(&txn, &s2.qualified_root()).unwrap().unwrap();
    assert_eq!(successor.hash(), s1.hash());
}
