//! End-to-end node tests: block ingestion, fork resolution by vote,
//! gap-triggered bootstrap, and the confirmation-height cascade.

use lattice_crypto::{random_keypair, sign_message, KeyPair};
use lattice_ledger::genesis::dev_genesis_key;
use lattice_node::bootstrap::{BootstrapClient, BootstrapError, ClientFactory};
use lattice_node::{Node, NodeConfig};
use lattice_types::{
    Account, Amount, Block, BlockHash, Network, OpenBlock, PendingKey, SendBlock, Signature, Vote,
};
use lattice_work::{WorkGenerator, WorkThresholds};
use std::collections::HashMap;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn test_node() -> (TempDir, Arc<Node>) {
    let dir = TempDir::new().unwrap();
    let node = Node::new(Network::Test, dir.path(), NodeConfig::default()).unwrap();
    node.start();
    (dir, node)
}

fn finish(node: Arc<Node>) {
    node.stop();
}

/// Poll until `condition` holds or a generous deadline passes.
fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached within the deadline");
}

fn seal(mut block: Block, keys: &KeyPair) -> Block {
    let signature = sign_message(block.hash().as_bytes(), &keys.private);
    block.set_signature(signature);
    let thresholds = WorkThresholds::new(Network::Test);
    let work = WorkGenerator::new()
        .solve(&block.root(), thresholds.epoch_0)
        .unwrap();
    block.set_work(work);
    block
}

fn genesis_send(previous: BlockHash, destination: Account, remaining: u128) -> Block {
    seal(
        Block::Send(SendBlock {
            previous,
            destination,
            balance: Amount::raw(remaining),
            signature: Signature::ZERO,
            work: 0,
        }),
        &dev_genesis_key(),
    )
}

fn open_for(keys: &KeyPair, source: BlockHash) -> Block {
    seal(
        Block::Open(OpenBlock {
            source,
            representative: keys.account(),
            account: keys.account(),
            signature: Signature::ZERO,
            work: 0,
        }),
        keys,
    )
}

fn genesis_vote(sequence: u64, hashes: Vec<BlockHash>) -> Arc<Vote> {
    let keys = dev_genesis_key();
    let mut vote = Vote::new_hashes(keys.account(), sequence, hashes).unwrap();
    vote.signature = sign_message(vote.hash().as_bytes(), &keys.private);
    Arc::new(vote)
}

fn peer() -> SocketAddrV6 {
    SocketAddrV6::new(Ipv6Addr::LOCALHOST, 7075, 0, 0)
}

fn block_exists(node: &Arc<Node>, hash: &BlockHash) -> bool {
    let txn = node.ledger.store.tx_begin_read().unwrap();
    node.ledger.store.blocks.exists(&txn, hash).unwrap()
}

fn confirmation_height(node: &Arc<Node>, account: &Account) -> u64 {
    let txn = node.ledger.store.tx_begin_read().unwrap();
    node.ledger
        .store
        .confirmation_height
        .get(&txn, account)
        .unwrap()
        .height
}

#[test]
fn block_is_processed_voted_and_cemented() {
    let (_dir, node) = test_node();
    let genesis_account = node.ledger.constants.genesis_account;
    let genesis_hash = node.ledger.constants.genesis.hash();

    let send = genesis_send(genesis_hash, Account::new([0x42; 32]), u128::MAX - 1);
    assert!(node.process_active(send.clone()));
    wait_until(|| block_exists(&node, &send.hash()));

    // An election opened for the new head; the genesis vote is quorum.
    let vote = genesis_vote(1, vec![send.hash()]);
    node.process_vote(vote, peer());
    wait_until(|| confirmation_height(&node, &genesis_account) == 2);

    // Invariant: cemented height never exceeds the chain length.
    let txn = node.ledger.store.tx_begin_read().unwrap();
    let info = node
        .ledger
        .store
        .accounts
        .get(&txn, &genesis_account)
        .unwrap()
        .unwrap();
    assert_eq!(info.block_count, 2);
    drop(txn);
    finish(node);
}

#[test]
fn fork_is_resolved_toward_the_voted_branch() {
    let (_dir, node) = test_node();
    let genesis_account = node.ledger.constants.genesis_account;
    let genesis_hash = node.ledger.constants.genesis.hash();
    let k1 = Account::new([0x11; 32]);
    let k2 = Account::new([0x22; 32]);

    let s1 = genesis_send(genesis_hash, k1, u128::MAX - 1);
    let s2 = genesis_send(genesis_hash, k2, u128::MAX - 2);

    // s1 commits first; s2 arrives as a fork and joins the election.
    assert!(node.process_active(s1.clone()));
    wait_until(|| block_exists(&node, &s1.hash()));
    assert!(node.process_active(s2.clone()));
    wait_until(|| node.active.active_block(&s2.hash()));

    // Quorum votes for s2: the committed s1 must be rolled back.
    let vote = genesis_vote(1, vec![s2.hash()]);
    node.process_vote(vote, peer());

    wait_until(|| block_exists(&node, &s2.hash()) && !block_exists(&node, &s1.hash()));
    wait_until(|| confirmation_height(&node, &genesis_account) == 2);

    let txn = node.ledger.store.tx_begin_read().unwrap();
    assert!(node
        .ledger
        .store
        .pending
        .get(&txn, &PendingKey::new(k2, s2.hash()))
        .unwrap()
        .is_some());
    assert!(node
        .ledger
        .store
        .pending
        .get(&txn, &PendingKey::new(k1, s1.hash()))
        .unwrap()
        .is_none());
    drop(txn);
    finish(node);
}

#[test]
fn child_block_parks_in_unchecked_until_parent_arrives() {
    let (_dir, node) = test_node();
    let genesis_hash = node.ledger.constants.genesis.hash();

    let b1 = genesis_send(genesis_hash, Account::new([0x31; 32]), u128::MAX - 1);
    let b2 = genesis_send(b1.hash(), Account::new([0x32; 32]), u128::MAX - 2);

    // The child first: it must land in unchecked, keyed by the parent.
    assert!(node.process_active(b2.clone()));
    wait_until(|| {
        let txn = node.ledger.store.tx_begin_read().unwrap();
        node.ledger.store.unchecked.count(&txn).unwrap() == 1
    });
    assert!(!block_exists(&node, &b2.hash()));
    assert_eq!(node.gap_cache.size(), 1);

    // The parent arrives; the cascade promotes the child.
    assert!(node.process_active(b1.clone()));
    wait_until(|| block_exists(&node, &b1.hash()) && block_exists(&node, &b2.hash()));
    let txn = node.ledger.store.tx_begin_read().unwrap();
    assert_eq!(node.ledger.store.unchecked.count(&txn).unwrap(), 0);
    drop(txn);
    finish(node);
}

/// Serves chain segments from a fixed map, like a peer that already holds
/// the chain a `bulk_pull` names.
struct MapClient {
    segments: HashMap<BlockHash, Vec<Block>>,
}

impl BootstrapClient for MapClient {
    fn frontiers(
        &self,
        _start: Account,
        _count: u32,
    ) -> Result<Vec<(Account, BlockHash)>, BootstrapError> {
        Ok(Vec::new())
    }

    fn bulk_pull(
        &self,
        start: [u8; 32],
        _end: BlockHash,
        _count: u64,
    ) -> Result<Vec<Block>, BootstrapError> {
        match self.segments.get(&BlockHash::new(start)) {
            Some(blocks) => Ok(blocks.clone()),
            None => Err(BootstrapError::Disconnected("unknown hash".into())),
        }
    }

    fn push(&self, _blocks: Vec<Block>) -> Result<(), BootstrapError> {
        Ok(())
    }
}

struct MapFactory {
    client: Arc<MapClient>,
}

impl ClientFactory for MapFactory {
    fn connect(&self) -> Option<Arc<dyn BootstrapClient>> {
        Some(self.client.clone() as Arc<dyn BootstrapClient>)
    }
}

#[test]
fn vote_weight_behind_a_gap_triggers_lazy_bootstrap() {
    let (_dir, node) = test_node();
    let genesis_hash = node.ledger.constants.genesis.hash();

    let b1 = genesis_send(genesis_hash, Account::new([0x51; 32]), u128::MAX - 1);
    let b2 = genesis_send(b1.hash(), Account::new([0x52; 32]), u128::MAX - 2);

    // The peer holds the whole chain: a pull of b2 streams back to b1.
    let mut served = HashMap::new();
    served.insert(b2.hash(), vec![b2.clone(), b1.clone()]);
    served.insert(b1.hash(), vec![b1.clone()]);
    node.bootstrap.set_client_factory(Arc::new(MapFactory {
        client: Arc::new(MapClient { segments: served }),
    }));

    // b2 gaps on the unknown b1.
    assert!(node.process_active(b2.clone()));
    wait_until(|| node.gap_cache.size() == 1);

    // Quorum-level vote weight behind the gap schedules a lazy pull of b1
    // after the (test network: 5 ms) delay, and the cascade commits b2.
    let vote = genesis_vote(1, vec![b2.hash()]);
    node.process_vote(vote, peer());

    wait_until(|| block_exists(&node, &b1.hash()) && block_exists(&node, &b2.hash()));
    finish(node);
}

#[test]
fn cementing_a_receive_cements_the_source_chain_first() {
    let (_dir, node) = test_node();
    let genesis_account = node.ledger.constants.genesis_account;
    let genesis_hash = node.ledger.constants.genesis.hash();
    let keys = random_keypair();

    let send = genesis_send(genesis_hash, keys.account(), u128::MAX - 7);
    let open = open_for(&keys, send.hash());
    assert!(node.process_active(send.clone()));
    wait_until(|| block_exists(&node, &send.hash()));
    assert!(node.process_active(open.clone()));
    wait_until(|| block_exists(&node, &open.hash()));

    assert_eq!(confirmation_height(&node, &genesis_account), 1);
    assert_eq!(confirmation_height(&node, &keys.account()), 0);

    // Cementing the receive must first cement its source's chain.
    node.confirmation_height.add(open.hash());
    wait_until(|| confirmation_height(&node, &keys.account()) == 1);
    assert_eq!(confirmation_height(&node, &genesis_account), 2);
    finish(node);
}

#[test]
fn confirm_req_is_served_from_the_votes_cache() {
    let (_dir, node) = test_node();
    let genesis_hash = node.ledger.constants.genesis.hash();
    let send = genesis_send(genesis_hash, Account::new([0x61; 32]), u128::MAX - 1);
    assert!(node.process_active(send.clone()));
    wait_until(|| block_exists(&node, &send.hash()));

    let vote = genesis_vote(1, vec![send.hash()]);
    node.process_vote(vote, peer());
    wait_until(|| !node.votes_cache.find(&send.hash()).is_empty());

    let before = node.outbound.len();
    node.handle_message(
        lattice_messages::Message::ConfirmReq(lattice_messages::ConfirmReq::Roots(vec![(
            send.hash(),
            send.root(),
        )])),
        peer(),
    );
    assert!(node.outbound.len() > before);
    finish(node);
}

#[test]
fn backpressure_reports_full() {
    let dir = TempDir::new().unwrap();
    let mut config = NodeConfig::default();
    config.block_processor_full_size = 1;
    let node = Node::new(Network::Test, dir.path(), config).unwrap();
    // Not started: the queue cannot drain, so the second add must drop.
    let genesis_hash = node.ledger.constants.genesis.hash();
    let b1 = genesis_send(genesis_hash, Account::new([0x71; 32]), u128::MAX - 1);
    let b2 = genesis_send(b1.hash(), Account::new([0x72; 32]), u128::MAX - 2);
    assert!(node.process_active(b1));
    assert!(node.block_processor.half_full());
    assert!(node.block_processor.full());
    assert!(!node.process_active(b2));
    node.stop();
}
