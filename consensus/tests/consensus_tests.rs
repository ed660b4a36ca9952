//! Election engine tests over a real ledger.

use lattice_consensus::{
    ActiveConfig, ActiveTransactions, ElectionObserver, ElectionStatus, OnlineReps, VoteCode,
    VoteProcessor, VoteProcessorConfig, VotesCache,
};
use lattice_crypto::{sign_message, SignatureChecker};
use lattice_ledger::genesis::dev_genesis_key;
use lattice_ledger::{Ledger, LedgerConstants, ProcessResult, SignatureVerification};
use lattice_store::Store;
use lattice_types::{
    Account, Amount, Block, BlockHash, Network, SendBlock, Signature, Vote,
};
use lattice_utils::Stats;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    active: Arc<ActiveTransactions>,
    genesis_hash: BlockHash,
}

#[derive(Default)]
struct CapturingObserver {
    confirmed: Mutex<Vec<ElectionStatus>>,
}

impl ElectionObserver for CapturingObserver {
    fn election_confirmed(&self, status: &ElectionStatus) {
        self.confirmed.lock().unwrap().push(status.clone());
    }
}

fn fixture() -> (Fixture, Arc<CapturingObserver>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open_with_map_size(dir.path(), 64 * 1024 * 1024).unwrap());
    let constants = LedgerConstants::new(Network::Test);
    let genesis_hash = constants.genesis.hash();
    let ledger = Arc::new(Ledger::new(store, constants, Arc::new(Stats::new())).unwrap());
    let online_reps = Arc::new(OnlineReps::new(
        Arc::clone(&ledger),
        Amount::raw(1000),
        50,
        Duration::from_secs(300),
        16,
    ));
    let active = Arc::new(ActiveTransactions::new(
        Arc::clone(&ledger),
        Arc::clone(&online_reps),
        ActiveConfig::default(),
    ));
    let observer = Arc::new(CapturingObserver::default());
    active.add_observer(observer.clone());
    (
        Fixture {
            _dir: dir,
            ledger,
            online_reps,
            active,
            genesis_hash,
        },
        observer,
    )
}

fn send_from(previous: BlockHash, destination_byte: u8, remaining: u128) -> Block {
    let keys = dev_genesis_key();
    let mut block = Block::Send(SendBlock {
        previous,
        destination: Account::new([destination_byte; 32]),
        balance: Amount::raw(remaining),
        signature: Signature::ZERO,
        work: 0,
    });
    block.set_signature(sign_message(block.hash().as_bytes(), &keys.private));
    block
}

fn genesis_send(fixture: &Fixture, destination_byte: u8, remaining: u128) -> Block {
    send_from(fixture.genesis_hash, destination_byte, remaining)
}

fn genesis_vote(sequence: u64, hashes: Vec<BlockHash>) -> Vote {
    let keys = dev_genesis_key();
    let mut vote = Vote::new_hashes(keys.account(), sequence, hashes).unwrap();
    vote.signature = sign_message(vote.hash().as_bytes(), &keys.private);
    vote
}

#[test]
fn fork_resolved_by_quorum_vote() {
    let (fixture, observer) = fixture();
    let s1 = genesis_send(&fixture, 0x11, u128::MAX - 1);
    let s2 = genesis_send(&fixture, 0x22, u128::MAX - 2);

    // Commit s1; s2 is the losing fork candidate.
    {
        let mut txn = fixture.ledger.store.tx_begin_write().unwrap();
        let result = fixture
            .ledger
            .process(&mut txn, &s1, SignatureVerification::Unknown)
            .unwrap();
        assert_eq!(result.code, ProcessResult::Progress);
        txn.commit().unwrap();
    }

    assert!(fixture.active.start(s1.clone()));
    assert!(fixture.active.publish(s2.clone()));
    assert_eq!(fixture.active.size(), 1);

    // The genesis account holds the full supply, far past quorum.
    let vote = genesis_vote(1, vec![s1.hash()]);
    let replay = fixture.active.vote(&vote);
    assert!(!replay);

    let confirmed = observer.confirmed.lock().unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].winner.hash(), s1.hash());
    assert_eq!(confirmed[0].tally, Amount::raw(u128::MAX - 1));
    drop(confirmed);

    assert_eq!(fixture.active.size(), 0);
    assert!(fixture.active.recently_confirmed(&s1.qualified_root()));

    // A vote arriving after confirmation does not reopen the election.
    let late = genesis_vote(2, vec![s2.hash()]);
    fixture.active.vote(&late);
    assert_eq!(fixture.active.size(), 0);
}

#[test]
fn replay_votes_do_not_shift_tally() {
    let (fixture, observer) = fixture();
    let s1 = genesis_send(&fixture, 0x11, u128::MAX - 1);
    let s2 = genesis_send(&fixture, 0x22, u128::MAX - 2);

    // Use a powerless voter so the election stays open while we watch the
    // sequence rules.
    let voter = lattice_crypto::keypair_from_private(&lattice_types::PrivateKey([9; 32]));
    assert!(fixture.active.start(s1.clone()));
    assert!(fixture.active.publish(s2.clone()));

    let vote5 = Vote::new_hashes(voter.account(), 5, vec![s1.hash()]).unwrap();
    assert!(!fixture.active.vote(&vote5));

    // Same sequence, different hash: replay.
    let vote5b = Vote::new_hashes(voter.account(), 5, vec![s2.hash()]).unwrap();
    assert!(fixture.active.vote(&vote5b));

    // Higher sequence: accepted.
    let vote6 = Vote::new_hashes(voter.account(), 6, vec![s2.hash()]).unwrap();
    assert!(!fixture.active.vote(&vote6));

    assert!(observer.confirmed.lock().unwrap().is_empty());
}

#[test]
fn overflow_evicts_long_unconfirmed_elections() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open_with_map_size(dir.path(), 64 * 1024 * 1024).unwrap());
    let constants = LedgerConstants::new(Network::Test);
    let genesis_hash = constants.genesis.hash();
    let ledger = Arc::new(Ledger::new(store, constants, Arc::new(Stats::new())).unwrap());
    let online_reps = Arc::new(OnlineReps::new(
        Arc::clone(&ledger),
        Amount::raw(1000),
        50,
        Duration::from_secs(300),
        16,
    ));
    let active = Arc::new(ActiveTransactions::new(
        Arc::clone(&ledger),
        online_reps,
        ActiveConfig {
            max_elections: 2,
            ..ActiveConfig::default()
        },
    ));

    // Three competing sends at distinct roots: each gets its own election.
    let first = send_from(genesis_hash, 1, u128::MAX - 1);
    let second = send_from(first.hash(), 2, u128::MAX - 2);
    let third = send_from(second.hash(), 3, u128::MAX - 3);

    assert!(active.start(first));
    assert!(active.start(second));
    // Age both elections past the long-unconfirmed threshold.
    for _ in 0..3 {
        active.request_confirm();
    }
    assert!(active.start(third.clone()));
    // The aged elections were evicted to honor the cap.
    assert!(active.size() <= 2);

    // Explicit erase drops the remaining election without confirming it.
    active.erase(&third.qualified_root());
    assert!(!active.active(&third.qualified_root()));
}

#[test]
fn vote_processor_codes() {
    let (fixture, _observer) = fixture();
    let checker = Arc::new(SignatureChecker::new());
    let votes_cache = Arc::new(VotesCache::new(16));
    let processor = Arc::new(VoteProcessor::new(
        Arc::clone(&fixture.ledger),
        Arc::clone(&fixture.active),
        Arc::clone(&fixture.online_reps),
        votes_cache.clone(),
        checker,
        Arc::new(Stats::new()),
        VoteProcessorConfig::default(),
    ));

    let s1 = genesis_send(&fixture, 0x11, u128::MAX - 1);
    {
        let mut txn = fixture.ledger.store.tx_begin_write().unwrap();
        fixture
            .ledger
            .process(&mut txn, &s1, SignatureVerification::Unknown)
            .unwrap();
        txn.commit().unwrap();
    }

    // An unsigned vote is invalid.
    let bogus = Arc::new(Vote::new_hashes(dev_genesis_key().account(), 9, vec![s1.hash()]).unwrap());
    assert_eq!(processor.vote_blocking(&bogus, false), VoteCode::Invalid);

    // A weightless voter is indeterminate.
    let nobody = lattice_crypto::keypair_from_private(&lattice_types::PrivateKey([7; 32]));
    let mut unknown = Vote::new_hashes(nobody.account(), 1, vec![s1.hash()]).unwrap();
    unknown.signature = sign_message(unknown.hash().as_bytes(), &nobody.private);
    assert_eq!(
        processor.vote_blocking(&Arc::new(unknown), true),
        VoteCode::Indeterminate
    );

    // A first genesis vote counts; it also confirms and caches.
    let vote = Arc::new(genesis_vote(5, vec![s1.hash()]));
    assert_eq!(processor.vote_blocking(&vote, true), VoteCode::Vote);
    assert_eq!(votes_cache.find(&s1.hash()).len(), 1);

    // An older sequence from the same voter is a replay after restart-style
    // lookup from the vote table.
    let stale = Arc::new(genesis_vote(4, vec![s1.hash()]));
    assert_eq!(processor.vote_blocking(&stale, true), VoteCode::Replay);
}
