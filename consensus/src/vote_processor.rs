//! Incoming vote pipeline.
//!
//! A bounded FIFO feeds a dedicated thread that batch-verifies signatures,
//! routes valid votes into active elections (opening one when a vote names
//! a known unconfirmed block), and persists each voter's highest sequence
//! so restarts keep refusing stale votes. Admission sheds small voters
//! first when the queue runs hot.

use crate::active_elections::ActiveTransactions;
use crate::online_weight::OnlineReps;
use crate::vote_cache::VotesCache;
use lattice_crypto::{SignatureCheck, SignatureChecker};
use lattice_ledger::Ledger;
use lattice_types::{Amount, Vote};
use lattice_utils::Stats;
use std::collections::VecDeque;
use std::net::SocketAddrV6;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::debug;

/// Votes drained and verified per batch.
const VOTE_BATCH: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteCode {
    /// Signature verification failed.
    Invalid,
    /// The voter's stored or per-election sequence already covers this vote.
    Replay,
    /// Counted.
    Vote,
    /// The voter carries no weight; nothing to tally.
    Indeterminate,
}

#[derive(Clone, Debug)]
pub struct VoteProcessorConfig {
    pub max_queue: usize,
}

impl Default for VoteProcessorConfig {
    fn default() -> Self {
        Self { max_queue: 16_384 }
    }
}

pub struct VoteProcessor {
    ledger: Arc<Ledger>,
    active: Arc<ActiveTransactions>,
    online_reps: Arc<OnlineReps>,
    votes_cache: Arc<VotesCache>,
    checker: Arc<SignatureChecker>,
    stats: Arc<Stats>,
    config: VoteProcessorConfig,
    queue: Mutex<VecDeque<(Arc<Vote>, SocketAddrV6)>>,
    condition: Condvar,
    stopped: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VoteProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        active: Arc<ActiveTransactions>,
        online_reps: Arc<OnlineReps>,
        votes_cache: Arc<VotesCache>,
        checker: Arc<SignatureChecker>,
        stats: Arc<Stats>,
        config: VoteProcessorConfig,
    ) -> Self {
        Self {
            ledger,
            active,
            online_reps,
            votes_cache,
            checker,
            stats,
            config,
            queue: Mutex::new(VecDeque::new()),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// Enqueue a vote for processing. Returns false when backpressure
    /// dropped it: a full queue sheds everything, a half-full queue sheds
    /// voters below one thousandth of online stake.
    pub fn vote(&self, vote: Arc<Vote>, from: SocketAddrV6) -> bool {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.config.max_queue {
            self.stats.inc("vote_processor", "overfill_drop");
            return false;
        }
        if queue.len() >= self.config.max_queue / 2 {
            let floor = Amount::raw(self.online_reps.online_stake().number() / 1000);
            if self.ledger.weight(&vote.account) < floor {
                self.stats.inc("vote_processor", "small_voter_drop");
                return false;
            }
        }
        queue.push_back((vote, from));
        drop(queue);
        self.condition.notify_all();
        true
    }

    /// Verify and route one vote whose signature status is already known.
    pub fn vote_blocking(&self, vote: &Arc<Vote>, verified: bool) -> VoteCode {
        if !verified {
            self.stats.inc("vote", "invalid");
            return VoteCode::Invalid;
        }
        let weight = self.ledger.weight(&vote.account);
        if weight.is_zero() {
            self.stats.inc("vote", "indeterminate");
            return VoteCode::Indeterminate;
        }

        let stored_sequence = self
            .ledger
            .store
            .tx_begin_read()
            .and_then(|txn| self.ledger.store.vote.sequence(&txn, &vote.account))
            .unwrap_or(0);
        let stored_replay = stored_sequence >= vote.sequence;

        // A vote can reference blocks nobody has contested yet; open an
        // election for any known unconfirmed block so the weight is not
        // lost.
        self.activate_referenced(vote);

        let election_replay = self.active.vote(vote);

        if !stored_replay {
            if let Err(error) = self.store_sequence(vote) {
                debug!(%error, "failed to persist vote sequence");
            }
        }
        self.online_reps.observe(&vote.account);
        self.votes_cache.add(vote);

        let code = if stored_replay || election_replay {
            VoteCode::Replay
        } else {
            VoteCode::Vote
        };
        self.stats.inc(
            "vote",
            match code {
                VoteCode::Vote => "valid",
                VoteCode::Replay => "replay",
                VoteCode::Invalid => "invalid",
                VoteCode::Indeterminate => "indeterminate",
            },
        );
        code
    }

    fn activate_referenced(&self, vote: &Arc<Vote>) {
        let Ok(txn) = self.ledger.store.tx_begin_read() else {
            return;
        };
        for hash in vote.hashes() {
            if self.active.active_block(&hash) {
                continue;
            }
            let Ok(Some(block)) = self.ledger.store.blocks.get_block(&txn, &hash) else {
                continue;
            };
            if self.ledger.block_confirmed(&txn, &hash).unwrap_or(false) {
                continue;
            }
            self.active.start(block);
        }
    }

    fn store_sequence(&self, vote: &Arc<Vote>) -> Result<(), lattice_store::StoreError> {
        let mut txn = self.ledger.store.tx_begin_write()?;
        // Re-check under the write lock; a parallel writer may have raced.
        if self.ledger.store.vote.sequence(&txn, &vote.account)? < vote.sequence {
            self.ledger.store.vote.put(&mut txn, vote)?;
        }
        txn.commit()
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("vote processing".into())
            .spawn(move || this.run())
            .expect("spawning the vote processor");
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until the queue is drained; test synchronization aid.
    pub fn flush(&self) {
        loop {
            if self.stopped.load(Ordering::SeqCst) || self.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    fn run(self: Arc<Self>) {
        loop {
            let batch = {
                let mut queue = self.queue.lock().unwrap();
                while queue.is_empty() && !self.stopped.load(Ordering::SeqCst) {
                    queue = self.condition.wait(queue).unwrap();
                }
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                let take = queue.len().min(VOTE_BATCH);
                queue.drain(..take).collect::<Vec<_>>()
            };
            let verifications = self.verify_batch(&batch);
            for ((vote, _from), valid) in batch.iter().zip(verifications) {
                self.vote_blocking(vote, valid);
            }
        }
    }

    fn verify_batch(&self, batch: &[(Arc<Vote>, SocketAddrV6)]) -> Vec<bool> {
        let mut check = SignatureCheck::default();
        for (vote, _) in batch {
            check.push(
                vote.hash().as_bytes().to_vec(),
                *vote.account.as_bytes(),
                vote.signature,
            );
        }
        self.checker
            .verify(&check)
            .into_iter()
            .map(|r| r == 1)
            .collect()
    }
}
