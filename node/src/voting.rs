//! Vote generation for locally held representative keys.
//!
//! Hashes accumulate briefly so one vote covers up to twelve of them; each
//! local representative signs with a monotonic sequence persisted in the
//! vote table, so a restarted node never signs a stale sequence.

use lattice_crypto::{sign_message, KeyPair};
use lattice_ledger::{Ledger, LedgerError};
use lattice_types::{BlockHash, Vote, MAX_VOTE_HASHES};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::error;

/// Receives freshly generated votes for flooding and caching.
pub trait VoteSink: Send + Sync {
    fn vote_generated(&self, vote: Arc<Vote>);
}

pub struct VoteGenerator {
    ledger: Arc<Ledger>,
    delay: Duration,
    representatives: Mutex<Vec<KeyPair>>,
    sinks: Mutex<Vec<Arc<dyn VoteSink>>>,
    hashes: Mutex<VecDeque<BlockHash>>,
    condition: Condvar,
    stopped: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VoteGenerator {
    pub fn new(ledger: Arc<Ledger>, delay: Duration) -> Self {
        Self {
            ledger,
            delay,
            representatives: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            hashes: Mutex::new(VecDeque::new()),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// Register a local representative key.
    pub fn add_representative(&self, keys: KeyPair) {
        self.representatives.lock().unwrap().push(keys);
    }

    pub fn add_sink(&self, sink: Arc<dyn VoteSink>) {
        self.sinks.lock().unwrap().push(sink);
    }

    pub fn has_representatives(&self) -> bool {
        !self.representatives.lock().unwrap().is_empty()
    }

    /// Queue a hash to be voted on.
    pub fn add(&self, hash: BlockHash) {
        let mut hashes = self.hashes.lock().unwrap();
        hashes.push_back(hash);
        let full = hashes.len() >= MAX_VOTE_HASHES;
        drop(hashes);
        if full {
            self.condition.notify_all();
        }
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("voting".into())
            .spawn(move || this.run())
            .expect("spawning the vote generator");
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        loop {
            let batch = {
                let mut hashes = self.hashes.lock().unwrap();
                while hashes.is_empty() && !self.stopped.load(Ordering::SeqCst) {
                    hashes = self.condition.wait(hashes).unwrap();
                }
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                // Give stragglers a moment to join the batch.
                if hashes.len() < MAX_VOTE_HASHES {
                    hashes = self
                        .condition
                        .wait_timeout(hashes, self.delay)
                        .unwrap()
                        .0;
                }
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                let take = hashes.len().min(MAX_VOTE_HASHES);
                hashes.drain(..take).collect::<Vec<_>>()
            };
            if batch.is_empty() {
                continue;
            }
            if let Err(err) = self.generate(batch) {
                error!(%err, "vote generation failed");
            }
        }
    }

    /// Sign one vote per local representative over `hashes` and hand the
    /// votes to the sinks.
    fn generate(&self, hashes: Vec<BlockHash>) -> Result<(), LedgerError> {
        let representatives = self.representatives.lock().unwrap().clone();
        if representatives.is_empty() {
            return Ok(());
        }
        let mut votes = Vec::new();
        {
            let mut txn = self.ledger.store.tx_begin_write()?;
            for keys in &representatives {
                let account = keys.account();
                let sequence = self.ledger.store.vote.sequence(&txn, &account)? + 1;
                let mut vote = Vote::new_hashes(account, sequence, hashes.clone())
                    .expect("batch is capped at the vote hash limit");
                vote.signature = sign_message(vote.hash().as_bytes(), &keys.private);
                self.ledger.store.vote.put(&mut txn, &vote)?;
                votes.push(Arc::new(vote));
            }
            txn.commit()?;
        }
        let sinks = self.sinks.lock().unwrap().clone();
        for vote in votes {
            for sink in &sinks {
                sink.vote_generated(Arc::clone(&vote));
            }
        }
        Ok(())
    }
}
