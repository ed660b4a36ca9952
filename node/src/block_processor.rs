//! The block ingestion pipeline.
//!
//! A single consumer thread drains an unverified queue and a forced queue.
//! Signatures are batch-verified before the write lease is taken, commits
//! are batched under the shared write queue, and forced blocks roll back
//! any conflicting unconfirmed subtree before taking its place. Blocks
//! whose dependencies are missing park in the unchecked table and register
//! with the gap cache.

use crate::gap_cache::GapCache;
use lattice_crypto::{SignatureCheck, SignatureChecker};
use lattice_ledger::{Ledger, LedgerError, ProcessResult, ProcessReturn, SignatureVerification};
use lattice_store::{UncheckedInfo, WriteQueue, WriteTransaction, Writer};
use lattice_types::{Block, BlockHash, UncheckedKey};
use lattice_utils::Stats;
use lattice_work::{work_value, WorkThresholds};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Hashes of forcibly replaced blocks remembered to stop their immediate
/// re-entry.
const ROLLED_BACK_SIZE: usize = 1024;
/// Blocks committed under one write lease.
const COMMIT_BATCH: usize = 256;

#[derive(Clone, Debug)]
pub struct BlockProcessorConfig {
    /// Soft deadline on one commit batch.
    pub batch_max_time: Duration,
    /// Queue depth at which `full()` reports backpressure.
    pub full_size: usize,
    /// Candidates shaped into one signature-verification batch.
    pub verify_batch_size: usize,
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        Self {
            batch_max_time: Duration::from_millis(5_000),
            full_size: 65_536,
            verify_batch_size: 4_096,
        }
    }
}

/// Post-commit outcomes are routed through this listener outside the write
/// lease; the node wires elections, flooding, and difficulty updates here.
pub trait BlockProcessorListener: Send + Sync {
    fn block_processed(&self, result: &ProcessReturn, block: &Block);
}

struct Queues {
    blocks: VecDeque<(Block, SignatureVerification)>,
    forced: VecDeque<Block>,
    /// Hashes currently queued, to drop duplicates cheaply.
    filter: HashSet<BlockHash>,
}

struct RolledBack {
    ring: VecDeque<BlockHash>,
    set: HashSet<BlockHash>,
}

impl RolledBack {
    fn insert(&mut self, hash: BlockHash) {
        if !self.set.insert(hash) {
            return;
        }
        self.ring.push_back(hash);
        while self.ring.len() > ROLLED_BACK_SIZE {
            if let Some(evicted) = self.ring.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }
}

pub struct BlockProcessor {
    ledger: Arc<Ledger>,
    gap_cache: Arc<GapCache>,
    checker: Arc<SignatureChecker>,
    write_queue: Arc<WriteQueue>,
    thresholds: WorkThresholds,
    stats: Arc<Stats>,
    config: BlockProcessorConfig,
    queues: Mutex<Queues>,
    condition: Condvar,
    stopped: AtomicBool,
    processing: AtomicBool,
    rolled_back: Mutex<RolledBack>,
    listeners: Mutex<Vec<Arc<dyn BlockProcessorListener>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BlockProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        gap_cache: Arc<GapCache>,
        checker: Arc<SignatureChecker>,
        write_queue: Arc<WriteQueue>,
        thresholds: WorkThresholds,
        stats: Arc<Stats>,
        config: BlockProcessorConfig,
    ) -> Self {
        Self {
            ledger,
            gap_cache,
            checker,
            write_queue,
            thresholds,
            stats,
            config,
            queues: Mutex::new(Queues {
                blocks: VecDeque::new(),
                forced: VecDeque::new(),
                filter: HashSet::new(),
            }),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            rolled_back: Mutex::new(RolledBack {
                ring: VecDeque::new(),
                set: HashSet::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn BlockProcessorListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Queue a candidate block. Returns false when it was culled: bad
    /// work, recently rolled back, duplicate in queue, or backpressure.
    pub fn add(&self, block: Block) -> bool {
        if work_value(&block.root(), block.work()) < self.thresholds.min_threshold() {
            self.stats.inc("blocks", "insufficient_work");
            return false;
        }
        let hash = block.hash();
        if self.rolled_back.lock().unwrap().set.contains(&hash) {
            self.stats.inc("blocks", "rolled_back_reentry");
            return false;
        }
        let mut queues = self.queues.lock().unwrap();
        if queues.blocks.len() >= self.config.full_size {
            self.stats.inc("blocks", "overfill_drop");
            return false;
        }
        if !queues.filter.insert(hash) {
            self.stats.inc("blocks", "duplicate_queued");
            return false;
        }
        queues
            .blocks
            .push_back((block, SignatureVerification::Unknown));
        drop(queues);
        self.condition.notify_all();
        true
    }

    /// Queue a block that bypasses verification and replaces whatever
    /// occupies its chain position (bootstrap fork resolution).
    pub fn force(&self, block: Block) {
        let mut queues = self.queues.lock().unwrap();
        queues.forced.push_back(block);
        drop(queues);
        self.condition.notify_all();
    }

    /// Backpressure signal: callers must drop or defer when true.
    pub fn full(&self) -> bool {
        self.queues.lock().unwrap().blocks.len() >= self.config.full_size
    }

    pub fn half_full(&self) -> bool {
        self.queues.lock().unwrap().blocks.len() >= self.config.full_size / 2
    }

    pub fn queue_len(&self) -> usize {
        self.queues.lock().unwrap().blocks.len()
    }

    /// Block until both queues are drained; test synchronization aid.
    pub fn flush(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            let queues = self.queues.lock().unwrap();
            let drained = queues.blocks.is_empty() && queues.forced.is_empty();
            drop(queues);
            if drained && !self.processing.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("block processing".into())
            .spawn(move || this.run())
            .expect("spawning the block processor");
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
            {
                let mut queues = self.queues.lock().unwrap();
                while queues.blocks.is_empty()
                    && queues.forced.is_empty()
                    && !self.stopped.load(Ordering::SeqCst)
                {
                    queues = self.condition.wait(queues).unwrap();
                }
            }
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            self.processing.store(true, Ordering::SeqCst);
            if let Err(err) = self.process_batch() {
                error!(%err, "block processor batch failed");
            }
            self.processing.store(false, Ordering::SeqCst);
        }
    }

    /// One pass: verify a signature batch, then commit under the write
    /// lease until the batch, the forced queue, the size cap, or the time
    /// cap runs out.
    fn process_batch(&self) -> Result<(), LedgerError> {
        let batch = {
            let mut queues = self.queues.lock().unwrap();
            let take = queues.blocks.len().min(self.config.verify_batch_size);
            let batch: Vec<_> = queues.blocks.drain(..take).collect();
            for (block, _) in &batch {
                queues.filter.remove(&block.hash());
            }
            batch
        };
        let mut verified = self.verify_batch(batch);

        let _guard = self.write_queue.wait(Writer::ProcessBatch);
        let mut txn = self.ledger.store.tx_begin_write()?;
        let deadline = Instant::now() + self.config.batch_max_time;
        let mut events: Vec<(ProcessReturn, Block)> = Vec::new();
        let mut requeue: Vec<Block> = Vec::new();
        let mut processed = 0usize;

        while processed < COMMIT_BATCH && Instant::now() < deadline {
            let forced = self.queues.lock().unwrap().forced.pop_front();
            let (block, verification, is_forced) = match forced {
                Some(block) => (block, SignatureVerification::Unknown, true),
                None => match verified.pop_front() {
                    Some((block, verification)) => (block, verification, false),
                    None => break,
                },
            };
            processed += 1;
            if let Some(result) =
                self.process_one(&mut txn, &block, verification, is_forced, &mut requeue)?
            {
                events.push((result, block));
            }
        }
        // Batch limits hit: push unprocessed verified blocks back.
        if !verified.is_empty() {
            let mut queues = self.queues.lock().unwrap();
            for (block, verification) in verified.into_iter().rev() {
                queues.filter.insert(block.hash());
                queues.blocks.push_front((block, verification));
            }
        }
        txn.commit()?;
        drop(_guard);

        for block in requeue {
            self.add_unchecked(block);
        }
        let listeners = self.listeners.lock().unwrap().clone();
        for (result, block) in &events {
            for listener in &listeners {
                listener.block_processed(result, block);
            }
        }
        Ok(())
    }

    /// Batch-verify state blocks, whose signer is in the block itself.
    /// Epoch-linked state blocks that fail against the account key are
    /// retried against the epoch signer; classic variants resolve their
    /// signer inside the ledger and pass through unverified.
    fn verify_batch(
        &self,
        batch: Vec<(Block, SignatureVerification)>,
    ) -> VecDeque<(Block, SignatureVerification)> {
        let mut check = SignatureCheck::default();
        let mut positions = Vec::new();
        for (index, (block, verification)) in batch.iter().enumerate() {
            if *verification != SignatureVerification::Unknown {
                continue;
            }
            if let Block::State(state) = block {
                check.push(
                    block.hash().as_bytes().to_vec(),
                    *state.account.as_bytes(),
                    state.signature,
                );
                positions.push(index);
            }
        }
        let results = self.checker.verify(&check);

        let mut epoch_check = SignatureCheck::default();
        let mut epoch_positions = Vec::new();
        let mut out: Vec<(Block, SignatureVerification)> = batch;
        for (position, result) in positions.iter().zip(&results) {
            let (block, verification) = &mut out[*position];
            if *result == 1 {
                *verification = SignatureVerification::Valid;
                continue;
            }
            let is_epoch = block
                .link()
                .map(|link| self.ledger.is_epoch_link(&link))
                .unwrap_or(false);
            if is_epoch {
                if let Some(signer) = self
                    .ledger
                    .constants
                    .epochs
                    .epoch(&block.link().expect("state block has a link"))
                    .and_then(|epoch| self.ledger.constants.epochs.signer(epoch))
                {
                    epoch_check.push(
                        block.hash().as_bytes().to_vec(),
                        *signer.as_bytes(),
                        *block.signature(),
                    );
                    epoch_positions.push(*position);
                    continue;
                }
            }
            *verification = SignatureVerification::Invalid;
        }
        let epoch_results = self.checker.verify(&epoch_check);
        for (position, result) in epoch_positions.iter().zip(&epoch_results) {
            out[*position].1 = if *result == 1 {
                SignatureVerification::ValidEpoch
            } else {
                SignatureVerification::Invalid
            };
        }
        out.into()
    }

    fn process_one(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        verification: SignatureVerification,
        forced: bool,
        requeue: &mut Vec<Block>,
    ) -> Result<Option<ProcessReturn>, LedgerError> {
        let hash = block.hash();
        if forced {
            // Roll back whatever currently occupies this chain position.
            if let Some(existing) = self.ledger.successor(txn, &block.qualified_root())? {
                if existing.hash() != hash {
                    match self.ledger.rollback(txn, &existing.hash()) {
                        Ok(rolled_back) => {
                            self.stats.add("rollback", "forced", rolled_back.len() as u64);
                            let mut ring = self.rolled_back.lock().unwrap();
                            for rolled in &rolled_back {
                                ring.insert(rolled.hash());
                            }
                        }
                        Err(err) => {
                            // The occupant is confirmed; the forced block loses.
                            warn!(%hash, %err, "refusing to roll back for forced block");
                            return Ok(None);
                        }
                    }
                }
            }
        }

        let result = self.ledger.process(txn, block, verification)?;
        match result.code {
            ProcessResult::Progress => {
                debug!(%hash, account = %result.account, "processed block");
                self.gap_cache.erase(&hash);
                // Anything parked on this hash can now be retried.
                let dependents = self.ledger.store.unchecked.get_dependents(txn, &hash)?;
                for (key, info) in dependents {
                    self.ledger.store.unchecked.del(txn, &key)?;
                    requeue.push(info.block);
                }
            }
            ProcessResult::GapPrevious => {
                let key = UncheckedKey::new(block.previous(), hash);
                self.park_unchecked(txn, key, block)?;
            }
            ProcessResult::GapSource => {
                let dependency = block
                    .source()
                    .or_else(|| block.link().map(|link| link.as_block_hash()))
                    .unwrap_or_default();
                let key = UncheckedKey::new(dependency, hash);
                self.park_unchecked(txn, key, block)?;
            }
            _ => {}
        }
        Ok(Some(result))
    }

    fn park_unchecked(
        &self,
        txn: &mut WriteTransaction,
        key: UncheckedKey,
        block: &Block,
    ) -> Result<(), LedgerError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.ledger
            .store
            .unchecked
            .put(txn, &key, &UncheckedInfo::new(block.clone(), now))?;
        self.gap_cache.add(block.hash());
        self.stats.inc("blocks", "gap");
        Ok(())
    }

    /// Requeue a block whose missing dependency just arrived.
    fn add_unchecked(&self, block: Block) {
        let hash = block.hash();
        let mut queues = self.queues.lock().unwrap();
        if queues.filter.insert(hash) {
            queues
                .blocks
                .push_back((block, SignatureVerification::Unknown));
            drop(queues);
            self.condition.notify_all();
        }
    }

    /// Delete unchecked entries older than the cutoff.
    pub fn cleanup_unchecked(&self, cutoff_secs: u64) -> Result<usize, LedgerError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut txn = self.ledger.store.tx_begin_write()?;
        let removed = self
            .ledger
            .store
            .unchecked
            .clear_older_than(&mut txn, now.saturating_sub(cutoff_secs))?;
        txn.commit()?;
        if removed > 0 {
            self.stats.add("blocks", "unchecked_cleaned", removed as u64);
        }
        Ok(removed)
    }
}
